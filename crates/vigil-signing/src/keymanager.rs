//! Key manager flows
//!
//! Import and delete of keystores at runtime, with per-key outcomes. Import
//! brings the slashing protection history in before a key becomes usable.
//! Delete stops the key first, then disables it in the protection store,
//! removes its files and hands the history back to the caller.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use vigil_core::{KeyType, SignerIdentifier};
use vigil_keys::factory::signer_from_keystore;
use vigil_keys::{Keystore, KeystoreFileManager, SignerRegistry};
use vigil_protection::{Interchange, ProtectionError, SlashingProtection};

use crate::error::{Result, SigningError};

/// Body of an import request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportKeystoresRequest {
    /// EIP-2335 keystores as JSON strings
    pub keystores: Vec<String>,
    /// One password per keystore
    pub passwords: Vec<String>,
    /// Interchange document as a JSON string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slashing_protection: Option<String>,
}

/// Body of a delete request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteKeystoresRequest {
    /// Public keys to delete
    pub pubkeys: Vec<String>,
}

/// Outcome of importing one keystore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// Key is now loaded
    Imported,
    /// Key was already loaded
    Duplicate,
    /// Import failed
    Error,
}

/// Outcome of deleting one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    /// Key was loaded and is now gone
    Deleted,
    /// Key is not loaded but has slashing protection history
    NotActive,
    /// Key is unknown
    NotFound,
    /// Delete failed
    Error,
}

/// Status and message for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOutcome<S> {
    /// Outcome
    pub status: S,
    /// Detail for errors
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl<S> KeyOutcome<S> {
    fn ok(status: S) -> Self {
        Self {
            status,
            message: String::new(),
        }
    }

    fn failed(status: S, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Response of an import request, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportKeystoresResponse {
    /// Per-keystore outcomes
    pub data: Vec<KeyOutcome<ImportStatus>>,
}

/// Response of a delete request, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteKeystoresResponse {
    /// Per-key outcomes
    pub data: Vec<KeyOutcome<DeleteStatus>>,
    /// Interchange document covering the deleted keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slashing_protection: Option<String>,
}

/// A loaded key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreEntry {
    /// `0x`-prefixed public key
    pub validating_pubkey: String,
    /// Whether the key can be deleted through the key manager
    pub readonly: bool,
}

/// Response of a list request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListKeystoresResponse {
    /// Loaded keys
    pub data: Vec<KeystoreEntry>,
}

/// Runtime import and delete of keystore-backed keys
#[derive(Clone)]
pub struct KeyManager {
    registry: SignerRegistry,
    protection: Option<Arc<dyn SlashingProtection>>,
    files: KeystoreFileManager,
}

impl KeyManager {
    /// Key manager writing keystores through `files`.
    pub fn new(
        registry: SignerRegistry,
        protection: Option<Arc<dyn SlashingProtection>>,
        files: KeystoreFileManager,
    ) -> Self {
        Self {
            registry,
            protection,
            files,
        }
    }

    /// Every loaded consensus key.
    pub fn list(&self) -> ListKeystoresResponse {
        let data = self
            .registry
            .available_identifiers()
            .into_iter()
            .map(|identifier| KeystoreEntry {
                validating_pubkey: identifier.to_prefixed(),
                readonly: false,
            })
            .collect();
        ListKeystoresResponse { data }
    }

    /// Import keystores with their passwords and optional protection history.
    ///
    /// Request-level problems (count mismatch, unparsable keystore or
    /// interchange) fail the whole call; everything else is reported per key.
    pub async fn import(&self, request: ImportKeystoresRequest) -> Result<ImportKeystoresResponse> {
        if request.keystores.len() != request.passwords.len() {
            return Err(SigningError::invalid_request(format!(
                "{} keystores but {} passwords",
                request.keystores.len(),
                request.passwords.len()
            )));
        }
        if request.keystores.is_empty() {
            return Ok(ImportKeystoresResponse { data: Vec::new() });
        }

        let mut parsed = Vec::with_capacity(request.keystores.len());
        for json in &request.keystores {
            let keystore =
                Keystore::from_json(json).map_err(|e| SigningError::invalid_request(e.to_string()))?;
            let identifier = SignerIdentifier::parse(&keystore.pubkey)
                .map_err(|e| SigningError::invalid_request(format!("keystore pubkey: {e}")))?;
            parsed.push((identifier, keystore));
        }

        if let (Some(protection), Some(document)) =
            (&self.protection, request.slashing_protection.as_deref())
        {
            let keys: BTreeSet<SignerIdentifier> = parsed.iter().map(|(id, _)| id.clone()).collect();
            let mut document = Interchange::from_json(document).map_err(request_error)?;
            document.data.retain(|entry| keys.contains(&entry.pubkey));
            protection.import(document).await.map_err(request_error)?;
        }

        let mut seen = self.registry.available_identifiers();
        let mut data = Vec::with_capacity(parsed.len());
        for ((identifier, keystore), password) in parsed.into_iter().zip(request.passwords) {
            if !seen.insert(identifier.clone()) {
                data.push(KeyOutcome::ok(ImportStatus::Duplicate));
                continue;
            }
            let outcome = match self.import_one(&identifier, keystore, password).await {
                Ok(()) => {
                    info!(%identifier, "keystore imported");
                    KeyOutcome::ok(ImportStatus::Imported)
                }
                Err(e) => {
                    error!(%identifier, "keystore import failed: {e}");
                    seen.remove(&identifier);
                    KeyOutcome::failed(ImportStatus::Error, format!("error importing keystore: {e}"))
                }
            };
            data.push(outcome);
        }
        Ok(ImportKeystoresResponse { data })
    }

    async fn import_one(
        &self,
        identifier: &SignerIdentifier,
        keystore: Keystore,
        password: String,
    ) -> Result<()> {
        let files = self.files.clone();
        let id = identifier.clone();
        let signer = tokio::task::spawn_blocking(move || {
            let signer = signer_from_keystore(&keystore, &password, KeyType::Bls)?;
            files.write_keystore(&id, &keystore, &password, KeyType::Bls)?;
            Ok::<_, vigil_keys::KeyError>(signer)
        })
        .await
        .map_err(|e| SigningError::Task {
            message: e.to_string(),
        })??;

        if let Some(protection) = &self.protection {
            protection
                .register_validators(std::slice::from_ref(identifier))
                .await?;
            // A previous delete leaves the validator disabled.
            protection.set_enabled(identifier, true).await?;
        }
        if let Err(e) = self.registry.add_signer(signer).await {
            self.remove_files(identifier).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Delete keys, returning per-key outcomes and their protection history.
    pub async fn delete(&self, request: DeleteKeystoresRequest) -> Result<DeleteKeystoresResponse> {
        let mut data = Vec::with_capacity(request.pubkeys.len());
        // Keys whose final status depends on whether history exists.
        let mut inactive = Vec::new();
        let mut export = BTreeSet::new();

        for raw in &request.pubkeys {
            let identifier = match SignerIdentifier::parse(raw) {
                Ok(identifier) => identifier,
                Err(e) => {
                    data.push(KeyOutcome::failed(DeleteStatus::Error, e.to_string()));
                    continue;
                }
            };
            if self.registry.get_signer(identifier.as_str()).is_none() {
                inactive.push((data.len(), identifier.clone()));
                export.insert(identifier);
                data.push(KeyOutcome::ok(DeleteStatus::NotFound));
                continue;
            }
            match self.delete_one(&identifier).await {
                Ok(()) => {
                    info!(%identifier, "key deleted");
                    export.insert(identifier);
                    data.push(KeyOutcome::ok(DeleteStatus::Deleted));
                }
                Err(e) => {
                    error!(%identifier, "key deletion failed: {e}");
                    data.push(KeyOutcome::failed(
                        DeleteStatus::Error,
                        format!("error deleting key: {e}"),
                    ));
                }
            }
        }

        let Some(protection) = &self.protection else {
            return Ok(DeleteKeystoresResponse {
                data,
                slashing_protection: None,
            });
        };
        let document = match protection.export(Some(export)).await {
            Ok(document) => document,
            Err(ProtectionError::MissingGenesisRoot) => {
                return Ok(DeleteKeystoresResponse {
                    data,
                    slashing_protection: None,
                })
            }
            Err(e) => {
                warn!("exporting slashing protection data for deleted keys failed: {e}");
                let message = format!("error exporting slashing protection data: {e}");
                let data = data
                    .into_iter()
                    .map(|_| KeyOutcome::failed(DeleteStatus::Error, message.clone()))
                    .collect();
                return Ok(DeleteKeystoresResponse {
                    data,
                    slashing_protection: None,
                });
            }
        };

        for (index, identifier) in inactive {
            if document.data.iter().any(|entry| entry.pubkey == identifier) {
                data[index] = KeyOutcome::ok(DeleteStatus::NotActive);
            }
        }
        Ok(DeleteKeystoresResponse {
            data,
            slashing_protection: Some(document.to_json()?),
        })
    }

    async fn delete_one(&self, identifier: &SignerIdentifier) -> Result<()> {
        self.registry.remove_signer(identifier).await?;
        if let Some(protection) = &self.protection {
            protection.set_enabled(identifier, false).await?;
        }
        let files = self.files.clone();
        let id = identifier.clone();
        tokio::task::spawn_blocking(move || files.delete_keystore(&id))
            .await
            .map_err(|e| SigningError::Task {
                message: e.to_string(),
            })??;
        Ok(())
    }

    async fn remove_files(&self, identifier: &SignerIdentifier) {
        let files = self.files.clone();
        let id = identifier.clone();
        match tokio::task::spawn_blocking(move || files.delete_keystore(&id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(%identifier, "removing keystore files failed: {e}"),
            Err(e) => warn!(%identifier, "removing keystore files failed: {e}"),
        }
    }
}

fn request_error(err: ProtectionError) -> SigningError {
    if err.is_input_error() {
        SigningError::invalid_request(format!("slashing protection data: {err}"))
    } else {
        SigningError::Protection(err)
    }
}
