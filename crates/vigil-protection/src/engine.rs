//! Slashing protection engine
//!
//! [`DbSlashingProtection`] runs every decision as one immediate transaction on
//! the blocking pool: read the watermark, high watermark and relevant history,
//! apply the pure rules from [`crate::decision`], write the record and raise
//! the watermark. A store failure surfaces as an error and never as an accept.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vigil_core::{Epoch, Root, SignerIdentifier, Slot};

use crate::dao;
use crate::decision::{
    decide_attestation, decide_block, AttestationRequest, BlockRequest, Decision, Rejection,
};
use crate::error::{ProtectionError, Result};
use crate::interchange::{self, ImportSummary, Interchange};
use crate::models::{HighWatermark, SignedAttestation, SignedBlock};
use crate::pruner::{Pruner, PruningConfig};
use crate::store::{Store, StoreConfig};

/// Decides whether slashable messages may be signed
#[async_trait]
pub trait SlashingProtection: Send + Sync {
    /// Check and record a block proposal.
    async fn may_sign_block(
        &self,
        identifier: &SignerIdentifier,
        signing_root: Root,
        slot: Slot,
        genesis_validators_root: Root,
    ) -> Result<Decision>;

    /// Check and record an attestation.
    async fn may_sign_attestation(
        &self,
        identifier: &SignerIdentifier,
        signing_root: Root,
        source_epoch: Epoch,
        target_epoch: Epoch,
        genesis_validators_root: Root,
    ) -> Result<Decision>;

    /// Create validator rows for keys that have none.
    async fn register_validators(&self, identifiers: &[SignerIdentifier]) -> Result<()>;

    /// Enable or disable a validator. Returns whether it exists.
    async fn set_enabled(&self, identifier: &SignerIdentifier, enabled: bool) -> Result<bool>;

    /// Export history, optionally limited to `filter`.
    async fn export(&self, filter: Option<BTreeSet<SignerIdentifier>>) -> Result<Interchange>;

    /// Import an interchange document.
    async fn import(&self, interchange: Interchange) -> Result<ImportSummary>;

    /// Whether the store answers.
    async fn is_healthy(&self) -> bool;
}

/// SQLite-backed [`SlashingProtection`]
#[derive(Debug, Clone)]
pub struct DbSlashingProtection {
    store: Arc<Store>,
}

impl DbSlashingProtection {
    /// Open the database described by `config`. Blocking.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            store: Arc::new(Store::open(config)?),
        })
    }

    /// Pruner sharing this engine's store.
    pub fn pruner(&self, config: PruningConfig) -> Result<Pruner> {
        Pruner::new(self.store.clone(), config)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ProtectionError::Task {
                message: e.to_string(),
            })?
    }

    /// Raise every validator's low watermark to at least `slot` and `epoch`.
    pub async fn update_low_watermarks(
        &self,
        slot: Option<Slot>,
        epoch: Option<Epoch>,
    ) -> Result<usize> {
        if slot.is_none() && epoch.is_none() {
            return Err(ProtectionError::invalid_argument(
                "a slot or an epoch is required",
            ));
        }
        let updated = self
            .blocking(move |store| {
                store.transaction(|tx| {
                    let validators = dao::all_validators(tx)?;
                    for validator in &validators {
                        if let Some(slot) = slot {
                            dao::raise_slot_watermark(tx, validator.id, slot)?;
                        }
                        if let Some(epoch) = epoch {
                            dao::raise_epoch_watermarks(tx, validator.id, epoch, epoch)?;
                        }
                    }
                    Ok(validators.len())
                })
            })
            .await?;
        info!(validators = updated, ?slot, ?epoch, "low watermarks updated");
        Ok(updated)
    }

    /// Current high watermark.
    pub async fn high_watermark(&self) -> Result<HighWatermark> {
        self.blocking(|store| store.transaction(|tx| dao::high_watermark(tx)))
            .await
    }

    /// Refuse signing at or above `high`.
    pub async fn set_high_watermark(&self, high: HighWatermark) -> Result<()> {
        if high.is_empty() {
            return Err(ProtectionError::invalid_argument(
                "a high watermark needs a slot or an epoch",
            ));
        }
        self.blocking(move |store| store.transaction(|tx| dao::set_high_watermark(tx, &high)))
            .await?;
        info!(slot = ?high.slot, epoch = ?high.epoch, "high watermark set");
        Ok(())
    }

    /// Remove the high watermark.
    pub async fn remove_high_watermark(&self) -> Result<()> {
        self.blocking(|store| {
            store.transaction(|tx| dao::set_high_watermark(tx, &HighWatermark::default()))
        })
        .await?;
        info!("high watermark removed");
        Ok(())
    }
}

#[async_trait]
impl SlashingProtection for DbSlashingProtection {
    async fn may_sign_block(
        &self,
        identifier: &SignerIdentifier,
        signing_root: Root,
        slot: Slot,
        genesis_validators_root: Root,
    ) -> Result<Decision> {
        let public_key = identifier.clone();
        let request = BlockRequest { slot, signing_root };
        let decision = self
            .blocking(move |store| {
                store.transaction(|tx| {
                    if !dao::check_genesis_validators_root(tx, &genesis_validators_root)? {
                        return Ok(Decision::Reject(Rejection::GenesisValidatorsRootMismatch));
                    }
                    let validator = dao::insert_validator_if_missing(tx, &public_key)?;
                    if !validator.enabled {
                        return Ok(Decision::Reject(Rejection::ValidatorDisabled));
                    }
                    let watermark = dao::low_watermark(tx, validator.id)?;
                    let high = dao::high_watermark(tx)?;
                    let existing = dao::find_block(tx, validator.id, slot)?;
                    let decision = decide_block(&watermark, &high, existing.as_ref(), &request);
                    if let Decision::Accept { record } = decision {
                        if record {
                            dao::insert_block(
                                tx,
                                validator.id,
                                &SignedBlock {
                                    slot,
                                    signing_root: Some(signing_root),
                                },
                            )?;
                        }
                        dao::raise_slot_watermark(tx, validator.id, slot)?;
                    }
                    Ok(decision)
                })
            })
            .await?;

        match decision {
            Decision::Accept { .. } => debug!(%identifier, slot, "block signing permitted"),
            Decision::Reject(reason) => {
                warn!(%identifier, slot, %reason, "block signing refused")
            }
        }
        Ok(decision)
    }

    async fn may_sign_attestation(
        &self,
        identifier: &SignerIdentifier,
        signing_root: Root,
        source_epoch: Epoch,
        target_epoch: Epoch,
        genesis_validators_root: Root,
    ) -> Result<Decision> {
        let public_key = identifier.clone();
        let request = AttestationRequest {
            source_epoch,
            target_epoch,
            signing_root,
        };
        let decision = self
            .blocking(move |store| {
                store.transaction(|tx| {
                    if !dao::check_genesis_validators_root(tx, &genesis_validators_root)? {
                        return Ok(Decision::Reject(Rejection::GenesisValidatorsRootMismatch));
                    }
                    let validator = dao::insert_validator_if_missing(tx, &public_key)?;
                    if !validator.enabled {
                        return Ok(Decision::Reject(Rejection::ValidatorDisabled));
                    }
                    let watermark = dao::low_watermark(tx, validator.id)?;
                    let high = dao::high_watermark(tx)?;
                    let history = if source_epoch > target_epoch {
                        Vec::new()
                    } else {
                        dao::find_attestation_conflicts(tx, validator.id, source_epoch, target_epoch)?
                    };
                    let decision = decide_attestation(&watermark, &high, &history, &request);
                    if let Decision::Accept { record } = decision {
                        if record {
                            dao::insert_attestation(
                                tx,
                                validator.id,
                                &SignedAttestation {
                                    source_epoch,
                                    target_epoch,
                                    signing_root: Some(signing_root),
                                },
                            )?;
                        }
                        dao::raise_epoch_watermarks(tx, validator.id, source_epoch, target_epoch)?;
                    }
                    Ok(decision)
                })
            })
            .await?;

        match decision {
            Decision::Accept { .. } => {
                debug!(%identifier, source_epoch, target_epoch, "attestation signing permitted")
            }
            Decision::Reject(reason) => {
                warn!(%identifier, source_epoch, target_epoch, %reason, "attestation signing refused")
            }
        }
        Ok(decision)
    }

    async fn register_validators(&self, identifiers: &[SignerIdentifier]) -> Result<()> {
        if identifiers.is_empty() {
            return Ok(());
        }
        let identifiers = identifiers.to_vec();
        let count = identifiers.len();
        self.blocking(move |store| {
            store.transaction(|tx| {
                for identifier in &identifiers {
                    dao::insert_validator_if_missing(tx, identifier)?;
                }
                Ok(())
            })
        })
        .await?;
        debug!(validators = count, "validators registered");
        Ok(())
    }

    async fn set_enabled(&self, identifier: &SignerIdentifier, enabled: bool) -> Result<bool> {
        let public_key = identifier.clone();
        let found = self
            .blocking(move |store| {
                store.transaction(|tx| dao::set_validator_enabled(tx, &public_key, enabled))
            })
            .await?;
        info!(%identifier, enabled, found, "validator state updated");
        Ok(found)
    }

    async fn export(&self, filter: Option<BTreeSet<SignerIdentifier>>) -> Result<Interchange> {
        self.blocking(move |store| {
            store.transaction(|tx| interchange::export(tx, filter.as_ref()))
        })
        .await
    }

    async fn import(&self, document: Interchange) -> Result<ImportSummary> {
        self.blocking(move |store| store.transaction(|tx| interchange::import(tx, &document)))
            .await
    }

    async fn is_healthy(&self) -> bool {
        match self.blocking(|store| store.ping()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("slashing protection database unavailable: {e}");
                false
            }
        }
    }
}
