//! Metadata to signer conversion
//!
//! The one place that dispatches on [`SigningMetadata`]. Keystore decryption is
//! CPU bound and runs on the blocking pool; vault lookups are plain async I/O.

use std::path::Path;
use std::sync::Arc;

use vigil_core::{KeyType, SignerIdentifier};
use zeroize::Zeroizing;

use crate::error::{KeyError, Result};
use crate::keystore::Keystore;
use crate::metadata::{read_password_file, resolve, FileKeystoreMetadata, SigningMetadata};
use crate::signer::{signer_from_secret, ArtifactSigner};
use crate::vault::SecretProviders;

/// Builds signers from metadata documents
#[derive(Clone)]
pub struct SignerFactory {
    providers: SecretProviders,
}

impl SignerFactory {
    /// Factory using `providers` for vault-backed metadata.
    pub fn new(providers: SecretProviders) -> Self {
        Self { providers }
    }

    /// Create the signer described by `metadata`, resolving relative paths
    /// against `base_dir`.
    pub async fn create(
        &self,
        base_dir: &Path,
        metadata: SigningMetadata,
    ) -> Result<Arc<dyn ArtifactSigner>> {
        match metadata {
            SigningMetadata::FileRaw(raw) => {
                let secret = decode_secret(&raw.private_key)?;
                signer_from_secret(raw.key_type, &secret)
            }
            SigningMetadata::FileKeystore(keystore) => {
                let base_dir = base_dir.to_path_buf();
                tokio::task::spawn_blocking(move || load_keystore(&base_dir, &keystore))
                    .await
                    .map_err(|e| KeyError::keystore(format!("keystore task failed: {e}")))?
            }
            vault => {
                let secret = self.providers.fetch(&vault).await?;
                signer_from_secret(vault.key_type(), &decode_secret(&secret)?)
            }
        }
    }
}

fn decode_secret(hex_secret: &str) -> Result<Zeroizing<Vec<u8>>> {
    hex::decode(hex_secret.trim().trim_start_matches("0x"))
        .map(Zeroizing::new)
        .map_err(|e| KeyError::keystore(format!("secret is not hex: {e}")))
}

fn load_keystore(
    base_dir: &Path,
    metadata: &FileKeystoreMetadata,
) -> Result<Arc<dyn ArtifactSigner>> {
    let keystore_path = resolve(base_dir, &metadata.keystore_file);
    let password_path = resolve(base_dir, &metadata.keystore_password_file);
    decrypt_keystore_file(&keystore_path, &password_path, metadata.key_type)
}

/// Decrypt a keystore file with the password in `password_path`.
///
/// Blocking; call from the blocking pool.
pub fn decrypt_keystore_file(
    keystore_path: &Path,
    password_path: &Path,
    key_type: KeyType,
) -> Result<Arc<dyn ArtifactSigner>> {
    let password = read_password_file(password_path)?;
    let keystore = Keystore::from_file(keystore_path)?;
    signer_from_keystore(&keystore, &password, key_type)
}

/// Decrypt `keystore` and check the declared public key.
pub fn signer_from_keystore(
    keystore: &Keystore,
    password: &str,
    key_type: KeyType,
) -> Result<Arc<dyn ArtifactSigner>> {
    let secret = keystore.decrypt(password)?;
    let signer = signer_from_secret(key_type, &secret)?;
    if !keystore.pubkey.is_empty()
        && SignerIdentifier::normalize(&keystore.pubkey) != signer.identifier().as_str()
    {
        return Err(KeyError::keystore(format!(
            "keystore pubkey {} does not match its secret",
            keystore.pubkey
        )));
    }
    Ok(signer)
}
