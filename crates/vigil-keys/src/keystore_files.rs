//! On-disk keystores managed through the key manager API
//!
//! An imported key becomes three files in the key directory named after its
//! identifier: the keystore (`.json`), its password (`.password`) and the
//! metadata document (`.toml`) pointing at both. The metadata document is
//! written last so a concurrent load never sees a half-written key.
//!
//! All functions are blocking.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vigil_core::{KeyType, SignerIdentifier};

use crate::error::{KeyError, Result};
use crate::keystore::Keystore;
use crate::metadata::{resolve, FileKeystoreMetadata, SigningMetadata};

const METADATA_EXTENSION: &str = "toml";

/// Creates and deletes keystore-backed metadata files
#[derive(Debug, Clone)]
pub struct KeystoreFileManager {
    directory: PathBuf,
}

impl KeystoreFileManager {
    /// Manager for `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Persist a keystore and its password and register it with a metadata
    /// document. Returns the metadata path. On failure nothing is left behind.
    pub fn write_keystore(
        &self,
        identifier: &SignerIdentifier,
        keystore: &Keystore,
        password: &str,
        key_type: KeyType,
    ) -> Result<PathBuf> {
        let base = identifier.to_prefixed();
        let keystore_path = self.directory.join(format!("{base}.json"));
        let password_path = self.directory.join(format!("{base}.password"));
        let metadata_path = self.directory.join(format!("{base}.{METADATA_EXTENSION}"));

        let metadata = SigningMetadata::FileKeystore(FileKeystoreMetadata {
            keystore_file: PathBuf::from(format!("{base}.json")),
            keystore_password_file: PathBuf::from(format!("{base}.password")),
            key_type,
        });

        let mut created = Vec::new();
        let result = (|| {
            write_new(&keystore_path, keystore.to_json()?.as_bytes(), &mut created)?;
            write_new(&password_path, password.as_bytes(), &mut created)?;
            write_new(&metadata_path, metadata.to_toml()?.as_bytes(), &mut created)
        })();

        if let Err(e) = result {
            for path in created {
                if let Err(cleanup) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), "cleanup after failed import failed: {cleanup}");
                }
            }
            return Err(e);
        }
        debug!(path = %metadata_path.display(), "keystore files written");
        Ok(metadata_path)
    }

    /// Delete the metadata, keystore and password files of `identifier`.
    /// Returns whether any metadata referenced the key.
    pub fn delete_keystore(&self, identifier: &SignerIdentifier) -> Result<bool> {
        let entries = std::fs::read_dir(&self.directory)
            .map_err(|e| KeyError::io(&self.directory, e))?;
        let mut found = false;

        for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
            let is_metadata = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(METADATA_EXTENSION));
            if !is_metadata {
                continue;
            }
            let Some(keystore_metadata) = read_keystore_metadata(&path) else {
                continue;
            };
            let keystore_path = resolve(&self.directory, &keystore_metadata.keystore_file);
            let matches = Keystore::from_file(&keystore_path)
                .map(|ks| SignerIdentifier::normalize(&ks.pubkey) == identifier.as_str())
                .unwrap_or(false);
            if !matches {
                continue;
            }

            found = true;
            let password_path =
                resolve(&self.directory, &keystore_metadata.keystore_password_file);
            for file in [&path, &keystore_path, &password_path] {
                match std::fs::remove_file(file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(KeyError::io(file.as_path(), e)),
                }
            }
            debug!(%identifier, path = %path.display(), "keystore files deleted");
        }
        Ok(found)
    }
}

fn read_keystore_metadata(path: &Path) -> Option<FileKeystoreMetadata> {
    let text = std::fs::read_to_string(path).ok()?;
    match SigningMetadata::from_toml(path, &text).ok()? {
        SigningMetadata::FileKeystore(metadata) => Some(metadata),
        _ => None,
    }
}

fn write_new(path: &Path, contents: &[u8], created: &mut Vec<PathBuf>) -> Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| KeyError::io(path, e))?;
    created.push(path.to_path_buf());
    file.write_all(contents).map_err(|e| KeyError::io(path, e))
}
