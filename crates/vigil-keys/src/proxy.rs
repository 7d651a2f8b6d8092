//! Proxy keys delegated by a consensus key
//!
//! Proxy keystores live under
//! `{directory}/{0x consensus pubkey}/{BLS|SECP256K1}/*.json` and share one
//! password file. A consensus key without a directory simply has no proxies.
//! New proxies are generated into the same layout, so a reload finds them.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};
use vigil_core::{KeyType, SignerIdentifier};

use crate::error::{KeyError, Result};
use crate::factory::decrypt_keystore_file;
use crate::keystore::Keystore;
use crate::metadata::read_password_file;
use crate::signer::{generate_secret, signer_from_secret, ArtifactSigner};

/// pbkdf2 rounds of generated proxy keystores
pub const PROXY_KDF_ITERATIONS: u32 = 1 << 16;

/// Location of proxy keystores
#[derive(Debug, Clone)]
pub struct ProxyKeysConfig {
    /// Root directory of proxy keystores
    pub directory: PathBuf,
    /// Password file shared by all proxy keystores
    pub password_file: PathBuf,
}

impl ProxyKeysConfig {
    /// Directory holding proxies of `key_type` for `consensus`.
    pub fn key_directory(&self, consensus: &SignerIdentifier, key_type: KeyType) -> PathBuf {
        self.directory
            .join(consensus.to_prefixed())
            .join(key_type.as_str())
    }
}

/// Decrypt every proxy keystore of `consensus`. Returns the signers and the
/// number of files that failed. Blocking.
pub fn load_proxy_signers(
    config: &ProxyKeysConfig,
    consensus: &SignerIdentifier,
) -> (Vec<Arc<dyn ArtifactSigner>>, usize) {
    let mut signers = Vec::new();
    let mut errors = 0;
    for key_type in [KeyType::Bls, KeyType::Secp256k1] {
        let directory = config.key_directory(consensus, key_type);
        if !directory.is_dir() {
            continue;
        }
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(e) => {
                error!(directory = %directory.display(), "cannot list proxy keys: {e}");
                errors += 1;
                continue;
            }
        };
        for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
            if !is_keystore(&path) {
                continue;
            }
            match decrypt_keystore_file(&path, &config.password_file, key_type) {
                Ok(signer) => signers.push(signer),
                Err(e) => {
                    error!(path = %path.display(), "error loading proxy key: {e}");
                    errors += 1;
                }
            }
        }
    }
    debug!(%consensus, proxies = signers.len(), "proxy keys loaded");
    (signers, errors)
}

/// Create a random proxy key of `key_type` for `consensus` and persist it as
/// a keystore under the proxy layout, encrypted with the shared password.
/// Blocking.
pub fn generate_proxy_signer(
    config: &ProxyKeysConfig,
    consensus: &SignerIdentifier,
    key_type: KeyType,
    kdf_iterations: u32,
) -> Result<Arc<dyn ArtifactSigner>> {
    let password = read_password_file(&config.password_file)?;
    let secret = generate_secret(key_type)?;
    let signer = signer_from_secret(key_type, &secret[..])?;
    let keystore = Keystore::encrypt(
        &secret[..],
        &password,
        &signer.identifier().to_bytes(),
        kdf_iterations,
    )?;

    let directory = config.key_directory(consensus, key_type);
    std::fs::create_dir_all(&directory).map_err(|e| KeyError::io(&directory, e))?;
    let path = directory.join(format!("{}.json", signer.identifier().to_prefixed()));
    let json = keystore.to_json()?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| KeyError::io(&path, e))?;
    if let Err(e) = file.write_all(json.as_bytes()) {
        drop(file);
        let _ = std::fs::remove_file(&path);
        return Err(KeyError::io(&path, e));
    }

    info!(%consensus, proxy = %signer.identifier(), %key_type, "proxy key generated");
    Ok(signer)
}

fn is_keystore(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
