//! Signing metadata documents
//!
//! Each key is described by one TOML document in the key directory. The `type`
//! field selects the backend; the remaining fields are backend specific and use
//! camelCase names:
//!
//! ```toml
//! type = "file-keystore"
//! keystoreFile = "validator_1.json"
//! keystorePasswordFile = "validator_1.password"
//! keyType = "BLS"
//! ```
//!
//! Relative paths are resolved against the directory holding the document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vigil_core::KeyType;
use zeroize::Zeroizing;

use crate::error::{KeyError, Result};

/// One key source, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SigningMetadata {
    /// Unencrypted secret inline
    FileRaw(FileRawMetadata),
    /// EIP-2335 keystore plus password file
    FileKeystore(FileKeystoreMetadata),
    /// HashiCorp Vault KV v2 secret
    Hashicorp(HashicorpMetadata),
    /// Azure Key Vault secret
    AzureSecret(AzureSecretMetadata),
    /// AWS Secrets Manager secret
    AwsSecret(AwsSecretMetadata),
    /// GCP Secret Manager secret
    GcpSecret(GcpSecretMetadata),
}

/// `file-raw`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRawMetadata {
    /// Hex secret
    pub private_key: String,
    /// Key scheme
    #[serde(default)]
    pub key_type: KeyType,
}

impl std::fmt::Debug for FileRawMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRawMetadata")
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

/// `file-keystore`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileKeystoreMetadata {
    /// Keystore JSON file
    pub keystore_file: PathBuf,
    /// File whose first line is the password
    pub keystore_password_file: PathBuf,
    /// Key scheme
    #[serde(default)]
    pub key_type: KeyType,
}

/// `hashicorp`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashicorpMetadata {
    /// Vault host name
    pub server_host: String,
    /// Vault port
    #[serde(default = "default_hashicorp_port")]
    pub server_port: u16,
    /// Use https
    #[serde(default)]
    pub tls_enabled: bool,
    /// KV v2 path, e.g. `/v1/secret/data/validator`
    pub key_path: String,
    /// Field within the secret holding the hex key
    #[serde(default = "default_hashicorp_key_name")]
    pub key_name: String,
    /// Vault token
    pub token: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_hashicorp_timeout_ms")]
    pub timeout: u64,
    /// Key scheme
    #[serde(default)]
    pub key_type: KeyType,
}

fn default_hashicorp_port() -> u16 {
    8200
}

fn default_hashicorp_key_name() -> String {
    "value".to_string()
}

fn default_hashicorp_timeout_ms() -> u64 {
    10_000
}

/// `azure-secret`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSecretMetadata {
    /// Key vault name
    pub vault_name: String,
    /// Secret name
    pub secret_name: String,
    /// Application client id
    #[serde(default)]
    pub client_id: Option<String>,
    /// Application client secret
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Directory tenant id
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Key scheme
    #[serde(default)]
    pub key_type: KeyType,
}

/// `aws-secret`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSecretMetadata {
    /// AWS region
    pub region: String,
    /// Secret name
    pub secret_name: String,
    /// `SPECIFIED` or `ENVIRONMENT`
    #[serde(default)]
    pub authentication_mode: Option<String>,
    /// Access key id for `SPECIFIED` mode
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key for `SPECIFIED` mode
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Key scheme
    #[serde(default)]
    pub key_type: KeyType,
}

/// `gcp-secret`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpSecretMetadata {
    /// Project id
    pub project_id: String,
    /// Secret name
    pub secret_name: String,
    /// Key scheme
    #[serde(default)]
    pub key_type: KeyType,
}

impl SigningMetadata {
    /// Parse a TOML document.
    pub fn from_toml(path: &Path, text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| KeyError::Metadata {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| KeyError::Metadata {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Backend name as written in `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileRaw(_) => "file-raw",
            Self::FileKeystore(_) => "file-keystore",
            Self::Hashicorp(_) => "hashicorp",
            Self::AzureSecret(_) => "azure-secret",
            Self::AwsSecret(_) => "aws-secret",
            Self::GcpSecret(_) => "gcp-secret",
        }
    }

    /// Scheme of the described key.
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::FileRaw(m) => m.key_type,
            Self::FileKeystore(m) => m.key_type,
            Self::Hashicorp(m) => m.key_type,
            Self::AzureSecret(m) => m.key_type,
            Self::AwsSecret(m) => m.key_type,
            Self::GcpSecret(m) => m.key_type,
        }
    }
}

/// Resolve `path` against `base` unless it is absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Read the first line of a password file; it must not be empty.
pub fn read_password_file(path: &Path) -> Result<Zeroizing<String>> {
    let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
        KeyError::PasswordFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?);
    let first_line = contents.lines().next().unwrap_or_default();
    if first_line.is_empty() {
        return Err(KeyError::PasswordFile {
            path: path.to_path_buf(),
            message: "password file is empty".to_string(),
        });
    }
    Ok(Zeroizing::new(first_line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_keystore_metadata() {
        let text = r#"
            type = "file-keystore"
            keystoreFile = "key.json"
            keystorePasswordFile = "key.password"
        "#;
        let metadata = SigningMetadata::from_toml(Path::new("k.toml"), text).unwrap();
        assert_matches!(
            &metadata,
            SigningMetadata::FileKeystore(m) if m.keystore_file == Path::new("key.json") && m.key_type == KeyType::Bls
        );
        assert_eq!(metadata.kind(), "file-keystore");
    }

    #[test]
    fn hashicorp_defaults() {
        let text = r#"
            type = "hashicorp"
            serverHost = "vault.local"
            keyPath = "/v1/secret/data/key"
            token = "t"
            keyType = "SECP256K1"
        "#;
        let metadata = SigningMetadata::from_toml(Path::new("h.toml"), text).unwrap();
        let SigningMetadata::Hashicorp(m) = metadata else {
            panic!("expected hashicorp metadata");
        };
        assert_eq!(m.server_port, 8200);
        assert_eq!(m.key_name, "value");
        assert!(!m.tls_enabled);
        assert_eq!(m.key_type, KeyType::Secp256k1);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let text = r#"type = "yubihsm""#;
        assert_matches!(
            SigningMetadata::from_toml(Path::new("y.toml"), text),
            Err(KeyError::Metadata { .. })
        );
    }

    #[test]
    fn raw_metadata_debug_hides_secret() {
        let metadata = FileRawMetadata {
            private_key: "deadbeef".to_string(),
            key_type: KeyType::Bls,
        };
        assert!(!format!("{metadata:?}").contains("deadbeef"));
    }

    #[test]
    fn password_file_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pw");
        std::fs::write(&path, "secret\nignored\n").unwrap();
        assert_eq!(read_password_file(&path).unwrap().as_str(), "secret");

        std::fs::write(&path, "\nsecret").unwrap();
        assert_matches!(read_password_file(&path), Err(KeyError::PasswordFile { .. }));
    }

    #[test]
    fn metadata_toml_round_trip() {
        let metadata = SigningMetadata::FileKeystore(FileKeystoreMetadata {
            keystore_file: PathBuf::from("a.json"),
            keystore_password_file: PathBuf::from("a.password"),
            key_type: KeyType::Bls,
        });
        let text = metadata.to_toml().unwrap();
        assert_eq!(SigningMetadata::from_toml(Path::new("a.toml"), &text).unwrap(), metadata);
    }
}
