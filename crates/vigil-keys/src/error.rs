//! Key material errors
//!
//! Every failure is scoped to one source (a metadata file, a keystore, a vault
//! entry). The loader counts them; nothing here aborts a bulk load.

use std::path::PathBuf;

use thiserror::Error;
use vigil_core::VigilError;

/// Errors raised while obtaining or using key material
#[derive(Debug, Error)]
pub enum KeyError {
    /// Metadata document could not be parsed
    #[error("invalid signing metadata in {path}: {message}")]
    Metadata {
        /// Source file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// File could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Password file missing, unreadable or empty
    #[error("invalid password file {path}: {message}")]
    PasswordFile {
        /// Password file path
        path: PathBuf,
        /// What was wrong with it
        message: String,
    },

    /// Keystore document is malformed or uses unsupported modules
    #[error("invalid keystore: {message}")]
    Keystore {
        /// Description
        message: String,
    },

    /// Derived key does not match the keystore checksum (wrong password)
    #[error("keystore checksum mismatch, password is probably wrong")]
    ChecksumMismatch,

    /// Secret bytes do not form a valid key
    #[error("invalid {key_type} key material: {message}")]
    KeyMaterial {
        /// Scheme the bytes were meant for
        key_type: vigil_core::KeyType,
        /// Description
        message: String,
    },

    /// Remote vault request failed
    #[error("vault request failed: {message}")]
    Vault {
        /// Description
        message: String,
    },

    /// No provider is configured for a vault kind
    #[error("no secret provider configured for {kind}")]
    MissingProvider {
        /// Vault kind name as used in metadata
        kind: String,
    },

    /// Decoding a source took longer than the configured limit
    #[error("timed out loading {path}")]
    Timeout {
        /// Source file
        path: PathBuf,
    },

    /// Key directory could not be listed
    #[error("cannot list key directory {path}: {source}")]
    DirectoryUnreadable {
        /// Directory
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Signing primitive failed
    #[error("signing failed: {message}")]
    Signing {
        /// Description
        message: String,
    },

    /// Registry writer is gone
    #[error("signer registry is shut down")]
    RegistryClosed,
}

impl KeyError {
    /// Create a keystore error
    pub fn keystore(message: impl Into<String>) -> Self {
        Self::Keystore {
            message: message.into(),
        }
    }

    /// Create a vault error
    pub fn vault(message: impl Into<String>) -> Self {
        Self::Vault {
            message: message.into(),
        }
    }

    /// Create a signing error
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Create an I/O error for `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<KeyError> for VigilError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Io { .. } | KeyError::DirectoryUnreadable { .. } => {
                VigilError::storage(err.to_string())
            }
            KeyError::ChecksumMismatch
            | KeyError::KeyMaterial { .. }
            | KeyError::Signing { .. } => VigilError::crypto(err.to_string()),
            KeyError::RegistryClosed => VigilError::internal(err.to_string()),
            _ => VigilError::invalid(err.to_string()),
        }
    }
}

/// Result alias for key operations
pub type Result<T> = std::result::Result<T, KeyError>;
