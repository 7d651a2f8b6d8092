//! Slashing protection errors
//!
//! These are store and input failures. A refusal to sign is not an error; it is
//! a [`crate::Decision::Reject`].

use std::path::PathBuf;

use thiserror::Error;
use vigil_core::{Root, VigilError};

/// Errors raised by the protection store
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// SQLite failure
    #[error("slashing protection database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schema version on disk differs from the one this build understands
    #[error("slashing protection database version {found} is not supported, expected {expected}")]
    VersionMismatch {
        /// Version this build writes
        expected: i64,
        /// Version found on disk
        found: i64,
    },

    /// The genesis validators root is written once and never replaced
    #[error("genesis validators root is already set to {existing}")]
    GenesisRootAlreadySet {
        /// Stored root
        existing: Root,
    },

    /// Supplied genesis validators root differs from the stored one
    #[error("genesis validators root {supplied} does not match {existing}")]
    GenesisRootMismatch {
        /// Stored root
        existing: Root,
        /// Root in the request or interchange file
        supplied: Root,
    },

    /// Nothing has been signed yet, so there is no chain to export for
    #[error("no genesis validators root is stored yet")]
    MissingGenesisRoot,

    /// Malformed or unsupported interchange document
    #[error("invalid interchange data: {message}")]
    Interchange {
        /// Description
        message: String,
    },

    /// Invalid argument to a maintenance operation
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description
        message: String,
    },

    /// The database stayed busy through every retry
    #[error("database busy after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
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

    /// Blocking task panicked or was cancelled
    #[error("protection task failed: {message}")]
    Task {
        /// Description
        message: String,
    },
}

impl ProtectionError {
    /// Create an interchange error
    pub fn interchange(message: impl Into<String>) -> Self {
        Self::Interchange {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether the caller supplied bad data, as opposed to a store failure.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Interchange { .. }
                | Self::InvalidArgument { .. }
                | Self::GenesisRootMismatch { .. }
                | Self::GenesisRootAlreadySet { .. }
        )
    }

    /// Whether the error is SQLite reporting a busy or locked database.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Database(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

impl From<serde_json::Error> for ProtectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::interchange(err.to_string())
    }
}

impl From<ProtectionError> for VigilError {
    fn from(err: ProtectionError) -> Self {
        if err.is_input_error() {
            return VigilError::invalid(err.to_string());
        }
        match err {
            ProtectionError::Task { .. } => VigilError::internal(err.to_string()),
            _ => VigilError::storage(err.to_string()),
        }
    }
}

/// Result alias for protection operations
pub type Result<T> = std::result::Result<T, ProtectionError>;
