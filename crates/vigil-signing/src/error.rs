//! Signing errors
//!
//! A slashing protection refusal is its own variant so callers can tell a
//! deliberate refusal apart from a failure. An unreachable protection store is
//! never turned into a signature.

use thiserror::Error;
use vigil_core::{Root, VigilError};
use vigil_keys::KeyError;
use vigil_protection::{ProtectionError, Rejection};

/// Errors raised by the signing orchestrator and the flows built on it
#[derive(Debug, Error)]
pub enum SigningError {
    /// Identifier is empty or not hex
    #[error("invalid signer identifier: {message}")]
    InvalidIdentifier {
        /// Description
        message: String,
    },

    /// Request is malformed or inconsistent
    #[error("invalid signing request: {message}")]
    InvalidRequest {
        /// Description
        message: String,
    },

    /// Request carried a signing root other than the computed one
    #[error("signing root {supplied} does not match computed root {computed}")]
    SigningRootMismatch {
        /// Root sent by the client
        supplied: Root,
        /// Root computed from the payload
        computed: Root,
    },

    /// No signer is loaded for the identifier
    #[error("no signer for identifier {identifier}")]
    NoSuchKey {
        /// Identifier as requested
        identifier: String,
    },

    /// Slashing protection refused the request
    #[error("slashing protection refused to sign: {0}")]
    ProtectionEnforced(Rejection),

    /// Slashing protection could not decide
    #[error("slashing protection failed: {0}")]
    Protection(#[from] ProtectionError),

    /// The signer itself failed
    #[error("signer failed: {0}")]
    Signer(#[from] KeyError),

    /// Blocking task panicked or was cancelled
    #[error("signing task failed: {message}")]
    Task {
        /// Description
        message: String,
    },
}

impl SigningError {
    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether the client can fix the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. }
                | Self::InvalidRequest { .. }
                | Self::SigningRootMismatch { .. }
        )
    }
}

impl From<VigilError> for SigningError {
    fn from(err: VigilError) -> Self {
        Self::invalid_request(err.to_string())
    }
}

/// Standard Result type for signing operations
pub type Result<T> = std::result::Result<T, SigningError>;
