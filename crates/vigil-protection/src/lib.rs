//! Vigil Protection - slashing protection for the remote signer
//!
//! Decides whether a block proposal or attestation may be signed without
//! risking a slashable offence, and remembers every signature it permitted.
//!
//! The rules live in [`decision`] as pure functions. [`engine`] applies them
//! against the SQLite [`store`] with one transaction per decision. [`pruner`]
//! trims old history and [`interchange`] moves history between signers in the
//! EIP-3076 format.

#![forbid(unsafe_code)]

mod dao;

/// Conflict rules
pub mod decision;

/// Slashing protection engine
pub mod engine;

/// Protection errors
pub mod error;

/// EIP-3076 interchange
pub mod interchange;

/// Database rows
pub mod models;

/// History pruning
pub mod pruner;

/// SQLite store
pub mod store;

pub use decision::{Decision, Rejection};
pub use engine::{DbSlashingProtection, SlashingProtection};
pub use error::{ProtectionError, Result};
pub use interchange::{ImportSummary, Interchange};
pub use models::HighWatermark;
pub use pruner::{PruneReport, Pruner, PruningConfig};
pub use store::{StoreConfig, DATABASE_VERSION};
