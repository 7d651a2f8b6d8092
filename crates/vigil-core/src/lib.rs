//! Vigil Core - shared foundation for the remote signer
//!
//! Types and helpers that every other Vigil crate builds on. Nothing in here
//! touches key material or the slashing protection database.
//!
//! # Contents
//!
//! - [`SignerIdentifier`]: normalized public key identifier used at every boundary
//! - [`FixedBytes`], [`Root`], [`Version`]: hex-serialized byte arrays
//! - [`Fork`], [`ForkInfo`], [`DomainType`]: fork schedule and signing domains
//! - [`ssz`]: the subset of SSZ merkleization needed to compute signing roots
//! - [`VigilError`]: unified error type with constructor helpers
//! - [`TaskRegistry`]: owner of background tasks with cooperative shutdown

#![forbid(unsafe_code)]

/// Unified error handling
pub mod errors;

/// Signer identifiers and normalization
pub mod identifier;

/// Byte arrays, roots, forks and domains
pub mod types;

/// Quoted integer serde helpers
pub mod serde_utils;

/// SSZ hash tree root primitives
pub mod ssz;

/// Background task ownership
pub mod task_registry;

pub use errors::{Result, VigilError};
pub use identifier::SignerIdentifier;
pub use types::{
    DomainType, Epoch, FixedBytes, Fork, ForkInfo, HexBytes, KeyType, Root, Slot, Version,
};
pub use task_registry::TaskRegistry;
