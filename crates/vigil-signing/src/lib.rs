//! Vigil Signing - turns signing requests into signatures
//!
//! The [`SigningOrchestrator`] computes the signing root of a request,
//! consults slashing protection for blocks and attestations and signs with a
//! key from the registry. [`CommitBoostSigner`] and [`KeyManager`] build the
//! commit-boost and key manager flows on the same pieces.

#![forbid(unsafe_code)]

/// Signing request bodies
pub mod artifact;

/// Commit-boost signing
pub mod commit_boost;

/// Consensus containers and their roots
pub mod containers;

/// Signing errors
pub mod error;

/// Key manager import and delete
pub mod keymanager;

/// Registry listener feeding the protection store
pub mod listener;

/// Request orchestration
pub mod orchestrator;

/// Signing root rules
pub mod signing_root;

pub use artifact::{Artifact, SignatureEncoding, SignatureResponse, SigningRequest};
pub use commit_boost::{
    CommitBoostSignRequest, CommitBoostSigner, GenerateProxyKeyRequest, ProxyDelegation,
    ProxyScheme, PublicKeysResponse, SignedProxyDelegation,
};
pub use error::{Result, SigningError};
pub use keymanager::{
    DeleteKeystoresRequest, DeleteKeystoresResponse, ImportKeystoresRequest,
    ImportKeystoresResponse, KeyManager, ListKeystoresResponse,
};
pub use listener::ProtectionRegistrar;
pub use orchestrator::SigningOrchestrator;
pub use signing_root::SigningRootCalculator;
