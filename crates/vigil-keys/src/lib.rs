//! Vigil Keys - key material and the signer registry
//!
//! Everything between a metadata document on disk and a ready-to-use signing
//! capability lives here.
//!
//! # Layers
//!
//! - [`signer`]: [`ArtifactSigner`] implementations for BLS12-381 and secp256k1
//! - [`keystore`]: EIP-2335 keystore decryption and encryption
//! - [`metadata`] and [`vault`]: metadata documents and remote secret providers
//! - [`factory`]: metadata to signer conversion
//! - [`loader`]: parallel, cached bulk loading of a key directory
//! - [`registry`]: the hot-reloadable [`SignerRegistry`]
//! - [`proxy`]: proxy keys delegated by consensus keys
//! - [`keystore_files`]: on-disk keystores created and removed at runtime

#![forbid(unsafe_code)]

/// Key material errors
pub mod error;

/// EIP-2335 keystores
pub mod keystore;

/// On-disk keystore management
pub mod keystore_files;

/// Metadata to signer conversion
pub mod factory;

/// Bulk loading of metadata files
pub mod loader;

/// Signing metadata documents
pub mod metadata;

/// Proxy keys
pub mod proxy;

/// Signer registry
pub mod registry;

/// Signing capabilities
pub mod signer;

/// Remote secret providers
pub mod vault;

pub use error::{KeyError, Result};
pub use factory::SignerFactory;
pub use keystore::Keystore;
pub use keystore_files::KeystoreFileManager;
pub use loader::{LoaderConfig, SignerLoader};
pub use metadata::SigningMetadata;
pub use proxy::{generate_proxy_signer, ProxyKeysConfig, PROXY_KDF_ITERATIONS};
pub use registry::{LoadReport, RegistryListener, SignerRegistry};
pub use signer::{
    generate_secret, signer_from_secret, ArtifactSigner, BlsArtifactSigner,
    Secp256k1ArtifactSigner, Signature,
};
pub use vault::{SecretProvider, SecretProviders};
