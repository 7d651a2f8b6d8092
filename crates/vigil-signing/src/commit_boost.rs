//! Commit-boost signing
//!
//! Consensus keys and their delegated proxy keys sign object roots under the
//! commit-boost domain. The domain is fixed for a network: genesis fork
//! version and a zero genesis validators root.
//!
//! New proxy keys are generated on request when a proxy keystore directory is
//! configured. The consensus key signs the delegation so the caller can prove
//! the proxy speaks for it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vigil_core::ssz::{compute_domain, compute_signing_root, container_root, fixed_bytes_root};
use vigil_core::{DomainType, KeyType, Root, SignerIdentifier, Version};
use vigil_keys::{generate_proxy_signer, ProxyKeysConfig, SignerRegistry, PROXY_KDF_ITERATIONS};

use crate::error::{Result, SigningError};

/// Which key a commit-boost request signs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitBoostKeyKind {
    /// The consensus key itself
    Consensus,
    /// A BLS proxy key
    ProxyBls,
    /// A secp256k1 proxy key
    ProxyEcdsa,
}

/// Body of `request_signature`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBoostSignRequest {
    /// Key kind
    #[serde(rename = "type")]
    pub kind: CommitBoostKeyKind,
    /// Public key of the signing key
    #[serde(alias = "proxy")]
    pub pubkey: String,
    /// Root of the object to sign
    pub object_root: Root,
}

/// A consensus key with its proxies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyMapping {
    /// Consensus public key
    pub consensus: String,
    /// BLS proxy keys
    pub proxy_bls: Vec<String>,
    /// secp256k1 proxy keys
    pub proxy_ecdsa: Vec<String>,
}

/// Body of `get_pubkeys`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeysResponse {
    /// One entry per consensus key
    pub keys: Vec<PublicKeyMapping>,
}

/// Signature scheme of a generated proxy key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    /// BLS12-381
    #[serde(alias = "BLS")]
    Bls,
    /// secp256k1
    #[serde(alias = "ECDSA")]
    Ecdsa,
}

impl ProxyScheme {
    fn key_type(self) -> KeyType {
        match self {
            Self::Bls => KeyType::Bls,
            Self::Ecdsa => KeyType::Secp256k1,
        }
    }
}

/// Body of `generate_proxy_key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateProxyKeyRequest {
    /// Consensus public key delegating to the new proxy
    pub pubkey: String,
    /// Scheme of the new proxy key
    pub scheme: ProxyScheme,
}

/// Delegation from a consensus key to a proxy key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDelegation {
    /// Consensus public key
    pub delegator: SignerIdentifier,
    /// Proxy public key
    pub proxy: SignerIdentifier,
}

impl ProxyDelegation {
    /// Hash tree root: both keys are fixed-size byte vectors.
    pub fn tree_hash_root(&self) -> Root {
        container_root(&[
            fixed_bytes_root(&self.delegator.to_bytes()),
            fixed_bytes_root(&self.proxy.to_bytes()),
        ])
    }
}

/// Response of `generate_proxy_key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProxyDelegation {
    /// The delegation
    pub message: ProxyDelegation,
    /// Consensus key signature over the delegation
    pub signature: String,
}

/// Signs commit-boost requests with registry keys
#[derive(Clone)]
pub struct CommitBoostSigner {
    registry: SignerRegistry,
    domain: Root,
    proxy_keys: Option<ProxyKeysConfig>,
    kdf_iterations: u32,
}

impl CommitBoostSigner {
    /// Signer for the network with `genesis_fork_version`.
    pub fn new(registry: SignerRegistry, genesis_fork_version: Version) -> Self {
        Self {
            registry,
            domain: compute_domain(DomainType::COMMIT_BOOST, genesis_fork_version, Root::ZERO),
            proxy_keys: None,
            kdf_iterations: PROXY_KDF_ITERATIONS,
        }
    }

    /// Enable proxy generation into `config`.
    pub fn with_proxy_keys(mut self, config: ProxyKeysConfig) -> Self {
        self.proxy_keys = Some(config);
        self
    }

    /// pbkdf2 rounds used for generated proxy keystores.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Whether proxy keys can be generated.
    pub fn generates_proxies(&self) -> bool {
        self.proxy_keys.is_some()
    }

    /// Commit-boost domain.
    pub fn domain(&self) -> Root {
        self.domain
    }

    /// Root actually signed for `object_root`.
    pub fn signing_root(&self, object_root: Root) -> Root {
        compute_signing_root(object_root, self.domain)
    }

    /// Every consensus key and its proxy keys.
    pub fn public_keys(&self) -> PublicKeysResponse {
        let keys = self
            .registry
            .available_identifiers()
            .into_iter()
            .map(|consensus| {
                let mut proxies = self.registry.get_proxy_identifiers(&consensus);
                let prefixed = |ids: Option<Vec<SignerIdentifier>>| -> Vec<String> {
                    ids.unwrap_or_default()
                        .iter()
                        .map(SignerIdentifier::to_prefixed)
                        .collect()
                };
                PublicKeyMapping {
                    consensus: consensus.to_prefixed(),
                    proxy_bls: prefixed(proxies.remove(&KeyType::Bls)),
                    proxy_ecdsa: prefixed(proxies.remove(&KeyType::Secp256k1)),
                }
            })
            .collect();
        PublicKeysResponse { keys }
    }

    /// Sign `request.object_root`; returns the hex signature.
    pub async fn sign(&self, request: &CommitBoostSignRequest) -> Result<String> {
        let identifier = SignerIdentifier::parse(&request.pubkey).map_err(|e| {
            SigningError::InvalidIdentifier {
                message: e.to_string(),
            }
        })?;
        let no_such_key = || SigningError::NoSuchKey {
            identifier: identifier.to_prefixed(),
        };

        let signer = match request.kind {
            CommitBoostKeyKind::Consensus => self.registry.get_signer(identifier.as_str()),
            CommitBoostKeyKind::ProxyBls => self
                .registry
                .get_proxy_signer(identifier.as_str())
                .filter(|signer| signer.key_type() == KeyType::Bls),
            CommitBoostKeyKind::ProxyEcdsa => self
                .registry
                .get_proxy_signer(identifier.as_str())
                .filter(|signer| signer.key_type() == KeyType::Secp256k1),
        }
        .ok_or_else(no_such_key)?;

        let signing_root = self.signing_root(request.object_root);
        let signature = signer.sign(signing_root.as_bytes()).await?;
        debug!(%identifier, kind = ?request.kind, "commit-boost request signed");
        Ok(signature.to_hex())
    }

    /// Generate a proxy key for a loaded consensus key, persist it, install it
    /// and return the delegation signed by the consensus key.
    pub async fn generate_proxy_key(
        &self,
        request: &GenerateProxyKeyRequest,
    ) -> Result<SignedProxyDelegation> {
        let Some(config) = self.proxy_keys.clone() else {
            return Err(SigningError::invalid_request(
                "proxy key generation is not configured",
            ));
        };
        let delegator = SignerIdentifier::parse(&request.pubkey).map_err(|e| {
            SigningError::InvalidIdentifier {
                message: e.to_string(),
            }
        })?;
        let consensus = self
            .registry
            .get_signer(delegator.as_str())
            .ok_or_else(|| SigningError::NoSuchKey {
                identifier: delegator.to_prefixed(),
            })?;

        let key_type = request.scheme.key_type();
        let iterations = self.kdf_iterations;
        let owner = delegator.clone();
        let proxy = tokio::task::spawn_blocking(move || {
            generate_proxy_signer(&config, &owner, key_type, iterations)
        })
        .await
        .map_err(|e| SigningError::Task {
            message: e.to_string(),
        })??;
        self.registry
            .add_proxy_signer(&delegator, proxy.clone())
            .await?;

        let message = ProxyDelegation {
            delegator,
            proxy: proxy.identifier().clone(),
        };
        let signing_root = self.signing_root(message.tree_hash_root());
        let signature = consensus.sign(signing_root.as_bytes()).await?;
        info!(
            delegator = %message.delegator,
            proxy = %message.proxy,
            scheme = ?request.scheme,
            "proxy key delegated"
        );
        Ok(SignedProxyDelegation {
            message,
            signature: signature.to_hex(),
        })
    }
}
