//! Signing orchestrator
//!
//! One request runs in a fixed order: normalize the identifier, compute the
//! signing root, compare it with any root the client sent, find the signer,
//! consult slashing protection for blocks and attestations, then sign. Every
//! step can stop the request; nothing is signed after a failed step.

use std::sync::Arc;

use tracing::{debug, warn};
use vigil_core::{Root, SignerIdentifier};
use vigil_keys::SignerRegistry;
use vigil_protection::{Decision, SlashingProtection};

use crate::artifact::{Artifact, SignatureEncoding, SignatureResponse, SigningRequest};
use crate::error::{Result, SigningError};
use crate::signing_root::SigningRootCalculator;

/// Stateless coordinator of signing requests
#[derive(Clone)]
pub struct SigningOrchestrator {
    registry: SignerRegistry,
    protection: Option<Arc<dyn SlashingProtection>>,
    roots: SigningRootCalculator,
}

impl SigningOrchestrator {
    /// Orchestrator over `registry`. Without `protection` no request is
    /// checked for slashability.
    pub fn new(
        registry: SignerRegistry,
        protection: Option<Arc<dyn SlashingProtection>>,
        roots: SigningRootCalculator,
    ) -> Self {
        Self {
            registry,
            protection,
            roots,
        }
    }

    /// Registry the orchestrator signs with.
    pub fn registry(&self) -> &SignerRegistry {
        &self.registry
    }

    /// Sign `request` with the key named by `identifier`.
    pub async fn sign(
        &self,
        identifier: &str,
        request: &SigningRequest,
        encoding: SignatureEncoding,
    ) -> Result<SignatureResponse> {
        let identifier =
            SignerIdentifier::parse(identifier).map_err(|e| SigningError::InvalidIdentifier {
                message: e.to_string(),
            })?;
        let kind = request.artifact.kind();

        let signing_root = self.roots.signing_root(&request.artifact)?;
        if let Some(supplied) = request.signing_root {
            if supplied != signing_root {
                warn!(%identifier, kind, %supplied, computed = %signing_root, "signing root mismatch");
                return Err(SigningError::SigningRootMismatch {
                    supplied,
                    computed: signing_root,
                });
            }
        }

        let signer = self
            .registry
            .get_signer(identifier.as_str())
            .ok_or_else(|| SigningError::NoSuchKey {
                identifier: identifier.to_prefixed(),
            })?;

        if let Some(protection) = &self.protection {
            self.check_protection(protection.as_ref(), &identifier, &request.artifact, signing_root)
                .await?;
        }

        let signature = signer.sign(signing_root.as_bytes()).await?;
        debug!(%identifier, kind, %signing_root, "artifact signed");
        Ok(SignatureResponse {
            signature: match encoding {
                SignatureEncoding::Hex => signature.to_hex(),
                SignatureEncoding::Base64 => signature.to_base64(),
            },
        })
    }

    async fn check_protection(
        &self,
        protection: &dyn SlashingProtection,
        identifier: &SignerIdentifier,
        artifact: &Artifact,
        signing_root: Root,
    ) -> Result<()> {
        let decision = match artifact {
            Artifact::Block { fork_info, block } => {
                protection
                    .may_sign_block(
                        identifier,
                        signing_root,
                        block.slot,
                        fork_info.genesis_validators_root,
                    )
                    .await?
            }
            Artifact::BlockV2 {
                fork_info,
                beacon_block,
            } => {
                protection
                    .may_sign_block(
                        identifier,
                        signing_root,
                        beacon_block.block_header.slot,
                        fork_info.genesis_validators_root,
                    )
                    .await?
            }
            Artifact::Attestation {
                fork_info,
                attestation,
            } => {
                protection
                    .may_sign_attestation(
                        identifier,
                        signing_root,
                        attestation.source.epoch,
                        attestation.target.epoch,
                        fork_info.genesis_validators_root,
                    )
                    .await?
            }
            _ => return Ok(()),
        };

        match decision {
            Decision::Accept { .. } => Ok(()),
            Decision::Reject(rejection) => Err(SigningError::ProtectionEnforced(rejection)),
        }
    }
}
