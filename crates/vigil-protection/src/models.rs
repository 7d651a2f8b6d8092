//! Rows of the protection database

use vigil_core::{Epoch, Root, SignerIdentifier, Slot};

/// A validator known to the protection store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    /// Row id
    pub id: i64,
    /// Public key
    pub public_key: SignerIdentifier,
    /// Disabled validators are refused every slashable signature
    pub enabled: bool,
}

/// Lowest values a validator may still sign; `None` means unconstrained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigningWatermark {
    /// Lowest block slot
    pub slot: Option<Slot>,
    /// Lowest attestation source epoch
    pub source_epoch: Option<Epoch>,
    /// Lowest attestation target epoch
    pub target_epoch: Option<Epoch>,
}

/// Deployment-wide ceiling set during watermark repair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HighWatermark {
    /// Blocks at or above this slot are refused
    pub slot: Option<Slot>,
    /// Attestations with source or target at or above this epoch are refused
    pub epoch: Option<Epoch>,
}

impl HighWatermark {
    /// Whether no ceiling is configured.
    pub fn is_empty(&self) -> bool {
        self.slot.is_none() && self.epoch.is_none()
    }
}

/// A block signature on record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedBlock {
    /// Block slot
    pub slot: Slot,
    /// Absent for imported records without a root
    pub signing_root: Option<Root>,
}

/// An attestation signature on record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedAttestation {
    /// Source checkpoint epoch
    pub source_epoch: Epoch,
    /// Target checkpoint epoch
    pub target_epoch: Epoch,
    /// Absent for imported records without a root
    pub signing_root: Option<Root>,
}
