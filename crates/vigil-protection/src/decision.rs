//! Conflict rules for slashable messages
//!
//! Pure functions over the state the store hands in. The store is responsible
//! for reading that state and applying the outcome inside one transaction.

use std::fmt;

use vigil_core::{Epoch, Root, Slot};

use crate::models::{HighWatermark, SignedAttestation, SignedBlock, SigningWatermark};

/// Why a signature was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Request names a different chain than the database
    GenesisValidatorsRootMismatch,
    /// Validator was disabled, e.g. after its key was deleted
    ValidatorDisabled,
    /// Block slot lower than the validator's watermark
    BlockBelowWatermark {
        /// Requested slot
        slot: Slot,
        /// Current watermark
        watermark: Slot,
    },
    /// Block slot at or above the high watermark
    BlockAboveHighWatermark {
        /// Requested slot
        slot: Slot,
        /// Ceiling
        high_watermark: Slot,
    },
    /// A different block was already signed at this slot
    DoubleBlockProposal {
        /// Slot of both proposals
        slot: Slot,
    },
    /// Source epoch after target epoch
    SourceAfterTarget {
        /// Requested source
        source: Epoch,
        /// Requested target
        target: Epoch,
    },
    /// Source epoch lower than the watermark
    SourceBelowWatermark {
        /// Requested source
        source: Epoch,
        /// Current watermark
        watermark: Epoch,
    },
    /// Target epoch lower than the watermark
    TargetBelowWatermark {
        /// Requested target
        target: Epoch,
        /// Current watermark
        watermark: Epoch,
    },
    /// Source or target at or above the high watermark
    AttestationAboveHighWatermark {
        /// Requested source
        source: Epoch,
        /// Requested target
        target: Epoch,
        /// Ceiling
        high_watermark: Epoch,
    },
    /// A different attestation was already signed for this target
    DoubleVote {
        /// Shared target epoch
        target: Epoch,
    },
    /// The new attestation surrounds one on record
    SurroundingVote {
        /// Source of the surrounded record
        existing_source: Epoch,
        /// Target of the surrounded record
        existing_target: Epoch,
    },
    /// An attestation on record surrounds the new one
    SurroundedVote {
        /// Source of the surrounding record
        existing_source: Epoch,
        /// Target of the surrounding record
        existing_target: Epoch,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenesisValidatorsRootMismatch => {
                write!(f, "genesis validators root does not match the database")
            }
            Self::ValidatorDisabled => write!(f, "validator is disabled"),
            Self::BlockBelowWatermark { slot, watermark } => {
                write!(f, "block slot {slot} is below the watermark {watermark}")
            }
            Self::BlockAboveHighWatermark {
                slot,
                high_watermark,
            } => write!(
                f,
                "block slot {slot} is at or above the high watermark {high_watermark}"
            ),
            Self::DoubleBlockProposal { slot } => {
                write!(f, "a different block was already signed at slot {slot}")
            }
            Self::SourceAfterTarget { source, target } => {
                write!(f, "source epoch {source} is after target epoch {target}")
            }
            Self::SourceBelowWatermark { source, watermark } => {
                write!(f, "source epoch {source} is below the watermark {watermark}")
            }
            Self::TargetBelowWatermark { target, watermark } => {
                write!(f, "target epoch {target} is below the watermark {watermark}")
            }
            Self::AttestationAboveHighWatermark {
                source,
                target,
                high_watermark,
            } => write!(
                f,
                "attestation {source}->{target} reaches the high watermark {high_watermark}"
            ),
            Self::DoubleVote { target } => {
                write!(f, "a different attestation was already signed for target {target}")
            }
            Self::SurroundingVote {
                existing_source,
                existing_target,
            } => write!(
                f,
                "attestation surrounds signed attestation {existing_source}->{existing_target}"
            ),
            Self::SurroundedVote {
                existing_source,
                existing_target,
            } => write!(
                f,
                "attestation is surrounded by signed attestation {existing_source}->{existing_target}"
            ),
        }
    }
}

/// Outcome of a protection check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Safe to sign; `record` is false when the identical message is already
    /// on record
    Accept {
        /// Whether a new record must be written
        record: bool,
    },
    /// Signing would risk slashing
    Reject(Rejection),
}

impl Decision {
    /// Whether signing may proceed.
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }
}

/// A block proposal to check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    /// Block slot
    pub slot: Slot,
    /// Root that would be signed
    pub signing_root: Root,
}

/// An attestation to check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttestationRequest {
    /// Source checkpoint epoch
    pub source_epoch: Epoch,
    /// Target checkpoint epoch
    pub target_epoch: Epoch,
    /// Root that would be signed
    pub signing_root: Root,
}

/// Decide a block proposal given the record already stored at its slot.
pub fn decide_block(
    watermark: &SigningWatermark,
    high_watermark: &HighWatermark,
    existing_at_slot: Option<&SignedBlock>,
    request: &BlockRequest,
) -> Decision {
    if let Some(watermark) = watermark.slot {
        if request.slot < watermark {
            return Decision::Reject(Rejection::BlockBelowWatermark {
                slot: request.slot,
                watermark,
            });
        }
    }
    if let Some(high) = high_watermark.slot {
        if request.slot >= high {
            return Decision::Reject(Rejection::BlockAboveHighWatermark {
                slot: request.slot,
                high_watermark: high,
            });
        }
    }
    match existing_at_slot {
        None => Decision::Accept { record: true },
        Some(existing) if existing.signing_root == Some(request.signing_root) => {
            Decision::Accept { record: false }
        }
        Some(_) => Decision::Reject(Rejection::DoubleBlockProposal { slot: request.slot }),
    }
}

/// Decide an attestation given the records that share its target or may
/// surround it or be surrounded by it.
pub fn decide_attestation(
    watermark: &SigningWatermark,
    high_watermark: &HighWatermark,
    history: &[SignedAttestation],
    request: &AttestationRequest,
) -> Decision {
    let (source, target) = (request.source_epoch, request.target_epoch);
    if source > target {
        return Decision::Reject(Rejection::SourceAfterTarget { source, target });
    }
    if let Some(watermark) = watermark.source_epoch {
        if source < watermark {
            return Decision::Reject(Rejection::SourceBelowWatermark { source, watermark });
        }
    }
    if let Some(watermark) = watermark.target_epoch {
        if target < watermark {
            return Decision::Reject(Rejection::TargetBelowWatermark { target, watermark });
        }
    }
    if let Some(high) = high_watermark.epoch {
        if source >= high || target >= high {
            return Decision::Reject(Rejection::AttestationAboveHighWatermark {
                source,
                target,
                high_watermark: high,
            });
        }
    }

    let identical = history.iter().any(|existing| {
        existing.source_epoch == source
            && existing.target_epoch == target
            && existing.signing_root == Some(request.signing_root)
    });
    if identical {
        return Decision::Accept { record: false };
    }

    for existing in history {
        if existing.target_epoch == target {
            return Decision::Reject(Rejection::DoubleVote { target });
        }
        if existing.source_epoch < source && existing.target_epoch > target {
            return Decision::Reject(Rejection::SurroundedVote {
                existing_source: existing.source_epoch,
                existing_target: existing.target_epoch,
            });
        }
        if source < existing.source_epoch && target > existing.target_epoch {
            return Decision::Reject(Rejection::SurroundingVote {
                existing_source: existing.source_epoch,
                existing_target: existing.target_epoch,
            });
        }
    }
    Decision::Accept { record: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn root(byte: u8) -> Root {
        Root::from([byte; 32])
    }

    fn block(slot: Slot, byte: u8) -> BlockRequest {
        BlockRequest {
            slot,
            signing_root: root(byte),
        }
    }

    fn attestation(source: Epoch, target: Epoch, byte: u8) -> AttestationRequest {
        AttestationRequest {
            source_epoch: source,
            target_epoch: target,
            signing_root: root(byte),
        }
    }

    fn on_record(source: Epoch, target: Epoch, byte: u8) -> SignedAttestation {
        SignedAttestation {
            source_epoch: source,
            target_epoch: target,
            signing_root: Some(root(byte)),
        }
    }

    #[test]
    fn block_rules() {
        let none = SigningWatermark::default();
        let high = HighWatermark::default();

        assert_eq!(
            decide_block(&none, &high, None, &block(10, 1)),
            Decision::Accept { record: true }
        );

        let signed = SignedBlock {
            slot: 10,
            signing_root: Some(root(1)),
        };
        assert_eq!(
            decide_block(&none, &high, Some(&signed), &block(10, 1)),
            Decision::Accept { record: false }
        );
        assert_eq!(
            decide_block(&none, &high, Some(&signed), &block(10, 2)),
            Decision::Reject(Rejection::DoubleBlockProposal { slot: 10 })
        );

        let rootless = SignedBlock {
            slot: 10,
            signing_root: None,
        };
        assert_eq!(
            decide_block(&none, &high, Some(&rootless), &block(10, 1)),
            Decision::Reject(Rejection::DoubleBlockProposal { slot: 10 })
        );

        let watermark = SigningWatermark {
            slot: Some(100),
            ..Default::default()
        };
        assert_eq!(
            decide_block(&watermark, &high, None, &block(99, 1)),
            Decision::Reject(Rejection::BlockBelowWatermark {
                slot: 99,
                watermark: 100
            })
        );
        assert!(decide_block(&watermark, &high, None, &block(100, 1)).is_accept());
    }

    #[test]
    fn high_watermark_is_exclusive_ceiling() {
        let none = SigningWatermark::default();
        let high = HighWatermark {
            slot: Some(50),
            epoch: Some(5),
        };
        assert!(decide_block(&none, &high, None, &block(49, 1)).is_accept());
        assert!(!decide_block(&none, &high, None, &block(50, 1)).is_accept());
        assert!(decide_attestation(&none, &high, &[], &attestation(3, 4, 1)).is_accept());
        assert!(!decide_attestation(&none, &high, &[], &attestation(4, 5, 1)).is_accept());
    }

    #[test]
    fn attestation_ordering_and_watermarks() {
        let high = HighWatermark::default();
        assert_eq!(
            decide_attestation(&SigningWatermark::default(), &high, &[], &attestation(5, 4, 1)),
            Decision::Reject(Rejection::SourceAfterTarget {
                source: 5,
                target: 4
            })
        );

        let watermark = SigningWatermark {
            slot: None,
            source_epoch: Some(3),
            target_epoch: Some(6),
        };
        assert_eq!(
            decide_attestation(&watermark, &high, &[], &attestation(2, 7, 1)),
            Decision::Reject(Rejection::SourceBelowWatermark {
                source: 2,
                watermark: 3
            })
        );
        assert_eq!(
            decide_attestation(&watermark, &high, &[], &attestation(3, 5, 1)),
            Decision::Reject(Rejection::TargetBelowWatermark {
                target: 5,
                watermark: 6
            })
        );
        assert!(decide_attestation(&watermark, &high, &[], &attestation(3, 6, 1)).is_accept());
    }

    #[test]
    fn double_vote_and_idempotent_resign() {
        let none = SigningWatermark::default();
        let high = HighWatermark::default();
        let history = [on_record(2, 3, 1)];

        assert_eq!(
            decide_attestation(&none, &high, &history, &attestation(2, 3, 1)),
            Decision::Accept { record: false }
        );
        assert_eq!(
            decide_attestation(&none, &high, &history, &attestation(2, 3, 2)),
            Decision::Reject(Rejection::DoubleVote { target: 3 })
        );
        assert_eq!(
            decide_attestation(&none, &high, &history, &attestation(1, 3, 1)),
            Decision::Reject(Rejection::DoubleVote { target: 3 })
        );
    }

    #[test]
    fn surround_rules() {
        let none = SigningWatermark::default();
        let high = HighWatermark::default();

        let history = [on_record(3, 4, 1)];
        assert_eq!(
            decide_attestation(&none, &high, &history, &attestation(2, 5, 2)),
            Decision::Reject(Rejection::SurroundingVote {
                existing_source: 3,
                existing_target: 4
            })
        );

        let history = [on_record(2, 5, 1)];
        assert_eq!(
            decide_attestation(&none, &high, &history, &attestation(3, 4, 2)),
            Decision::Reject(Rejection::SurroundedVote {
                existing_source: 2,
                existing_target: 5
            })
        );

        let history = [on_record(2, 5, 1)];
        assert!(decide_attestation(&none, &high, &history, &attestation(2, 6, 2)).is_accept());
        assert!(decide_attestation(&none, &high, &history, &attestation(5, 6, 2)).is_accept());
    }

    proptest! {
        #[test]
        fn accepted_block_slots_never_drop_below_watermark(
            slots in proptest::collection::vec(0u64..64, 1..40)
        ) {
            let high = HighWatermark::default();
            let mut watermark = SigningWatermark::default();
            let mut signed: std::collections::HashMap<Slot, SignedBlock> = Default::default();
            let mut highest: Option<Slot> = None;

            for (i, slot) in slots.into_iter().enumerate() {
                let request = block(slot, i as u8);
                let decision = decide_block(&watermark, &high, signed.get(&slot), &request);
                if let Decision::Accept { record } = decision {
                    if let Some(highest) = highest {
                        prop_assert!(slot >= highest);
                    }
                    if record {
                        signed.insert(slot, SignedBlock { slot, signing_root: Some(request.signing_root) });
                    }
                    watermark.slot = Some(watermark.slot.map_or(slot, |w| w.max(slot)));
                    highest = Some(highest.map_or(slot, |h| h.max(slot)));
                }
            }
        }

        #[test]
        fn accepted_attestations_are_never_slashable(
            votes in proptest::collection::vec((0u64..16, 0u64..16), 1..30)
        ) {
            let high = HighWatermark::default();
            let mut history: Vec<SignedAttestation> = Vec::new();

            for (i, (source, target)) in votes.into_iter().enumerate() {
                let request = attestation(source, target, i as u8);
                if let Decision::Accept { record: true } =
                    decide_attestation(&SigningWatermark::default(), &high, &history, &request)
                {
                    for existing in &history {
                        prop_assert!(existing.target_epoch != target);
                        prop_assert!(!(existing.source_epoch < source && existing.target_epoch > target));
                        prop_assert!(!(source < existing.source_epoch && target > existing.target_epoch));
                    }
                    history.push(on_record(source, target, i as u8));
                }
            }
        }
    }
}
