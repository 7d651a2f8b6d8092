//! Signing roots
//!
//! `compute_signing_root(hash_tree_root(object), domain)` for every artifact.
//! The fork version in the domain is the one active at the artifact's epoch.
//! Deposits and builder registrations are signed on the genesis fork version
//! with a zero genesis validators root so they stay valid on any fork.

use vigil_core::ssz::{compute_domain, compute_signing_root, TreeHash};
use vigil_core::{DomainType, Epoch, ForkInfo, Root, Slot, Version};

use crate::artifact::Artifact;
use crate::error::{Result, SigningError};

/// Computes signing roots for one network
#[derive(Debug, Clone, Copy)]
pub struct SigningRootCalculator {
    genesis_fork_version: Version,
    slots_per_epoch: u64,
}

impl SigningRootCalculator {
    /// Calculator for a network with the given genesis fork version.
    pub fn new(genesis_fork_version: Version, slots_per_epoch: u64) -> Result<Self> {
        if slots_per_epoch == 0 {
            return Err(SigningError::invalid_request(
                "slots per epoch must be positive",
            ));
        }
        Ok(Self {
            genesis_fork_version,
            slots_per_epoch,
        })
    }

    /// Genesis fork version of the network.
    pub fn genesis_fork_version(&self) -> Version {
        self.genesis_fork_version
    }

    fn epoch_at(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    fn signing_root_at(
        &self,
        object_root: Root,
        domain_type: DomainType,
        fork_info: &ForkInfo,
        epoch: Epoch,
    ) -> Root {
        let domain = compute_domain(
            domain_type,
            fork_info.fork.version_at(epoch),
            fork_info.genesis_validators_root,
        );
        compute_signing_root(object_root, domain)
    }

    /// Signing root of `artifact`.
    pub fn signing_root(&self, artifact: &Artifact) -> Result<Root> {
        let root = match artifact {
            Artifact::Block { fork_info, block } => self.signing_root_at(
                block.tree_hash_root(),
                DomainType::BEACON_PROPOSER,
                fork_info,
                self.epoch_at(block.slot),
            ),
            Artifact::BlockV2 {
                fork_info,
                beacon_block,
            } => {
                let header = &beacon_block.block_header;
                self.signing_root_at(
                    header.tree_hash_root(),
                    DomainType::BEACON_PROPOSER,
                    fork_info,
                    self.epoch_at(header.slot),
                )
            }
            Artifact::Attestation {
                fork_info,
                attestation,
            } => self.signing_root_at(
                attestation.tree_hash_root(),
                DomainType::BEACON_ATTESTER,
                fork_info,
                attestation.target.epoch,
            ),
            Artifact::AggregationSlot {
                fork_info,
                aggregation_slot,
            } => self.signing_root_at(
                aggregation_slot.slot.tree_hash_root(),
                DomainType::SELECTION_PROOF,
                fork_info,
                self.epoch_at(aggregation_slot.slot),
            ),
            Artifact::AggregateAndProof {
                fork_info,
                aggregate_and_proof,
            } => self.signing_root_at(
                aggregate_and_proof.try_tree_hash_root()?,
                DomainType::AGGREGATE_AND_PROOF,
                fork_info,
                self.epoch_at(aggregate_and_proof.aggregate.data.slot),
            ),
            Artifact::SyncCommitteeMessage {
                fork_info,
                sync_committee_message,
            } => self.signing_root_at(
                sync_committee_message.beacon_block_root,
                DomainType::SYNC_COMMITTEE,
                fork_info,
                self.epoch_at(sync_committee_message.slot),
            ),
            Artifact::SyncCommitteeSelectionProof {
                fork_info,
                sync_aggregator_selection_data,
            } => self.signing_root_at(
                sync_aggregator_selection_data.tree_hash_root(),
                DomainType::SYNC_COMMITTEE_SELECTION_PROOF,
                fork_info,
                self.epoch_at(sync_aggregator_selection_data.slot),
            ),
            Artifact::SyncCommitteeContributionAndProof {
                fork_info,
                contribution_and_proof,
            } => self.signing_root_at(
                contribution_and_proof.try_tree_hash_root()?,
                DomainType::CONTRIBUTION_AND_PROOF,
                fork_info,
                self.epoch_at(contribution_and_proof.contribution.slot),
            ),
            Artifact::VoluntaryExit {
                fork_info,
                voluntary_exit,
            } => self.signing_root_at(
                voluntary_exit.tree_hash_root(),
                DomainType::VOLUNTARY_EXIT,
                fork_info,
                voluntary_exit.epoch,
            ),
            Artifact::RandaoReveal {
                fork_info,
                randao_reveal,
            } => self.signing_root_at(
                randao_reveal.epoch.tree_hash_root(),
                DomainType::RANDAO,
                fork_info,
                randao_reveal.epoch,
            ),
            Artifact::Deposit { deposit } => {
                let domain =
                    compute_domain(DomainType::DEPOSIT, deposit.genesis_fork_version, Root::ZERO);
                compute_signing_root(deposit.tree_hash_root(), domain)
            }
            Artifact::ValidatorRegistration {
                validator_registration,
            } => {
                let domain = compute_domain(
                    DomainType::APPLICATION_BUILDER,
                    self.genesis_fork_version,
                    Root::ZERO,
                );
                compute_signing_root(validator_registration.tree_hash_root(), domain)
            }
        };
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{
        AttestationData, BeaconBlockHeader, Checkpoint, DepositMessage, RandaoReveal,
    };
    use vigil_core::{FixedBytes, Fork};

    fn fork_info() -> ForkInfo {
        ForkInfo {
            fork: Fork {
                previous_version: Version::from([0, 0, 0, 0]),
                current_version: Version::from([1, 0, 0, 0]),
                epoch: 1,
            },
            genesis_validators_root: Root::from([0xaa; 32]),
        }
    }

    fn calculator() -> SigningRootCalculator {
        SigningRootCalculator::new(Version::ZERO, 32).unwrap()
    }

    #[test]
    fn mainnet_deposit_domain() {
        let domain = compute_domain(DomainType::DEPOSIT, Version::ZERO, Root::ZERO);
        assert_eq!(
            domain.to_hex(),
            "0x03000000f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a9"
        );
    }

    #[test]
    fn block_root_uses_fork_at_slot_epoch() {
        let artifact = Artifact::Block {
            fork_info: fork_info(),
            block: BeaconBlockHeader {
                slot: 33,
                proposer_index: 5,
                parent_root: Root::from([0x11; 32]),
                state_root: Root::from([0x22; 32]),
                body_root: Root::from([0x33; 32]),
            },
        };
        assert_eq!(
            calculator().signing_root(&artifact).unwrap().to_hex(),
            "0xe626c058213237a74f59f34bdadc64f5728ae70a77f4d7a02c24d0c9cfcef5d9"
        );
    }

    #[test]
    fn attestation_root() {
        let artifact = Artifact::Attestation {
            fork_info: fork_info(),
            attestation: AttestationData {
                slot: 40,
                index: 2,
                beacon_block_root: Root::from([0x44; 32]),
                source: Checkpoint {
                    epoch: 1,
                    root: Root::from([0x55; 32]),
                },
                target: Checkpoint {
                    epoch: 2,
                    root: Root::from([0x66; 32]),
                },
            },
        };
        assert_eq!(
            calculator().signing_root(&artifact).unwrap().to_hex(),
            "0x378020bcf9e2cd50d03cb98f98f36af6989bde466c67f73edbe7754721c7e1fb"
        );
    }

    #[test]
    fn randao_before_fork_uses_previous_version() {
        let artifact = Artifact::RandaoReveal {
            fork_info: fork_info(),
            randao_reveal: RandaoReveal { epoch: 0 },
        };
        assert_eq!(
            calculator().signing_root(&artifact).unwrap().to_hex(),
            "0x12cdd09b46e23128039e3fa54d94fa32b6dc5af24dc9af838f95f44cf3bbb785"
        );
    }

    #[test]
    fn deposit_ignores_chain() {
        let artifact = Artifact::Deposit {
            deposit: DepositMessage {
                pubkey: FixedBytes([0x77; 48]),
                withdrawal_credentials: Root::from([0x88; 32]),
                amount: 32_000_000_000,
                genesis_fork_version: Version::ZERO,
            },
        };
        assert_eq!(
            calculator().signing_root(&artifact).unwrap().to_hex(),
            "0xe163374fb65552e8e79ea7c42168aad6b58f3a17b18b3afa010dc9c360cbf480"
        );
    }

    #[test]
    fn zero_slots_per_epoch_is_rejected() {
        assert!(SigningRootCalculator::new(Version::ZERO, 0).is_err());
    }
}
