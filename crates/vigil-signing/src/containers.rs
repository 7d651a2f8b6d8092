//! Consensus containers carried by signing requests
//!
//! Only the fields that feed a hash tree root are modelled. Blocks arrive as
//! headers; the body is represented by its root. Field names follow the
//! consensus specs and the beacon API JSON.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use vigil_core::serde_utils::quoted_u64;
use vigil_core::ssz::{bitlist_root, bitvector_root, container_root, TreeHash};
use vigil_core::{Epoch, FixedBytes, HexBytes, Root, Slot, Version};

use crate::error::Result;

/// `MAX_VALIDATORS_PER_COMMITTEE`
pub const MAX_VALIDATORS_PER_COMMITTEE: usize = 2048;

/// `SYNC_COMMITTEE_SIZE / SYNC_COMMITTEE_SUBNET_COUNT`
pub const SYNC_SUBCOMMITTEE_SIZE: usize = 128;

/// Compressed BLS signature
pub type BlsSignatureBytes = FixedBytes<96>;

/// Compressed BLS public key
pub type BlsPublicKeyBytes = FixedBytes<48>;

/// Execution layer address
pub type ExecutionAddress = FixedBytes<20>;

/// `BeaconBlockHeader`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    #[serde(with = "quoted_u64")]
    pub proposer_index: u64,
    pub parent_root: Root,
    pub state_root: Root,
    pub body_root: Root,
}

impl TreeHash for BeaconBlockHeader {
    fn tree_hash_root(&self) -> Root {
        container_root(&[
            self.slot.tree_hash_root(),
            self.proposer_index.tree_hash_root(),
            self.parent_root,
            self.state_root,
            self.body_root,
        ])
    }
}

/// Versioned block wrapper sent with `BLOCK_V2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockV2 {
    /// Fork name such as `DENEB`; informational
    pub version: String,
    /// Header of the block
    pub block_header: BeaconBlockHeader,
}

/// `Checkpoint`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(with = "quoted_u64")]
    pub epoch: Epoch,
    pub root: Root,
}

impl TreeHash for Checkpoint {
    fn tree_hash_root(&self) -> Root {
        container_root(&[self.epoch.tree_hash_root(), self.root])
    }
}

/// `AttestationData`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationData {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    #[serde(with = "quoted_u64")]
    pub index: u64,
    pub beacon_block_root: Root,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

impl TreeHash for AttestationData {
    fn tree_hash_root(&self) -> Root {
        container_root(&[
            self.slot.tree_hash_root(),
            self.index.tree_hash_root(),
            self.beacon_block_root,
            self.source.tree_hash_root(),
            self.target.tree_hash_root(),
        ])
    }
}

/// `Attestation` with SSZ-encoded aggregation bits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub aggregation_bits: HexBytes,
    pub data: AttestationData,
    pub signature: BlsSignatureBytes,
}

impl Attestation {
    /// Hash tree root; fails on malformed aggregation bits.
    pub fn try_tree_hash_root(&self) -> Result<Root> {
        Ok(container_root(&[
            bitlist_root(self.aggregation_bits.as_slice(), MAX_VALIDATORS_PER_COMMITTEE)?,
            self.data.tree_hash_root(),
            self.signature.tree_hash_root(),
        ]))
    }
}

/// `AggregateAndProof`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateAndProof {
    #[serde(with = "quoted_u64")]
    pub aggregator_index: u64,
    pub aggregate: Attestation,
    pub selection_proof: BlsSignatureBytes,
}

impl AggregateAndProof {
    /// Hash tree root; fails on malformed aggregation bits.
    pub fn try_tree_hash_root(&self) -> Result<Root> {
        Ok(container_root(&[
            self.aggregator_index.tree_hash_root(),
            self.aggregate.try_tree_hash_root()?,
            self.selection_proof.tree_hash_root(),
        ]))
    }
}

/// Slot whose aggregator selection proof is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSlot {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
}

/// `VoluntaryExit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoluntaryExit {
    #[serde(with = "quoted_u64")]
    pub epoch: Epoch,
    #[serde(with = "quoted_u64")]
    pub validator_index: u64,
}

impl TreeHash for VoluntaryExit {
    fn tree_hash_root(&self) -> Root {
        container_root(&[
            self.epoch.tree_hash_root(),
            self.validator_index.tree_hash_root(),
        ])
    }
}

/// Epoch whose RANDAO reveal is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandaoReveal {
    #[serde(with = "quoted_u64")]
    pub epoch: Epoch,
}

/// `DepositMessage` plus the fork version its domain is computed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositMessage {
    pub pubkey: BlsPublicKeyBytes,
    pub withdrawal_credentials: Root,
    #[serde(with = "quoted_u64")]
    pub amount: u64,
    pub genesis_fork_version: Version,
}

impl TreeHash for DepositMessage {
    fn tree_hash_root(&self) -> Root {
        container_root(&[
            self.pubkey.tree_hash_root(),
            self.withdrawal_credentials,
            self.amount.tree_hash_root(),
        ])
    }
}

/// `SyncCommitteeMessage` fields that are signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommitteeMessage {
    pub beacon_block_root: Root,
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
}

/// `SyncAggregatorSelectionData`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAggregatorSelectionData {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    #[serde(with = "quoted_u64")]
    pub subcommittee_index: u64,
}

impl TreeHash for SyncAggregatorSelectionData {
    fn tree_hash_root(&self) -> Root {
        container_root(&[
            self.slot.tree_hash_root(),
            self.subcommittee_index.tree_hash_root(),
        ])
    }
}

/// `SyncCommitteeContribution` with SSZ-encoded aggregation bits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommitteeContribution {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    pub beacon_block_root: Root,
    #[serde(with = "quoted_u64")]
    pub subcommittee_index: u64,
    pub aggregation_bits: HexBytes,
    pub signature: BlsSignatureBytes,
}

impl SyncCommitteeContribution {
    /// Hash tree root; fails on malformed aggregation bits.
    pub fn try_tree_hash_root(&self) -> Result<Root> {
        Ok(container_root(&[
            self.slot.tree_hash_root(),
            self.beacon_block_root,
            self.subcommittee_index.tree_hash_root(),
            bitvector_root(self.aggregation_bits.as_slice(), SYNC_SUBCOMMITTEE_SIZE)?,
            self.signature.tree_hash_root(),
        ]))
    }
}

/// `ContributionAndProof`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionAndProof {
    #[serde(with = "quoted_u64")]
    pub aggregator_index: u64,
    pub contribution: SyncCommitteeContribution,
    pub selection_proof: BlsSignatureBytes,
}

impl ContributionAndProof {
    /// Hash tree root; fails on malformed aggregation bits.
    pub fn try_tree_hash_root(&self) -> Result<Root> {
        Ok(container_root(&[
            self.aggregator_index.tree_hash_root(),
            self.contribution.try_tree_hash_root()?,
            self.selection_proof.tree_hash_root(),
        ]))
    }
}

/// Builder API `ValidatorRegistrationV1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRegistration {
    pub fee_recipient: ExecutionAddress,
    #[serde(with = "quoted_u64")]
    pub gas_limit: u64,
    #[serde(with = "quoted_u64")]
    pub timestamp: u64,
    pub pubkey: BlsPublicKeyBytes,
}

impl TreeHash for ValidatorRegistration {
    fn tree_hash_root(&self) -> Root {
        container_root(&[
            self.fee_recipient.tree_hash_root(),
            self.gas_limit.tree_hash_root(),
            self.timestamp.tree_hash_root(),
            self.pubkey.tree_hash_root(),
        ])
    }
}
