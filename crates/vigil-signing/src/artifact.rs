//! Signing request bodies
//!
//! A request names its artifact with a `type` tag and carries the payload in
//! a field named after it. `signingRoot` is optional; when present it must
//! equal the root computed from the payload.

use serde::{Deserialize, Serialize};
use vigil_core::{ForkInfo, Root};

use crate::containers::{
    AggregateAndProof, AggregationSlot, AttestationData, BeaconBlockHeader, BlockV2,
    ContributionAndProof, DepositMessage, RandaoReveal, SyncAggregatorSelectionData,
    SyncCommitteeMessage, ValidatorRegistration, VoluntaryExit,
};

/// A request to sign one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// Root the client expects to be signed
    #[serde(
        rename = "signingRoot",
        alias = "signing_root",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_root: Option<Root>,
    /// Payload and its type
    #[serde(flatten)]
    pub artifact: Artifact,
}

/// The closed set of signable artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Artifact {
    /// Block proposal, sent as a header
    #[serde(rename = "BLOCK")]
    Block {
        fork_info: ForkInfo,
        block: BeaconBlockHeader,
    },
    /// Versioned block proposal
    #[serde(rename = "BLOCK_V2")]
    BlockV2 {
        fork_info: ForkInfo,
        beacon_block: BlockV2,
    },
    /// Attestation vote
    #[serde(rename = "ATTESTATION")]
    Attestation {
        fork_info: ForkInfo,
        attestation: AttestationData,
    },
    /// Aggregator selection proof
    #[serde(rename = "AGGREGATION_SLOT")]
    AggregationSlot {
        fork_info: ForkInfo,
        aggregation_slot: AggregationSlot,
    },
    /// Signed aggregate
    #[serde(rename = "AGGREGATE_AND_PROOF")]
    AggregateAndProof {
        fork_info: ForkInfo,
        aggregate_and_proof: AggregateAndProof,
    },
    /// Sync committee message for a block root
    #[serde(rename = "SYNC_COMMITTEE_MESSAGE")]
    SyncCommitteeMessage {
        fork_info: ForkInfo,
        sync_committee_message: SyncCommitteeMessage,
    },
    /// Sync committee aggregator selection proof
    #[serde(rename = "SYNC_COMMITTEE_SELECTION_PROOF")]
    SyncCommitteeSelectionProof {
        fork_info: ForkInfo,
        sync_aggregator_selection_data: SyncAggregatorSelectionData,
    },
    /// Signed sync committee contribution
    #[serde(rename = "SYNC_COMMITTEE_CONTRIBUTION_AND_PROOF")]
    SyncCommitteeContributionAndProof {
        fork_info: ForkInfo,
        contribution_and_proof: ContributionAndProof,
    },
    /// Voluntary exit
    #[serde(rename = "VOLUNTARY_EXIT")]
    VoluntaryExit {
        fork_info: ForkInfo,
        voluntary_exit: VoluntaryExit,
    },
    /// RANDAO reveal for an epoch
    #[serde(rename = "RANDAO_REVEAL")]
    RandaoReveal {
        fork_info: ForkInfo,
        randao_reveal: RandaoReveal,
    },
    /// Deposit message; signed without a chain-specific root
    #[serde(rename = "DEPOSIT")]
    Deposit { deposit: DepositMessage },
    /// Builder registration; signed under the genesis fork version
    #[serde(rename = "VALIDATOR_REGISTRATION")]
    ValidatorRegistration {
        validator_registration: ValidatorRegistration,
    },
}

impl Artifact {
    /// Wire name of the artifact type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Block { .. } => "BLOCK",
            Self::BlockV2 { .. } => "BLOCK_V2",
            Self::Attestation { .. } => "ATTESTATION",
            Self::AggregationSlot { .. } => "AGGREGATION_SLOT",
            Self::AggregateAndProof { .. } => "AGGREGATE_AND_PROOF",
            Self::SyncCommitteeMessage { .. } => "SYNC_COMMITTEE_MESSAGE",
            Self::SyncCommitteeSelectionProof { .. } => "SYNC_COMMITTEE_SELECTION_PROOF",
            Self::SyncCommitteeContributionAndProof { .. } => {
                "SYNC_COMMITTEE_CONTRIBUTION_AND_PROOF"
            }
            Self::VoluntaryExit { .. } => "VOLUNTARY_EXIT",
            Self::RandaoReveal { .. } => "RANDAO_REVEAL",
            Self::Deposit { .. } => "DEPOSIT",
            Self::ValidatorRegistration { .. } => "VALIDATOR_REGISTRATION",
        }
    }

    /// Fork info, for artifacts signed on a specific chain.
    pub fn fork_info(&self) -> Option<&ForkInfo> {
        match self {
            Self::Block { fork_info, .. }
            | Self::BlockV2 { fork_info, .. }
            | Self::Attestation { fork_info, .. }
            | Self::AggregationSlot { fork_info, .. }
            | Self::AggregateAndProof { fork_info, .. }
            | Self::SyncCommitteeMessage { fork_info, .. }
            | Self::SyncCommitteeSelectionProof { fork_info, .. }
            | Self::SyncCommitteeContributionAndProof { fork_info, .. }
            | Self::VoluntaryExit { fork_info, .. }
            | Self::RandaoReveal { fork_info, .. } => Some(fork_info),
            Self::Deposit { .. } | Self::ValidatorRegistration { .. } => None,
        }
    }
}

/// How a signature is rendered in the response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// `0x`-prefixed hex
    #[default]
    Hex,
    /// Standard base64
    Base64,
}

/// A produced signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// Encoded signature
    pub signature: String,
}
