//! Byte arrays, roots, forks and signing domains
//!
//! All byte values are carried as `0x`-prefixed hex on the wire. Slots and
//! epochs are plain `u64`; the JSON layer quotes them via [`crate::serde_utils`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, VigilError};

/// Beacon chain slot
pub type Slot = u64;

/// Beacon chain epoch
pub type Epoch = u64;

/// Fixed-length byte array with `0x` hex serialization
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedBytes<const N: usize>(pub [u8; N]);

/// 32-byte hash tree root
pub type Root = FixedBytes<32>;

/// 4-byte fork version
pub type Version = FixedBytes<4>;

impl<const N: usize> FixedBytes<N> {
    /// All-zero value
    pub const ZERO: Self = Self([0u8; N]);

    /// Build from a slice of exactly `N` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; N] = bytes.try_into().map_err(|_| {
            VigilError::invalid(format!("expected {N} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// `0x`-prefixed lower-case hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl<const N: usize> Default for FixedBytes<N> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const N: usize> From<[u8; N]> for FixedBytes<N> {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes)
    }
}

impl<const N: usize> AsRef<[u8]> for FixedBytes<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> FromStr for FixedBytes<N> {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        Self::from_slice(&hex::decode(trimmed)?)
    }
}

impl<const N: usize> fmt::Display for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl<const N: usize> fmt::Debug for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl<const N: usize> Serialize for FixedBytes<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedBytes<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Variable-length byte string with `0x` hex serialization
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    /// Borrow the raw bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl FromStr for HexBytes {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        Ok(Self(hex::decode(trimmed)?))
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Signature scheme of a key
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum KeyType {
    /// BLS12-381, used for consensus duties
    #[default]
    #[serde(rename = "BLS")]
    Bls,
    /// secp256k1 ECDSA
    #[serde(rename = "SECP256K1")]
    Secp256k1,
}

impl KeyType {
    /// Upper-case name, also used as a directory name for proxy keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bls => "BLS",
            Self::Secp256k1 => "SECP256K1",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BLS" => Ok(Self::Bls),
            "SECP256K1" => Ok(Self::Secp256k1),
            other => Err(VigilError::invalid(format!("unknown key type: {other}"))),
        }
    }
}

/// Fork versions around a transition epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fork {
    /// Version before `epoch`
    pub previous_version: Version,
    /// Version from `epoch` on
    pub current_version: Version,
    /// Transition epoch
    #[serde(with = "crate::serde_utils::quoted_u64")]
    pub epoch: Epoch,
}

impl Fork {
    /// Version in effect at `epoch`.
    pub fn version_at(&self, epoch: Epoch) -> Version {
        if epoch < self.epoch {
            self.previous_version
        } else {
            self.current_version
        }
    }
}

/// Fork plus the genesis validators root of the chain being signed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkInfo {
    /// Active fork
    pub fork: Fork,
    /// Genesis validators root of the network
    pub genesis_validators_root: Root,
}

/// 4-byte signing domain type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainType(pub [u8; 4]);

impl DomainType {
    /// Block proposals
    pub const BEACON_PROPOSER: Self = Self([0, 0, 0, 0]);
    /// Attestations
    pub const BEACON_ATTESTER: Self = Self([1, 0, 0, 0]);
    /// RANDAO reveals
    pub const RANDAO: Self = Self([2, 0, 0, 0]);
    /// Deposits
    pub const DEPOSIT: Self = Self([3, 0, 0, 0]);
    /// Voluntary exits
    pub const VOLUNTARY_EXIT: Self = Self([4, 0, 0, 0]);
    /// Aggregator selection proofs
    pub const SELECTION_PROOF: Self = Self([5, 0, 0, 0]);
    /// Aggregate and proof envelopes
    pub const AGGREGATE_AND_PROOF: Self = Self([6, 0, 0, 0]);
    /// Sync committee messages
    pub const SYNC_COMMITTEE: Self = Self([7, 0, 0, 0]);
    /// Sync committee aggregator selection
    pub const SYNC_COMMITTEE_SELECTION_PROOF: Self = Self([8, 0, 0, 0]);
    /// Sync committee contribution and proof
    pub const CONTRIBUTION_AND_PROOF: Self = Self([9, 0, 0, 0]);
    /// Builder API validator registrations
    pub const APPLICATION_BUILDER: Self = Self([0, 0, 0, 1]);
    /// Commit-boost signer module
    pub const COMMIT_BOOST: Self = Self([0x6d, 0x6d, 0x6f, 0x43]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bytes_hex_round_trip() {
        let root: Root = "0x0101010101010101010101010101010101010101010101010101010101010101"
            .parse()
            .unwrap();
        assert_eq!(root.0, [1u8; 32]);
        assert_eq!(serde_json::to_string(&root).unwrap(), format!("\"{}\"", root.to_hex()));
    }

    #[test]
    fn fixed_bytes_rejects_wrong_length() {
        assert!("0x0102".parse::<Root>().is_err());
        assert!("0x01020304".parse::<Version>().is_ok());
    }

    #[test]
    fn fork_version_selection() {
        let fork = Fork {
            previous_version: FixedBytes([1, 0, 0, 0]),
            current_version: FixedBytes([2, 0, 0, 0]),
            epoch: 10,
        };
        assert_eq!(fork.version_at(9), fork.previous_version);
        assert_eq!(fork.version_at(10), fork.current_version);
    }

    #[test]
    fn fork_json_uses_quoted_epoch() {
        let json = r#"{"previous_version":"0x00000000","current_version":"0x01000000","epoch":"74240"}"#;
        let fork: Fork = serde_json::from_str(json).unwrap();
        assert_eq!(fork.epoch, 74240);
    }

    #[test]
    fn key_type_names() {
        assert_eq!(serde_json::to_string(&KeyType::Secp256k1).unwrap(), "\"SECP256K1\"");
        assert_eq!("bls".parse::<KeyType>().unwrap(), KeyType::Bls);
    }
}
