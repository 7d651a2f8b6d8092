//! Signer identifiers
//!
//! Every key is addressed by the hex encoding of its public key. Clients send
//! identifiers with or without a `0x` prefix and in any case, so the identifier
//! is normalized once at the boundary: lower-case, surrounding whitespace and
//! the `0x` prefix removed. The registry, the slashing protection store and the
//! HTTP layer only ever compare normalized values.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, VigilError};

/// Normalized public key identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignerIdentifier(String);

impl SignerIdentifier {
    /// Normalize a raw identifier string.
    ///
    /// Idempotent: `normalize(&normalize(x)) == normalize(x)` for every input.
    pub fn normalize(raw: &str) -> String {
        let lowered = raw.to_ascii_lowercase();
        let mut rest = lowered.as_str();
        loop {
            let trimmed = rest.trim();
            match trimmed.strip_prefix("0x") {
                Some(stripped) => rest = stripped,
                None => return trimmed.to_string(),
            }
        }
    }

    /// Parse and normalize, rejecting empty or non-hex input. At most one
    /// `0x` prefix is accepted.
    pub fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let normalized = lowered.strip_prefix("0x").unwrap_or(&lowered);
        if normalized.is_empty() {
            return Err(VigilError::invalid("empty signer identifier"));
        }
        if normalized.len() % 2 != 0 || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VigilError::invalid(format!(
                "signer identifier is not an even-length hex string: {raw}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }

    /// Identifier for raw public key bytes.
    pub fn from_public_key(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Normalized form, without prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x`-prefixed form used on the wire.
    pub fn to_prefixed(&self) -> String {
        format!("0x{}", self.0)
    }

    /// Decoded public key bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Construction guarantees valid hex.
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for SignerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0)
    }
}

impl FromStr for SignerIdentifier {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SignerIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed())
    }
}

impl<'de> Deserialize<'de> for SignerIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
