//! SSZ hash tree root primitives
//!
//! Only the merkleization half of SSZ is needed: signing roots are
//! `hash_tree_root` values and nothing is ever SSZ-serialized on the wire.
//! Containers implement [`TreeHash`] by listing their field roots and calling
//! [`merkleize`].
//!
//! # Sections
//!
//! - basic values: `u64`, [`Root`], short and long fixed byte vectors
//! - bit collections: [`bitlist_root`], [`bitvector_root`]
//! - domains: [`compute_domain`], [`compute_signing_root`]

use sha2::{Digest, Sha256};

use crate::errors::{Result, VigilError};
use crate::types::{DomainType, FixedBytes, Root, Version};

/// 32-byte merkle leaf
pub type Chunk = [u8; 32];

/// Values with an SSZ hash tree root
pub trait TreeHash {
    /// SSZ `hash_tree_root`
    fn tree_hash_root(&self) -> Root;
}

impl TreeHash for u64 {
    fn tree_hash_root(&self) -> Root {
        let mut chunk = [0u8; 32];
        chunk[..8].copy_from_slice(&self.to_le_bytes());
        FixedBytes(chunk)
    }
}

impl<const N: usize> TreeHash for FixedBytes<N> {
    fn tree_hash_root(&self) -> Root {
        fixed_bytes_root(&self.0)
    }
}

fn hash_pair(left: &Chunk, right: &Chunk) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Split bytes into zero-padded 32-byte chunks.
pub fn pack_bytes(bytes: &[u8]) -> Vec<Chunk> {
    bytes
        .chunks(32)
        .map(|piece| {
            let mut chunk = [0u8; 32];
            chunk[..piece.len()].copy_from_slice(piece);
            chunk
        })
        .collect()
}

/// Merkleize chunks, padding with zero chunks up to the next power of two of
/// `limit` (or of the chunk count when no limit applies).
pub fn merkleize(chunks: &[Chunk], limit: Option<usize>) -> Result<Root> {
    let width = limit.unwrap_or(chunks.len());
    if chunks.len() > width {
        return Err(VigilError::invalid(format!(
            "{} chunks exceed merkle limit {width}",
            chunks.len()
        )));
    }
    let leaves = width.max(1).next_power_of_two();

    let mut layer: Vec<Chunk> = Vec::with_capacity(leaves);
    layer.extend_from_slice(chunks);
    layer.resize(leaves, [0u8; 32]);

    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    Ok(FixedBytes(layer[0]))
}

/// Merkleize the field roots of a container.
pub fn container_root(fields: &[Root]) -> Root {
    let chunks: Vec<Chunk> = fields.iter().map(|root| root.0).collect();
    // Unbounded merkleization cannot exceed its own width.
    merkleize(&chunks, None).unwrap_or_default()
}

/// Root of a fixed-length byte vector of any size.
pub fn fixed_bytes_root(bytes: &[u8]) -> Root {
    merkleize(&pack_bytes(bytes), None).unwrap_or_default()
}

/// Mix a list length into its contents root.
pub fn mix_in_length(root: &Root, length: usize) -> Root {
    let mut length_chunk = [0u8; 32];
    length_chunk[..8].copy_from_slice(&(length as u64).to_le_bytes());
    FixedBytes(hash_pair(&root.0, &length_chunk))
}

/// Root of an SSZ-encoded `Bitlist[max_len]` (delimiter bit included).
pub fn bitlist_root(encoded: &[u8], max_len: usize) -> Result<Root> {
    let last = *encoded
        .last()
        .ok_or_else(|| VigilError::invalid("bitlist must not be empty"))?;
    if last == 0 {
        return Err(VigilError::invalid("bitlist is missing its delimiter bit"));
    }
    let delimiter = 7 - last.leading_zeros() as usize;
    let length = (encoded.len() - 1) * 8 + delimiter;
    if length > max_len {
        return Err(VigilError::invalid(format!(
            "bitlist length {length} exceeds limit {max_len}"
        )));
    }

    let mut bits = encoded.to_vec();
    if let Some(last) = bits.last_mut() {
        *last &= !(1u8 << delimiter);
    }
    if delimiter == 0 {
        bits.pop();
    }

    let limit = max_len.div_ceil(256);
    let root = merkleize(&pack_bytes(&bits), Some(limit))?;
    Ok(mix_in_length(&root, length))
}

/// Root of an SSZ-encoded `Bitvector[len]`.
pub fn bitvector_root(encoded: &[u8], len: usize) -> Result<Root> {
    if encoded.len() != len.div_ceil(8) {
        return Err(VigilError::invalid(format!(
            "bitvector of {len} bits needs {} bytes, got {}",
            len.div_ceil(8),
            encoded.len()
        )));
    }
    merkleize(&pack_bytes(encoded), Some(len.div_ceil(256)))
}

/// `compute_domain(domain_type, fork_version, genesis_validators_root)`
pub fn compute_domain(
    domain_type: DomainType,
    fork_version: Version,
    genesis_validators_root: Root,
) -> Root {
    let fork_data_root = container_root(&[fork_version.tree_hash_root(), genesis_validators_root]);
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&domain_type.0);
    domain[4..].copy_from_slice(&fork_data_root.0[..28]);
    FixedBytes(domain)
}

/// `compute_signing_root(object_root, domain)`
pub fn compute_signing_root(object_root: Root, domain: Root) -> Root {
    container_root(&[object_root, domain])
}
