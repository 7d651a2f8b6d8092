//! EIP-3076 slashing protection interchange, format version 5
//!
//! Import runs in one transaction: either every validator in the document is
//! applied or none is. Records already present are skipped, records that
//! conflict with the database are logged and skipped, and every imported
//! validator's watermarks are raised to the highest slot and epochs the
//! document lists for it.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_core::serde_utils::quoted_u64;
use vigil_core::{Epoch, Root, SignerIdentifier, Slot};

use crate::dao;
use crate::error::{ProtectionError, Result};
use crate::models::{SignedAttestation, SignedBlock};

/// Only supported `interchange_format_version`
pub const FORMAT_VERSION: &str = "5";

/// A complete interchange document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interchange {
    /// Format and chain
    pub metadata: InterchangeMetadata,
    /// Per-validator history
    pub data: Vec<InterchangeValidator>,
}

/// Document header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterchangeMetadata {
    /// Must be [`FORMAT_VERSION`]
    pub interchange_format_version: String,
    /// Chain the history belongs to
    pub genesis_validators_root: Root,
}

/// History of one validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterchangeValidator {
    /// Validator public key
    pub pubkey: SignerIdentifier,
    /// Signed block proposals
    #[serde(default)]
    pub signed_blocks: Vec<InterchangeBlock>,
    /// Signed attestations
    #[serde(default)]
    pub signed_attestations: Vec<InterchangeAttestation>,
}

/// A signed block in the interchange format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterchangeBlock {
    /// Block slot
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    /// Optional signing root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<Root>,
}

/// A signed attestation in the interchange format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterchangeAttestation {
    /// Source epoch
    #[serde(with = "quoted_u64")]
    pub source_epoch: Epoch,
    /// Target epoch
    #[serde(with = "quoted_u64")]
    pub target_epoch: Epoch,
    /// Optional signing root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_root: Option<Root>,
}

impl Interchange {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a document from `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| ProtectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Write the document to `path`.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|source| ProtectionError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Counts from one import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Validators in the document
    pub validators: usize,
    /// Block records written
    pub blocks_imported: usize,
    /// Block records already present or conflicting
    pub blocks_skipped: usize,
    /// Attestation records written
    pub attestations_imported: usize,
    /// Attestation records already present or conflicting
    pub attestations_skipped: usize,
}

/// Apply `interchange` using `conn`, which must be inside a transaction.
pub(crate) fn import(conn: &Connection, interchange: &Interchange) -> Result<ImportSummary> {
    if interchange.metadata.interchange_format_version != FORMAT_VERSION {
        return Err(ProtectionError::interchange(format!(
            "expected interchange_format_version {FORMAT_VERSION}, found {}",
            interchange.metadata.interchange_format_version
        )));
    }
    let supplied = interchange.metadata.genesis_validators_root;
    if !dao::check_genesis_validators_root(conn, &supplied)? {
        let existing = dao::genesis_validators_root(conn)?.unwrap_or_default();
        return Err(ProtectionError::GenesisRootMismatch { existing, supplied });
    }

    let mut summary = ImportSummary {
        validators: interchange.data.len(),
        ..Default::default()
    };
    for entry in &interchange.data {
        let validator = dao::insert_validator_if_missing(conn, &entry.pubkey)?;
        import_blocks(conn, validator.id, entry, &mut summary)?;
        import_attestations(conn, validator.id, entry, &mut summary)?;
    }
    info!(
        validators = summary.validators,
        blocks = summary.blocks_imported,
        attestations = summary.attestations_imported,
        "slashing protection data imported"
    );
    Ok(summary)
}

fn import_blocks(
    conn: &Connection,
    validator_id: i64,
    entry: &InterchangeValidator,
    summary: &mut ImportSummary,
) -> Result<()> {
    for block in &entry.signed_blocks {
        match dao::find_block(conn, validator_id, block.slot)? {
            None => {
                dao::insert_block(
                    conn,
                    validator_id,
                    &SignedBlock {
                        slot: block.slot,
                        signing_root: block.signing_root,
                    },
                )?;
                summary.blocks_imported += 1;
            }
            Some(existing) if existing.signing_root == block.signing_root => {
                debug!(pubkey = %entry.pubkey, slot = block.slot, "block already on record");
                summary.blocks_skipped += 1;
            }
            Some(_) => {
                warn!(
                    pubkey = %entry.pubkey,
                    slot = block.slot,
                    "imported block conflicts with an existing record, skipping"
                );
                summary.blocks_skipped += 1;
            }
        }
    }
    if let Some(max_slot) = entry.signed_blocks.iter().map(|b| b.slot).max() {
        dao::raise_slot_watermark(conn, validator_id, max_slot)?;
    }
    Ok(())
}

fn import_attestations(
    conn: &Connection,
    validator_id: i64,
    entry: &InterchangeValidator,
    summary: &mut ImportSummary,
) -> Result<()> {
    for (index, attestation) in entry.signed_attestations.iter().enumerate() {
        let (source, target) = (attestation.source_epoch, attestation.target_epoch);
        if source > target {
            return Err(ProtectionError::interchange(format!(
                "attestation #{index} of {} has source epoch {source} after target epoch {target}",
                entry.pubkey
            )));
        }

        let conflicts = dao::find_attestation_conflicts(conn, validator_id, source, target)?;
        if conflicts.is_empty() {
            dao::insert_attestation(
                conn,
                validator_id,
                &SignedAttestation {
                    source_epoch: source,
                    target_epoch: target,
                    signing_root: attestation.signing_root,
                },
            )?;
            summary.attestations_imported += 1;
            continue;
        }

        let duplicate = conflicts.iter().any(|existing| {
            existing.source_epoch == source
                && existing.target_epoch == target
                && existing.signing_root == attestation.signing_root
        });
        if duplicate {
            debug!(pubkey = %entry.pubkey, source, target, "attestation already on record");
        } else {
            warn!(
                pubkey = %entry.pubkey,
                source,
                target,
                "imported attestation conflicts with an existing record, skipping"
            );
        }
        summary.attestations_skipped += 1;
    }

    let max_source = entry.signed_attestations.iter().map(|a| a.source_epoch).max();
    let max_target = entry.signed_attestations.iter().map(|a| a.target_epoch).max();
    if let (Some(source), Some(target)) = (max_source, max_target) {
        dao::raise_epoch_watermarks(conn, validator_id, source, target)?;
    }
    Ok(())
}

/// Export the history of every validator, or of those in `filter`.
pub(crate) fn export(
    conn: &Connection,
    filter: Option<&BTreeSet<SignerIdentifier>>,
) -> Result<Interchange> {
    let genesis_validators_root =
        dao::genesis_validators_root(conn)?.ok_or(ProtectionError::MissingGenesisRoot)?;

    let mut data = Vec::new();
    for validator in dao::all_validators(conn)? {
        if filter.is_some_and(|keys| !keys.contains(&validator.public_key)) {
            continue;
        }
        let signed_blocks = dao::blocks_for(conn, validator.id)?
            .into_iter()
            .map(|block| InterchangeBlock {
                slot: block.slot,
                signing_root: block.signing_root,
            })
            .collect();
        let signed_attestations = dao::attestations_for(conn, validator.id)?
            .into_iter()
            .map(|attestation| InterchangeAttestation {
                source_epoch: attestation.source_epoch,
                target_epoch: attestation.target_epoch,
                signing_root: attestation.signing_root,
            })
            .collect();
        data.push(InterchangeValidator {
            pubkey: validator.public_key,
            signed_blocks,
            signed_attestations,
        });
    }
    debug!(validators = data.len(), "slashing protection data exported");

    Ok(Interchange {
        metadata: InterchangeMetadata {
            interchange_format_version: FORMAT_VERSION.to_string(),
            genesis_validators_root,
        },
        data,
    })
}
