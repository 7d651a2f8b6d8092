//! Queries against the protection schema
//!
//! Every function takes a plain connection so callers decide the transaction
//! boundary. Watermark updates are upserts that only ever raise a value.

use rusqlite::{params, Connection, OptionalExtension, Row};
use vigil_core::{Epoch, Root, SignerIdentifier, Slot};

use crate::error::{ProtectionError, Result};
use crate::models::{HighWatermark, SignedAttestation, SignedBlock, SigningWatermark, Validator};

fn root_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Root>> {
    let bytes: Option<Vec<u8>> = row.get(idx)?;
    bytes
        .map(|bytes| {
            Root::from_slice(&bytes).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Blob,
                    Box::new(e),
                )
            })
        })
        .transpose()
}

fn root_param(root: &Option<Root>) -> Option<&[u8]> {
    root.as_ref().map(|root| root.as_bytes().as_slice())
}

fn validator_row(row: &Row<'_>) -> rusqlite::Result<Validator> {
    let public_key: Vec<u8> = row.get(1)?;
    Ok(Validator {
        id: row.get(0)?,
        public_key: SignerIdentifier::from_public_key(&public_key),
        enabled: row.get(2)?,
    })
}

fn block_row(row: &Row<'_>) -> rusqlite::Result<SignedBlock> {
    Ok(SignedBlock {
        slot: row.get(0)?,
        signing_root: root_column(row, 1)?,
    })
}

fn attestation_row(row: &Row<'_>) -> rusqlite::Result<SignedAttestation> {
    Ok(SignedAttestation {
        source_epoch: row.get(0)?,
        target_epoch: row.get(1)?,
        signing_root: root_column(row, 2)?,
    })
}

// Validators

pub(crate) fn find_validator(
    conn: &Connection,
    public_key: &SignerIdentifier,
) -> Result<Option<Validator>> {
    Ok(conn
        .query_row(
            "SELECT id, public_key, enabled FROM validators WHERE public_key = ?1",
            params![public_key.to_bytes()],
            validator_row,
        )
        .optional()?)
}

pub(crate) fn insert_validator_if_missing(
    conn: &Connection,
    public_key: &SignerIdentifier,
) -> Result<Validator> {
    conn.execute(
        "INSERT OR IGNORE INTO validators (public_key) VALUES (?1)",
        params![public_key.to_bytes()],
    )?;
    find_validator(conn, public_key)?.ok_or_else(|| {
        ProtectionError::Database(rusqlite::Error::QueryReturnedNoRows)
    })
}

pub(crate) fn all_validators(conn: &Connection) -> Result<Vec<Validator>> {
    let mut statement =
        conn.prepare_cached("SELECT id, public_key, enabled FROM validators ORDER BY id")?;
    let rows = statement.query_map([], validator_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn set_validator_enabled(
    conn: &Connection,
    public_key: &SignerIdentifier,
    enabled: bool,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE validators SET enabled = ?2 WHERE public_key = ?1",
        params![public_key.to_bytes(), enabled],
    )?;
    Ok(updated > 0)
}

// Metadata

pub(crate) fn genesis_validators_root(conn: &Connection) -> Result<Option<Root>> {
    Ok(conn
        .query_row(
            "SELECT genesis_validators_root FROM metadata WHERE id = 1",
            [],
            |row| root_column(row, 0),
        )
        .optional()?
        .flatten())
}

pub(crate) fn insert_genesis_validators_root(conn: &Connection, root: &Root) -> Result<()> {
    if let Some(existing) = genesis_validators_root(conn)? {
        return Err(ProtectionError::GenesisRootAlreadySet { existing });
    }
    conn.execute(
        "INSERT INTO metadata (id, genesis_validators_root) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET genesis_validators_root = excluded.genesis_validators_root",
        params![root.as_bytes().as_slice()],
    )?;
    Ok(())
}

/// Store `root` when none is set; otherwise report whether it matches.
pub(crate) fn check_genesis_validators_root(conn: &Connection, root: &Root) -> Result<bool> {
    match genesis_validators_root(conn)? {
        Some(existing) => Ok(existing == *root),
        None => {
            insert_genesis_validators_root(conn, root)?;
            Ok(true)
        }
    }
}

pub(crate) fn high_watermark(conn: &Connection) -> Result<HighWatermark> {
    Ok(conn
        .query_row(
            "SELECT high_watermark_slot, high_watermark_epoch FROM metadata WHERE id = 1",
            [],
            |row| {
                Ok(HighWatermark {
                    slot: row.get(0)?,
                    epoch: row.get(1)?,
                })
            },
        )
        .optional()?
        .unwrap_or_default())
}

pub(crate) fn set_high_watermark(conn: &Connection, high: &HighWatermark) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (id, high_watermark_slot, high_watermark_epoch) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET
           high_watermark_slot = excluded.high_watermark_slot,
           high_watermark_epoch = excluded.high_watermark_epoch",
        params![high.slot, high.epoch],
    )?;
    Ok(())
}

// Low watermarks

pub(crate) fn low_watermark(conn: &Connection, validator_id: i64) -> Result<SigningWatermark> {
    Ok(conn
        .query_row(
            "SELECT slot, source_epoch, target_epoch FROM low_watermarks WHERE validator_id = ?1",
            params![validator_id],
            |row| {
                Ok(SigningWatermark {
                    slot: row.get(0)?,
                    source_epoch: row.get(1)?,
                    target_epoch: row.get(2)?,
                })
            },
        )
        .optional()?
        .unwrap_or_default())
}

pub(crate) fn raise_slot_watermark(conn: &Connection, validator_id: i64, slot: Slot) -> Result<()> {
    conn.execute(
        "INSERT INTO low_watermarks (validator_id, slot) VALUES (?1, ?2)
         ON CONFLICT(validator_id) DO UPDATE SET slot =
           CASE WHEN slot IS NULL OR slot < excluded.slot THEN excluded.slot ELSE slot END",
        params![validator_id, slot],
    )?;
    Ok(())
}

pub(crate) fn raise_epoch_watermarks(
    conn: &Connection,
    validator_id: i64,
    source: Epoch,
    target: Epoch,
) -> Result<()> {
    conn.execute(
        "INSERT INTO low_watermarks (validator_id, source_epoch, target_epoch) VALUES (?1, ?2, ?3)
         ON CONFLICT(validator_id) DO UPDATE SET
           source_epoch = CASE WHEN source_epoch IS NULL OR source_epoch < excluded.source_epoch
                          THEN excluded.source_epoch ELSE source_epoch END,
           target_epoch = CASE WHEN target_epoch IS NULL OR target_epoch < excluded.target_epoch
                          THEN excluded.target_epoch ELSE target_epoch END",
        params![validator_id, source, target],
    )?;
    Ok(())
}

// Blocks

pub(crate) fn find_block(
    conn: &Connection,
    validator_id: i64,
    slot: Slot,
) -> Result<Option<SignedBlock>> {
    Ok(conn
        .query_row(
            "SELECT slot, signing_root FROM signed_blocks WHERE validator_id = ?1 AND slot = ?2",
            params![validator_id, slot],
            block_row,
        )
        .optional()?)
}

pub(crate) fn insert_block(conn: &Connection, validator_id: i64, block: &SignedBlock) -> Result<()> {
    conn.execute(
        "INSERT INTO signed_blocks (validator_id, slot, signing_root) VALUES (?1, ?2, ?3)",
        params![validator_id, block.slot, root_param(&block.signing_root)],
    )?;
    Ok(())
}

pub(crate) fn blocks_for(conn: &Connection, validator_id: i64) -> Result<Vec<SignedBlock>> {
    let mut statement = conn.prepare_cached(
        "SELECT slot, signing_root FROM signed_blocks WHERE validator_id = ?1 ORDER BY slot",
    )?;
    let rows = statement.query_map(params![validator_id], block_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn max_block_slot(conn: &Connection, validator_id: i64) -> Result<Option<Slot>> {
    Ok(conn.query_row(
        "SELECT MAX(slot) FROM signed_blocks WHERE validator_id = ?1",
        params![validator_id],
        |row| row.get(0),
    )?)
}

pub(crate) fn nearest_block_at_or_above(
    conn: &Connection,
    validator_id: i64,
    slot: Slot,
) -> Result<Option<SignedBlock>> {
    Ok(conn
        .query_row(
            "SELECT slot, signing_root FROM signed_blocks
             WHERE validator_id = ?1 AND slot >= ?2 ORDER BY slot LIMIT 1",
            params![validator_id, slot],
            block_row,
        )
        .optional()?)
}

pub(crate) fn delete_blocks_below(conn: &Connection, validator_id: i64, slot: Slot) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM signed_blocks WHERE validator_id = ?1 AND slot < ?2",
        params![validator_id, slot],
    )?)
}

// Attestations

/// Records sharing the target epoch or standing in a surround relation with
/// `source -> target`.
pub(crate) fn find_attestation_conflicts(
    conn: &Connection,
    validator_id: i64,
    source: Epoch,
    target: Epoch,
) -> Result<Vec<SignedAttestation>> {
    let mut statement = conn.prepare_cached(
        "SELECT source_epoch, target_epoch, signing_root FROM signed_attestations
         WHERE validator_id = ?1 AND (
             target_epoch = ?3
             OR (source_epoch < ?2 AND target_epoch > ?3)
             OR (source_epoch > ?2 AND target_epoch < ?3)
         )",
    )?;
    let rows = statement.query_map(params![validator_id, source, target], attestation_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn insert_attestation(
    conn: &Connection,
    validator_id: i64,
    attestation: &SignedAttestation,
) -> Result<()> {
    conn.execute(
        "INSERT INTO signed_attestations (validator_id, source_epoch, target_epoch, signing_root)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            validator_id,
            attestation.source_epoch,
            attestation.target_epoch,
            root_param(&attestation.signing_root)
        ],
    )?;
    Ok(())
}

pub(crate) fn attestations_for(conn: &Connection, validator_id: i64) -> Result<Vec<SignedAttestation>> {
    let mut statement = conn.prepare_cached(
        "SELECT source_epoch, target_epoch, signing_root FROM signed_attestations
         WHERE validator_id = ?1 ORDER BY target_epoch",
    )?;
    let rows = statement.query_map(params![validator_id], attestation_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn max_attestation_target(conn: &Connection, validator_id: i64) -> Result<Option<Epoch>> {
    Ok(conn.query_row(
        "SELECT MAX(target_epoch) FROM signed_attestations WHERE validator_id = ?1",
        params![validator_id],
        |row| row.get(0),
    )?)
}

pub(crate) fn nearest_attestation_at_or_above(
    conn: &Connection,
    validator_id: i64,
    target: Epoch,
) -> Result<Option<SignedAttestation>> {
    Ok(conn
        .query_row(
            "SELECT source_epoch, target_epoch, signing_root FROM signed_attestations
             WHERE validator_id = ?1 AND target_epoch >= ?2 ORDER BY target_epoch LIMIT 1",
            params![validator_id, target],
            attestation_row,
        )
        .optional()?)
}

pub(crate) fn delete_attestations_below(
    conn: &Connection,
    validator_id: i64,
    target: Epoch,
) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM signed_attestations WHERE validator_id = ?1 AND target_epoch < ?2",
        params![validator_id, target],
    )?)
}
