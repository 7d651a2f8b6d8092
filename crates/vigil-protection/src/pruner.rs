//! Pruning of old signing history
//!
//! For each validator the cut-off is derived from its own newest record, not
//! from wall-clock time, so a node that was offline for weeks prunes exactly
//! what it would have pruned had it stayed up. Before records below the
//! cut-off are deleted the watermark is raised to the oldest retained record;
//! it is never lowered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use vigil_core::TaskRegistry;

use crate::dao;
use crate::error::{ProtectionError, Result};
use crate::store::Store;

/// Retention and schedule
#[derive(Debug, Clone)]
pub struct PruningConfig {
    /// Epochs of history retained behind each validator's newest record
    pub epochs_to_keep: u64,
    /// Slots per epoch, converting retention to slots for blocks
    pub slots_per_epoch: u64,
    /// Time between runs
    pub interval: Duration,
    /// Run once immediately when scheduled
    pub at_boot: bool,
}

/// Rows removed by one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Validators inspected
    pub validators: usize,
    /// Block records deleted
    pub blocks_deleted: usize,
    /// Attestation records deleted
    pub attestations_deleted: usize,
}

/// Deletes history older than the retention window
#[derive(Debug)]
pub struct Pruner {
    store: Arc<Store>,
    config: PruningConfig,
    running: tokio::sync::Mutex<()>,
}

impl Pruner {
    /// Pruner over `store`; retention values must be positive.
    pub fn new(store: Arc<Store>, config: PruningConfig) -> Result<Self> {
        if config.epochs_to_keep == 0 {
            return Err(ProtectionError::invalid_argument(
                "epochs to keep must be positive",
            ));
        }
        if config.slots_per_epoch == 0 {
            return Err(ProtectionError::invalid_argument(
                "slots per epoch must be positive",
            ));
        }
        Ok(Self {
            store,
            config,
            running: tokio::sync::Mutex::new(()),
        })
    }

    /// Prune every validator. Returns `None` when a run is already in progress.
    pub async fn prune(&self) -> Result<Option<PruneReport>> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("pruning already in progress, skipping");
            return Ok(None);
        };

        let start = Instant::now();
        let store = self.store.clone();
        let config = self.config.clone();
        let report = tokio::task::spawn_blocking(move || prune_all(&store, &config))
            .await
            .map_err(|e| ProtectionError::Task {
                message: e.to_string(),
            })??;

        info!(
            validators = report.validators,
            blocks = report.blocks_deleted,
            attestations = report.attestations_deleted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "slashing protection pruning finished"
        );
        Ok(Some(report))
    }

    /// Run [`Pruner::prune`] on `tasks` every configured interval.
    pub fn schedule(self: Arc<Self>, tasks: &TaskRegistry) {
        let interval = self.config.interval;
        let at_boot = self.config.at_boot;
        tasks.spawn_interval_until(interval, at_boot, move || {
            let pruner = self.clone();
            async move {
                if let Err(e) = pruner.prune().await {
                    error!("slashing protection pruning failed: {e}");
                }
                true
            }
        });
    }
}

fn prune_all(store: &Store, config: &PruningConfig) -> Result<PruneReport> {
    let validators = store.transaction(|tx| dao::all_validators(tx))?;
    let slots_to_keep = config.epochs_to_keep.saturating_mul(config.slots_per_epoch);

    let mut report = PruneReport {
        validators: validators.len(),
        ..Default::default()
    };
    for validator in validators {
        let (blocks, attestations) = store.transaction(|tx| {
            let mut blocks = 0;
            if let Some(max_slot) = dao::max_block_slot(tx, validator.id)? {
                let cutoff = max_slot.saturating_sub(slots_to_keep);
                if cutoff > 0 {
                    if let Some(oldest) = dao::nearest_block_at_or_above(tx, validator.id, cutoff)? {
                        dao::raise_slot_watermark(tx, validator.id, oldest.slot)?;
                    }
                    blocks = dao::delete_blocks_below(tx, validator.id, cutoff)?;
                }
            }

            let mut attestations = 0;
            if let Some(max_target) = dao::max_attestation_target(tx, validator.id)? {
                let cutoff = max_target.saturating_sub(config.epochs_to_keep);
                if cutoff > 0 {
                    if let Some(oldest) =
                        dao::nearest_attestation_at_or_above(tx, validator.id, cutoff)?
                    {
                        dao::raise_epoch_watermarks(
                            tx,
                            validator.id,
                            oldest.source_epoch,
                            oldest.target_epoch,
                        )?;
                    }
                    attestations = dao::delete_attestations_below(tx, validator.id, cutoff)?;
                }
            }
            Ok((blocks, attestations))
        })?;

        if blocks + attestations > 0 {
            debug!(
                validator = %validator.public_key,
                blocks,
                attestations,
                "pruned signing history"
            );
        }
        report.blocks_deleted += blocks;
        report.attestations_deleted += attestations;
    }
    Ok(report)
}
