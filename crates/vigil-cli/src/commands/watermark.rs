//! `watermark-repair`

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;
use vigil_protection::HighWatermark;

use super::open_protection;
use crate::config::VigilConfig;

/// Arguments of `watermark-repair`
#[derive(Debug, Args)]
pub struct WatermarkRepairArgs {
    /// Slot to raise block watermarks to
    #[arg(long)]
    pub slot: Option<u64>,

    /// Epoch to raise attestation watermarks to
    #[arg(long)]
    pub epoch: Option<u64>,

    /// Store `--slot`/`--epoch` as the high watermark instead
    #[arg(long, conflicts_with = "remove_high_watermark")]
    pub set_high_watermark: bool,

    /// Clear the high watermark
    #[arg(long)]
    pub remove_high_watermark: bool,
}

/// Raise low watermarks or manage the high watermark.
pub async fn repair(args: WatermarkRepairArgs, config: &VigilConfig) -> Result<()> {
    if args.slot.is_none() && args.epoch.is_none() && !args.remove_high_watermark {
        bail!("nothing to do: pass --slot, --epoch or --remove-high-watermark");
    }
    let protection = open_protection(config)?;

    if args.remove_high_watermark {
        protection.remove_high_watermark().await?;
        info!("high watermark removed");
        if args.slot.is_none() && args.epoch.is_none() {
            return Ok(());
        }
    }

    if args.set_high_watermark {
        let high = HighWatermark {
            slot: args.slot,
            epoch: args.epoch,
        };
        protection.set_high_watermark(high).await?;
        info!(slot = ?args.slot, epoch = ?args.epoch, "high watermark set");
    } else {
        let updated = protection
            .update_low_watermarks(args.slot, args.epoch)
            .await?;
        info!(validators = updated, slot = ?args.slot, epoch = ?args.epoch, "low watermarks raised");
    }
    Ok(())
}
