//! `export` and `import` of slashing protection interchange files

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use vigil_core::SignerIdentifier;
use vigil_protection::{ImportSummary, Interchange, SlashingProtection};

use super::open_protection;
use crate::config::VigilConfig;

/// Arguments of `export`
#[derive(Debug, Args)]
pub struct ExportArgs {
    /// File to write
    #[arg(long)]
    pub to: PathBuf,

    /// Only export these public keys
    #[arg(long, value_delimiter = ',')]
    pub pubkeys: Vec<String>,
}

/// Arguments of `import`
#[derive(Debug, Args)]
pub struct ImportArgs {
    /// File to read
    #[arg(long)]
    pub from: PathBuf,
}

/// Write the history of every validator, or of `--pubkeys`, to a file.
pub async fn export(args: ExportArgs, config: &VigilConfig) -> Result<usize> {
    let filter = if args.pubkeys.is_empty() {
        None
    } else {
        let keys = args
            .pubkeys
            .iter()
            .map(|key| SignerIdentifier::parse(key).with_context(|| format!("public key {key}")))
            .collect::<Result<BTreeSet<_>>>()?;
        Some(keys)
    };

    let protection = open_protection(config)?;
    let document = protection.export(filter).await?;
    document
        .write_file(&args.to)
        .with_context(|| format!("failed to write {}", args.to.display()))?;
    info!(
        validators = document.data.len(),
        path = %args.to.display(),
        "slashing protection data exported"
    );
    Ok(document.data.len())
}

/// Merge an interchange file into the database.
pub async fn import(args: ImportArgs, config: &VigilConfig) -> Result<ImportSummary> {
    let document = Interchange::from_file(&args.from)
        .with_context(|| format!("failed to read {}", args.from.display()))?;
    let protection = open_protection(config)?;
    let summary = protection.import(document).await?;
    info!(
        validators = summary.validators,
        blocks = summary.blocks_imported,
        attestations = summary.attestations_imported,
        skipped = summary.blocks_skipped + summary.attestations_skipped,
        "slashing protection data imported"
    );
    Ok(summary)
}
