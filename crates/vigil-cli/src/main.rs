//! The `vigil` binary

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vigil_cli::commands::interchange::{self, ExportArgs, ImportArgs};
use vigil_cli::commands::run::{self, RunArgs};
use vigil_cli::commands::watermark::{self, WatermarkRepairArgs};
use vigil_cli::VigilConfig;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Vigil - remote signer with slashing protection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the signer API
    Run(RunArgs),
    /// Export slashing protection data
    Export(ExportArgs),
    /// Import slashing protection data
    Import(ImportArgs),
    /// Repair low watermarks or manage the high watermark
    WatermarkRepair(WatermarkRepairArgs),
}

fn load_config(cli: &Cli) -> Result<VigilConfig> {
    let mut config = match &cli.config {
        Some(path) => VigilConfig::load_from_file(path)?,
        None => VigilConfig::default(),
    };
    config.merge_with_env()?;
    if let Commands::Run(args) = &cli.command {
        args.apply(&mut config);
    }
    config.validate().context("configuration rejected")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Run(_) => run::run(&config).await?,
        Commands::Export(args) => {
            interchange::export(args, &config).await?;
        }
        Commands::Import(args) => {
            interchange::import(args, &config).await?;
        }
        Commands::WatermarkRepair(args) => watermark::repair(args, &config).await?,
    }
    Ok(())
}
