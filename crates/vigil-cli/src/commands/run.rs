//! `run`: serve the signer until interrupted

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};
use vigil_api::{ApiContext, ApiServer};
use vigil_core::TaskRegistry;
use vigil_keys::{
    KeystoreFileManager, LoadReport, SecretProviders, SignerFactory, SignerLoader, SignerRegistry,
};
use vigil_protection::SlashingProtection;
use vigil_signing::{
    CommitBoostSigner, KeyManager, ProtectionRegistrar, SigningOrchestrator, SigningRootCalculator,
};

use super::open_protection;
use crate::config::VigilConfig;

/// Flags of `run`; each overrides the configuration
#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Listen address
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Key metadata directory
    #[arg(long)]
    pub key_directory: Option<PathBuf>,

    /// Slashing protection database
    #[arg(long)]
    pub slashing_protection_database: Option<PathBuf>,

    /// Sign without slashing protection
    #[arg(long)]
    pub no_slashing_protection: bool,

    /// Serve the key manager API
    #[arg(long)]
    pub key_manager: bool,
}

impl RunArgs {
    /// Apply the flags on top of `config`.
    pub fn apply(&self, config: &mut VigilConfig) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(directory) = &self.key_directory {
            config.keys.directory = directory.clone();
        }
        if let Some(database) = &self.slashing_protection_database {
            config.slashing_protection.database = database.clone();
        }
        if self.no_slashing_protection {
            config.slashing_protection.enabled = false;
            config.slashing_protection.pruning_enabled = false;
        }
        if self.key_manager {
            config.key_manager.enabled = true;
        }
    }
}

/// Registry over the configured key directory. Requires a Tokio runtime.
pub fn build_registry(
    config: &VigilConfig,
    protection: Option<Arc<dyn SlashingProtection>>,
) -> SignerRegistry {
    let loader = SignerLoader::new(
        config.loader_config(),
        SignerFactory::new(SecretProviders::with_defaults()),
    );
    let mut builder = SignerRegistry::builder().loader(loader);
    if let Some(proxy_keys) = config.proxy_keys() {
        builder = builder.proxy_keys(proxy_keys);
    }
    if let Some(protection) = protection {
        builder = builder.listener(Arc::new(ProtectionRegistrar::new(protection)));
    }
    builder.spawn()
}

/// Initial key load. An unreadable key directory aborts startup; broken
/// individual files do not.
pub async fn load_keys(registry: &SignerRegistry) -> Result<LoadReport> {
    let report = registry.try_load().await.context("initial key load failed")?;
    info!(loaded = report.loaded, errors = report.errors, "keys loaded");
    Ok(report)
}

/// Start every component and serve until ctrl-c.
pub async fn run(config: &VigilConfig) -> Result<()> {
    let engine = if config.slashing_protection.enabled {
        Some(Arc::new(open_protection(config)?))
    } else {
        warn!("slashing protection is disabled; blocks and attestations are signed unchecked");
        None
    };
    let protection = engine
        .clone()
        .map(|engine| engine as Arc<dyn SlashingProtection>);

    let registry = build_registry(config, protection.clone());
    if let Err(e) = load_keys(&registry).await {
        registry.shutdown().await;
        return Err(e);
    }

    let tasks = Arc::new(TaskRegistry::new());
    if let Some(engine) = engine.filter(|_| config.slashing_protection.pruning_enabled) {
        let pruner = Arc::new(engine.pruner(config.pruning_config())?);
        pruner.schedule(&tasks);
        info!(
            interval_secs = config.slashing_protection.pruning_interval_secs,
            "pruning scheduled"
        );
    }

    let roots = SigningRootCalculator::new(
        config.network.genesis_fork_version,
        config.network.slots_per_epoch,
    )?;
    let key_manager = config.key_manager.enabled.then(|| {
        KeyManager::new(
            registry.clone(),
            protection.clone(),
            KeystoreFileManager::new(&config.keys.directory),
        )
    });
    let mut commit_boost =
        CommitBoostSigner::new(registry.clone(), config.network.genesis_fork_version);
    if let Some(proxy_keys) = config.proxy_keys() {
        commit_boost = commit_boost.with_proxy_keys(proxy_keys);
    }
    let context = ApiContext {
        orchestrator: SigningOrchestrator::new(registry.clone(), protection.clone(), roots),
        commit_boost,
        key_manager,
        protection,
        tasks: tasks.clone(),
    };

    ApiServer::new(config.server.listen, context)
        .serve(shutdown_signal())
        .await
        .context("API server failed")?;

    tasks.shutdown();
    registry.shutdown().await;
    info!("signer stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("listening for ctrl-c failed: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
