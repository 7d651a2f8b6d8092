//! Subcommands

pub mod interchange;
pub mod run;
pub mod watermark;

use anyhow::{Context, Result};
use vigil_protection::DbSlashingProtection;

use crate::config::VigilConfig;

/// Open the protection database named by `config`, checking its version.
pub fn open_protection(config: &VigilConfig) -> Result<DbSlashingProtection> {
    let store = config.store_config();
    DbSlashingProtection::open(&store).with_context(|| {
        format!(
            "failed to open slashing protection database {}",
            store.path.display()
        )
    })
}
