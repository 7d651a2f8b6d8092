//! Registry to protection store bridge

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use vigil_core::SignerIdentifier;
use vigil_keys::RegistryListener;
use vigil_protection::SlashingProtection;

/// Creates protection store rows for every key the registry loads, so the
/// first signing request for a key does not pay for the insert.
pub struct ProtectionRegistrar {
    protection: Arc<dyn SlashingProtection>,
}

impl ProtectionRegistrar {
    /// Registrar writing to `protection`.
    pub fn new(protection: Arc<dyn SlashingProtection>) -> Self {
        Self { protection }
    }
}

#[async_trait]
impl RegistryListener for ProtectionRegistrar {
    async fn on_signers_loaded(&self, identifiers: &[SignerIdentifier]) {
        match self.protection.register_validators(identifiers).await {
            Ok(()) => debug!(validators = identifiers.len(), "validators registered after load"),
            Err(e) => error!("registering loaded validators failed: {e}"),
        }
    }
}
