//! Signer configuration
//!
//! Values come from three layers, later ones winning: the TOML file, `VIGIL_*`
//! environment variables and command line flags. Every field has a default so
//! an empty file is a valid configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_core::Version;
use vigil_keys::{LoaderConfig, ProxyKeysConfig};
use vigil_protection::{PruningConfig, StoreConfig};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// Environment variable has an unusable value
    #[error("invalid value for {name}: {message}")]
    Env {
        /// Variable name
        name: String,
        /// Description
        message: String,
    },

    /// Values are out of range or inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// HTTP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 9000)),
        }
    }
}

/// Key loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeysConfig {
    /// Directory of metadata documents; imported keystores land here too
    pub directory: PathBuf,
    /// Metadata file extension
    pub extension: String,
    /// Concurrent decode batches; unset uses every core
    pub parallelism: Option<usize>,
    /// Smallest batch of files per decode task
    pub min_batch_size: usize,
    /// Limit on decoding one file, in seconds
    pub decode_timeout_secs: u64,
    /// Root of proxy keystores
    pub proxy_directory: Option<PathBuf>,
    /// Password file of proxy keystores
    pub proxy_password_file: Option<PathBuf>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("keys"),
            extension: "toml".to_string(),
            parallelism: None,
            min_batch_size: 20,
            decode_timeout_secs: 30,
            proxy_directory: None,
            proxy_password_file: None,
        }
    }
}

/// Chain parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Fork version at genesis
    pub genesis_fork_version: Version,
    /// Slots per epoch
    pub slots_per_epoch: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            genesis_fork_version: Version::ZERO,
            slots_per_epoch: 32,
        }
    }
}

/// Slashing protection database and pruning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlashingProtectionConfig {
    /// Consult the database before signing blocks and attestations
    pub enabled: bool,
    /// SQLite file
    pub database: PathBuf,
    /// Open connections
    pub pool_size: usize,
    /// Wait for a locked database, in milliseconds
    pub statement_timeout_ms: u64,
    /// Run the pruner
    pub pruning_enabled: bool,
    /// Prune once at startup
    pub pruning_at_boot: bool,
    /// Time between pruning runs, in seconds
    pub pruning_interval_secs: u64,
    /// Epochs of history kept per validator
    pub pruning_epochs_to_keep: u64,
}

impl Default for SlashingProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: PathBuf::from("slashing-protection.db"),
            pool_size: 4,
            statement_timeout_ms: 5_000,
            pruning_enabled: false,
            pruning_at_boot: true,
            pruning_interval_secs: 24 * 60 * 60,
            pruning_epochs_to_keep: 10_000,
        }
    }
}

/// Key manager API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyManagerConfig {
    /// Serve `/eth/v1/keystores`
    pub enabled: bool,
}

/// Complete signer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VigilConfig {
    /// HTTP server
    pub server: ServerConfig,
    /// Key loading
    pub keys: KeysConfig,
    /// Chain parameters
    pub network: NetworkConfig,
    /// Slashing protection
    pub slashing_protection: SlashingProtectionConfig,
    /// Key manager
    pub key_manager: KeyManagerConfig,
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Env {
        name: name.to_string(),
        message: e.to_string(),
    })
}

impl VigilConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `VIGIL_*` variables from the process environment.
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `VIGIL_*` overrides from `vars`; other names are ignored.
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix("VIGIL_") else {
                continue;
            };
            match key {
                "LISTEN" => self.server.listen = parse_env(&name, &value)?,
                "KEYS_DIRECTORY" => self.keys.directory = PathBuf::from(value),
                "KEYS_PARALLELISM" => self.keys.parallelism = Some(parse_env(&name, &value)?),
                "GENESIS_FORK_VERSION" => {
                    self.network.genesis_fork_version = parse_env(&name, &value)?;
                }
                "SLOTS_PER_EPOCH" => self.network.slots_per_epoch = parse_env(&name, &value)?,
                "SLASHING_PROTECTION_ENABLED" => {
                    self.slashing_protection.enabled = parse_env(&name, &value)?;
                }
                "SLASHING_PROTECTION_DATABASE" => {
                    self.slashing_protection.database = PathBuf::from(value);
                }
                "PRUNING_ENABLED" => {
                    self.slashing_protection.pruning_enabled = parse_env(&name, &value)?;
                }
                "KEY_MANAGER_ENABLED" => self.key_manager.enabled = parse_env(&name, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.keys.extension.is_empty() {
            return invalid("keys.extension must not be empty");
        }
        if self.keys.parallelism == Some(0) {
            return invalid("keys.parallelism must be positive");
        }
        if self.keys.min_batch_size == 0 {
            return invalid("keys.min_batch_size must be positive");
        }
        if self.keys.decode_timeout_secs == 0 {
            return invalid("keys.decode_timeout_secs must be positive");
        }
        if self.keys.proxy_directory.is_some() != self.keys.proxy_password_file.is_some() {
            return invalid("keys.proxy_directory and keys.proxy_password_file go together");
        }
        if self.network.slots_per_epoch == 0 {
            return invalid("network.slots_per_epoch must be positive");
        }

        let protection = &self.slashing_protection;
        if protection.pool_size == 0 {
            return invalid("slashing_protection.pool_size must be positive");
        }
        if protection.pruning_enabled {
            if !protection.enabled {
                return invalid("pruning needs slashing protection enabled");
            }
            if protection.pruning_interval_secs == 0 {
                return invalid("slashing_protection.pruning_interval_secs must be positive");
            }
            if protection.pruning_epochs_to_keep == 0 {
                return invalid("slashing_protection.pruning_epochs_to_keep must be positive");
            }
        }
        Ok(())
    }

    /// Loader settings.
    pub fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::new(&self.keys.directory);
        config.extension = self.keys.extension.clone();
        config.parallelism = self.keys.parallelism;
        config.min_batch_size = self.keys.min_batch_size;
        config.decode_timeout = Duration::from_secs(self.keys.decode_timeout_secs);
        config
    }

    /// Proxy key settings, when configured.
    pub fn proxy_keys(&self) -> Option<ProxyKeysConfig> {
        match (&self.keys.proxy_directory, &self.keys.proxy_password_file) {
            (Some(directory), Some(password_file)) => Some(ProxyKeysConfig {
                directory: directory.clone(),
                password_file: password_file.clone(),
            }),
            _ => None,
        }
    }

    /// Database settings.
    pub fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::new(&self.slashing_protection.database);
        config.pool_size = self.slashing_protection.pool_size;
        config.busy_timeout = Duration::from_millis(self.slashing_protection.statement_timeout_ms);
        config
    }

    /// Pruner settings.
    pub fn pruning_config(&self) -> PruningConfig {
        PruningConfig {
            epochs_to_keep: self.slashing_protection.pruning_epochs_to_keep,
            slots_per_epoch: self.network.slots_per_epoch,
            interval: Duration::from_secs(self.slashing_protection.pruning_interval_secs),
            at_boot: self.slashing_protection.pruning_at_boot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_file_is_the_default() {
        let config = VigilConfig::from_toml("").unwrap();
        assert_eq!(config, VigilConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn parses_sections() {
        let config = VigilConfig::from_toml(
            r#"
            [server]
            listen = "0.0.0.0:9100"

            [keys]
            directory = "/var/lib/vigil/keys"
            parallelism = 8

            [network]
            genesis_fork_version = "0x01017000"

            [slashing_protection]
            pruning_enabled = true
            pruning_epochs_to_keep = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen.port(), 9100);
        assert_eq!(config.keys.parallelism, Some(8));
        assert_eq!(
            config.network.genesis_fork_version,
            Version::from([0x01, 0x01, 0x70, 0x00])
        );
        assert_eq!(config.pruning_config().epochs_to_keep, 500);
        assert_eq!(config.loader_config().parallelism, Some(8));
        config.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(VigilConfig::from_toml("[keys]\ndirectroy = \"x\"").is_err());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = VigilConfig::default();
        config
            .merge_with_vars([
                ("VIGIL_LISTEN".to_string(), "127.0.0.1:9300".to_string()),
                ("VIGIL_KEY_MANAGER_ENABLED".to_string(), "true".to_string()),
                ("VIGIL_SLOTS_PER_EPOCH".to_string(), "8".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();
        assert_eq!(config.server.listen.port(), 9300);
        assert!(config.key_manager.enabled);
        assert_eq!(config.network.slots_per_epoch, 8);

        assert_matches!(
            config.merge_with_vars([("VIGIL_SLOTS_PER_EPOCH".to_string(), "many".to_string())]),
            Err(ConfigError::Env { .. })
        );
    }

    #[test]
    fn validation_catches_bad_ranges() {
        let mut config = VigilConfig::default();
        config.network.slots_per_epoch = 0;
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));

        let mut config = VigilConfig::default();
        config.keys.proxy_directory = Some(PathBuf::from("proxies"));
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));

        let mut config = VigilConfig::default();
        config.slashing_protection.enabled = false;
        config.slashing_protection.pruning_enabled = true;
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
    }
}
