//! Configuration management for Quotakeeper.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QuotaError, Result};
use crate::store::StoreKind;

/// Environment variable prefix for overrides, e.g. `QUOTAKEEPER__DEFAULT_STORE=redis`.
pub const ENV_PREFIX: &str = "QUOTAKEEPER";

/// Main configuration for Quotakeeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Backend used when a rule names none
    #[serde(default = "default_store")]
    pub default_store: StoreKind,

    /// Sorted-set backend connection
    #[serde(default)]
    pub redis: Option<ConnectionConfig>,

    /// Key-value cache backend connection
    #[serde(default)]
    pub memcached: Option<ConnectionConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_store: default_store(),
            redis: None,
            memcached: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_store() -> StoreKind {
    StoreKind::Memory
}

/// Connection settings for a remote backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0` or `memcache://127.0.0.1:11211`
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Report exceeded limits and store errors through the monitor
    #[serde(default = "default_monitor")]
    pub monitor: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            monitor: default_monitor(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_monitor() -> bool {
    true
}

impl QuotaConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a file, with `QUOTAKEEPER__*` environment overrides.
    ///
    /// Without a path only the environment and defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| QuotaError::Config(format!("Failed to load configuration: {}", e)))
    }
}
