//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod storage;
mod topology;

pub use messaging::{AmqpConfig, MessagingConfig, MessagingType, QueuesConfig, RetryConfig};
pub use storage::{SqliteConfig, StorageConfig, StorageType};
pub use topology::{StartupConfig, TopologyConfig, DEFAULT_DISCOVERY_PAGE_SIZE};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "MOV_CONFIG";

/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "MOV";

/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "MOV_LOG";

use serde::Deserialize;

/// Errors raised while assembling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid designed topology in {path}: {source}")]
    DesignedTopology {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging configuration.
    pub messaging: MessagingConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Topology behavior and designed connections.
    pub topology: TopologyConfig,
    /// Reconciliation of state left by a previous run.
    pub startup: StartupConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
