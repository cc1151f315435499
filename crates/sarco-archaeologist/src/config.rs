//! Configuration for the archaeologist service

use std::path::PathBuf;
use std::time::Duration;

use sarco_keys::MasterSeed;
use sarco_types::AgentIdentity;
use serde::{Deserialize, Serialize};

use crate::error::{ArchaeologistError, Result};
use crate::retry::RetryPolicy;

/// Main archaeologist configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchaeologistConfig {
    /// Ledger address of this archaeologist (hex)
    #[serde(default)]
    pub identity: String,

    /// Key material
    #[serde(default)]
    pub keys: KeyConfig,

    /// Unwrap scheduling and retries
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Startup replay
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Payload storage gateway
    #[serde(default)]
    pub storage: StorageConfig,

    /// Optional file recording the last known key index
    #[serde(default)]
    pub index_cache_path: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ArchaeologistConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            keys: KeyConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconcile: ReconcileConfig::default(),
            storage: StorageConfig::default(),
            index_cache_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Key material configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Hex-encoded 32-byte master seed
    #[serde(default)]
    pub seed: String,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Attempts per external call before an unwrap is abandoned
    #[serde(default = "default_unwrap_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff growth factor
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_unwrap_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Ledger reads in flight during replay
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,

    /// Attempts per ledger read before replay is aborted
    #[serde(default = "default_read_attempts")]
    pub max_read_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            read_concurrency: default_read_concurrency(),
            max_read_attempts: default_read_attempts(),
        }
    }
}

impl ReconcileConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_read_attempts,
            ..RetryPolicy::default()
        }
    }
}

/// Storage gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL payloads are fetched from
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_unwrap_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_read_concurrency() -> usize {
    8
}

fn default_read_attempts() -> u32 {
    3
}

fn default_gateway_url() -> String {
    "https://arweave.net".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ArchaeologistConfig {
    /// Load configuration from defaults, an optional file, then `ARCH_` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_err = |e: config::ConfigError| ArchaeologistError::Config(e.to_string());

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&ArchaeologistConfig::default()).map_err(config_err)?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Nested keys use a double underscore: ARCH_SCHEDULER__MAX_ATTEMPTS
        builder = builder.add_source(
            config::Environment::with_prefix("ARCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value the service cannot start without.
    pub fn validate(&self) -> Result<()> {
        self.agent_identity()?;
        self.master_seed()?;

        if self.scheduler.max_attempts == 0 || self.reconcile.max_read_attempts == 0 {
            return Err(ArchaeologistError::Config(
                "attempt budgets must be at least 1".to_string(),
            ));
        }
        if self.reconcile.read_concurrency == 0 {
            return Err(ArchaeologistError::Config(
                "read_concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduler.backoff_multiplier < 1.0 {
            return Err(ArchaeologistError::Config(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn agent_identity(&self) -> Result<AgentIdentity> {
        Ok(self.identity.parse::<AgentIdentity>()?)
    }

    pub fn master_seed(&self) -> Result<MasterSeed> {
        Ok(self.keys.seed.parse::<MasterSeed>()?)
    }
}
