//! Configuration settings for medsync.
//!
//! Settings are loaded from `~/.medsync/config.yaml`.

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::SyncError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Sync queue and delivery driver settings.
    pub sync: SyncConfig,
    /// Remote acceptance endpoint settings.
    pub remote: RemoteConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    /// Log filter used when `MEDSYNC_LOG` / `RUST_LOG` are unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Sync queue and delivery driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum entries claimed per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Failed attempts before an entry becomes permanently failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cooperative delay between items in a batch.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    /// Interval between background passes.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Base retry backoff; doubles per failed attempt. Zero disables backoff.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// Upper bound for the retry backoff.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

/// Remote acceptance endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// URL records are POSTed to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

fn default_log_level() -> String {
    "warn".to_string()
}

const fn default_batch_size() -> usize {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_item_delay_ms() -> u64 {
    100
}

const fn default_poll_interval_secs() -> u64 {
    30
}

const fn default_retry_backoff_secs() -> u64 {
    5
}

const fn default_max_backoff_secs() -> u64 {
    300
}

fn default_endpoint() -> String {
    "http://localhost:3001/api/records/sync".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            item_delay_ms: default_item_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.sync.batch_size == 0 {
            return Err(SyncError::Config("sync.batch_size must be at least 1".to_string()));
        }
        if self.sync.max_retries == 0 {
            return Err(SyncError::Config("sync.max_retries must be at least 1".to_string()));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::Config(
                "sync.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
