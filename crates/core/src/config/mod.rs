//! Configuration module for searchkeeper
//!
//! Configuration is loaded once from TOML files and/or environment variables
//! and then handed to each component as an immutable value.

mod defaults;
mod loading;

#[cfg(test)]
mod tests;

use crate::document::ImportAction;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use defaults::*;

/// Returns the path to the global configuration file
///
/// The global config is stored at `~/.searchkeeper/config.toml`.
pub fn global_config_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::config("Unable to determine home directory".to_string()))?;
    Ok(home_dir.join(".searchkeeper").join("config.toml"))
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Search service connection
    #[serde(default)]
    pub service: ServiceConfig,

    /// Batching and import behaviour
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Retry policy for import calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Physical generation management
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Dependent re-indexation
    #[serde(default)]
    pub cascade: CascadeConfig,
}

/// Connection settings for the remote search service
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL, e.g. `http://localhost:8108`
    #[serde(default = "default_service_url")]
    pub url: String,

    /// API key sent on every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Use the in-memory client instead of the network
    #[serde(default)]
    pub use_mock: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            use_mock: false,
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("use_mock", &self.use_mock)
            .finish()
    }
}

/// Indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Documents grouped into one import call by sources that chunk for us
    #[serde(default = "default_documents_per_batch")]
    pub documents_per_batch: usize,

    /// Partitions indexed concurrently when the partition spec sets no bound
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Import action: create, upsert, update, emplace
    #[serde(default = "default_import_action")]
    pub import_action: String,

    /// Field every document must carry
    #[serde(default = "default_identity_field")]
    pub identity_field: String,

    /// Field stamped with the run's ingestion time
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// Encode and count, but never call the service
    #[serde(default)]
    pub dry_run: bool,

    /// Swap the alias even when some documents failed to import
    #[serde(default)]
    pub allow_partial_population: bool,

    /// How many times an oversized batch may be halved
    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            documents_per_batch: default_documents_per_batch(),
            max_parallel: default_max_parallel(),
            import_action: default_import_action(),
            identity_field: default_identity_field(),
            timestamp_field: default_timestamp_field(),
            dry_run: false,
            allow_partial_population: false,
            max_split_depth: default_max_split_depth(),
        }
    }
}

impl IndexerConfig {
    /// Parsed import action
    pub fn action(&self) -> Result<ImportAction> {
        self.import_action.parse()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Uniform jitter as a fraction of the computed delay, in `[0, 1]`
    #[serde(default = "default_retry_jitter_fraction")]
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter_fraction: default_retry_jitter_fraction(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Physical generation management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Physical generations kept per logical collection
    #[serde(default = "default_retention")]
    pub retention: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}

/// Cascade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Re-index dependents after a successful full run
    #[serde(default = "default_cascade_enabled")]
    pub enabled: bool,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            enabled: default_cascade_enabled(),
        }
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.service.url.trim().is_empty() {
            return Err(Error::config("service.url cannot be empty".to_string()));
        }
        if self.service.timeout_secs == 0 {
            return Err(Error::config(
                "service.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.indexer.documents_per_batch == 0 {
            return Err(Error::config(
                "indexer.documents_per_batch must be greater than 0".to_string(),
            ));
        }
        if self.indexer.max_parallel == 0 {
            return Err(Error::config(
                "indexer.max_parallel must be greater than 0".to_string(),
            ));
        }
        if self.indexer.identity_field.trim().is_empty() {
            return Err(Error::config(
                "indexer.identity_field cannot be empty".to_string(),
            ));
        }
        if self.indexer.timestamp_field.trim().is_empty() {
            return Err(Error::config(
                "indexer.timestamp_field cannot be empty".to_string(),
            ));
        }
        self.indexer.action()?;

        if self.retry.attempts == 0 {
            return Err(Error::config(
                "retry.attempts must be greater than 0".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            return Err(Error::config(format!(
                "retry.jitter_fraction must be within [0, 1], got {}",
                self.retry.jitter_fraction
            )));
        }

        if self.schema.retention == 0 {
            return Err(Error::config(
                "schema.retention must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, toml_string)
            .map_err(|e| Error::config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }
}
