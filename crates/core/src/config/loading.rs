//! Configuration loading from files and environment variables

use crate::error::{Error, Result};
use config::{Config as ConfigLib, ConfigBuilder as LibConfigBuilder, Environment, File};
use std::path::Path;

use super::defaults::*;
use super::{global_config_path, Config};

type Builder = LibConfigBuilder<config::builder::DefaultState>;

/// Helper to set a config default with consistent error mapping
fn set_config_default<T: Into<config::Value>>(
    builder: Builder,
    key: &str,
    value: T,
) -> Result<Builder> {
    builder
        .set_default(key, value)
        .map_err(|e| Error::config(format!("Failed to set {key} default: {e}")))
}

/// Helper to override a key from a legacy environment variable, if present
fn set_env_override(builder: Builder, env_var: &str, key: &str) -> Result<Builder> {
    match std::env::var(env_var) {
        Ok(value) => builder
            .set_override(key, value)
            .map_err(|e| Error::config(format!("Failed to set {env_var}: {e}"))),
        Err(_) => Ok(builder),
    }
}

impl Config {
    /// Loads configuration from a TOML file with environment variable overrides
    ///
    /// Environment variables are prefixed with `SEARCHKEEPER_` and use double
    /// underscores for nested values. For example:
    /// - `SEARCHKEEPER_RETRY__ATTEMPTS=5`
    /// - `SEARCHKEEPER_SCHEMA__RETENTION=3`
    ///
    /// `TYPESENSE_URL` and `TYPESENSE_API_KEY` are honoured as shortcuts for the
    /// service section.
    pub fn from_file(path: &Path) -> Result<Self> {
        let builder = ConfigLib::builder();

        // config crate doesn't apply serde defaults for missing sections
        let builder = set_config_default(builder, "service.url", default_service_url())?;
        let builder = set_config_default(
            builder,
            "service.timeout_secs",
            default_timeout_secs() as i64,
        )?;
        let builder = set_config_default(builder, "service.use_mock", false)?;

        let builder = set_config_default(
            builder,
            "indexer.documents_per_batch",
            default_documents_per_batch() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "indexer.max_parallel",
            default_max_parallel() as i64,
        )?;
        let builder =
            set_config_default(builder, "indexer.import_action", default_import_action())?;
        let builder =
            set_config_default(builder, "indexer.identity_field", default_identity_field())?;
        let builder = set_config_default(
            builder,
            "indexer.timestamp_field",
            default_timestamp_field(),
        )?;
        let builder = set_config_default(builder, "indexer.dry_run", false)?;
        let builder = set_config_default(builder, "indexer.allow_partial_population", false)?;
        let builder = set_config_default(
            builder,
            "indexer.max_split_depth",
            default_max_split_depth() as i64,
        )?;

        let builder = set_config_default(
            builder,
            "retry.attempts",
            default_retry_attempts() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "retry.base_delay_ms",
            default_retry_base_delay_ms() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "retry.max_delay_ms",
            default_retry_max_delay_ms() as i64,
        )?;
        let builder = set_config_default(
            builder,
            "retry.jitter_fraction",
            default_retry_jitter_fraction(),
        )?;

        let builder =
            set_config_default(builder, "schema.retention", default_retention() as i64)?;
        let mut builder =
            set_config_default(builder, "cascade.enabled", default_cascade_enabled())?;

        // Add the config file if it exists
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        // Add environment variables with SEARCHKEEPER_ prefix
        builder = builder.add_source(
            Environment::with_prefix("SEARCHKEEPER")
                .separator("__")
                .try_parsing(true),
        );

        builder = set_env_override(builder, "TYPESENSE_URL", "service.url")?;
        builder = set_env_override(builder, "TYPESENSE_API_KEY", "service.api_key")?;

        let config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize config: {e}")))
    }

    /// Creates a config from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from a single file
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Config file (~/.searchkeeper/config.toml or custom --config path)
    /// 3. Environment variables (SEARCHKEEPER_*, TYPESENSE_*)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => global_config_path()?,
        };
        Self::from_file(&path)
    }
}
