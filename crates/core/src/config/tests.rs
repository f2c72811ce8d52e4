//! Tests for configuration module

use super::*;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn create_temp_config_file(content: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .map_err(|e| Error::config(format!("Failed to create temp file: {e}")))?;
    file.write_all(content.as_bytes())
        .map_err(|e| Error::config(format!("Failed to write temp file: {e}")))?;
    file.flush()
        .map_err(|e| Error::config(format!("Failed to flush temp file: {e}")))?;
    Ok(file)
}

fn with_env_var<F, T>(key: &str, value: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    std::env::set_var(key, value);
    let result = f();
    std::env::remove_var(key);
    result
}

#[test]
fn test_from_toml_str_valid() {
    let toml = r#"
        [service]
        url = "http://search.internal:8108"
        api_key = "secret"

        [retry]
        attempts = 5
        jitter_fraction = 0.0

        [schema]
        retention = 3
    "#;

    let config = Config::from_toml_str(toml).expect("Failed to parse valid TOML");
    assert_eq!(config.service.url, "http://search.internal:8108");
    assert_eq!(config.retry.attempts, 5);
    assert_eq!(config.schema.retention, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_toml_str_empty_uses_defaults() {
    let config = Config::from_toml_str("").expect("Failed to parse empty TOML");

    assert_eq!(config.service.url, "http://localhost:8108");
    assert_eq!(config.indexer.identity_field, "id");
    assert_eq!(config.indexer.timestamp_field, "doc_updated_at");
    assert_eq!(config.indexer.import_action, "upsert");
    assert_eq!(config.retry.attempts, 3);
    assert_eq!(config.retry.base_delay_ms, 500);
    assert_eq!(config.schema.retention, 2);
    assert!(config.cascade.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_toml_str_invalid_syntax() {
    let toml = r#"
        [retry
        attempts = 3
    "#;

    let result = Config::from_toml_str(toml);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("Failed to parse TOML"));
}

#[test]
fn test_validate_zero_attempts() {
    let mut config = Config::default();
    config.retry.attempts = 0;

    let result = config.validate();
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("retry.attempts must be greater than 0"));
}

#[test]
fn test_validate_jitter_out_of_range() {
    let mut config = Config::default();
    config.retry.jitter_fraction = 1.5;

    let result = config.validate();
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("jitter_fraction"));
}

#[test]
fn test_validate_zero_retention() {
    let mut config = Config::default();
    config.schema.retention = 0;

    assert!(config.validate().is_err());
}

#[test]
fn test_validate_unknown_import_action() {
    let mut config = Config::default();
    config.indexer.import_action = "replace".to_string();

    let result = config.validate();
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("Invalid import action"));
}

#[test]
fn test_validate_base_delay_above_max() {
    let mut config = Config::default();
    config.retry.base_delay_ms = 10_000;
    config.retry.max_delay_ms = 1_000;

    assert!(config.validate().is_err());
}

#[test]
fn test_from_file_reads_toml() -> Result<()> {
    let file = create_temp_config_file(
        r#"
        [indexer]
        documents_per_batch = 250
        max_parallel = 2
        "#,
    )?;

    let config = Config::from_file(file.path())?;
    assert_eq!(config.indexer.documents_per_batch, 250);
    assert_eq!(config.indexer.max_parallel, 2);
    assert_eq!(config.retry.max_delay_ms, 5_000);
    Ok(())
}

#[test]
fn test_from_file_missing_file_uses_defaults() -> Result<()> {
    let config = Config::from_file(Path::new("/nonexistent/searchkeeper.toml"))?;
    assert_eq!(config.indexer.documents_per_batch, 100);
    assert!(!config.service.use_mock);
    Ok(())
}

#[test]
fn test_env_override() -> Result<()> {
    let file = create_temp_config_file("[cascade]\nenabled = true\n")?;

    let config = with_env_var("SEARCHKEEPER_CASCADE__ENABLED", "false", || {
        Config::from_file(file.path())
    })?;
    assert!(!config.cascade.enabled);
    Ok(())
}

#[test]
fn test_api_key_is_redacted_in_debug() {
    let mut config = Config::default();
    config.service.api_key = Some("super-secret".to_string());

    let rendered = format!("{:?}", config.service);
    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("REDACTED"));
}

#[test]
fn test_save_and_load_roundtrip() -> Result<()> {
    let mut config = Config::default();
    config.schema.retention = 4;
    config.indexer.import_action = "emplace".to_string();

    let temp_file = NamedTempFile::new()
        .map_err(|e| Error::config(format!("Failed to create temp file: {e}")))?;
    config.save(temp_file.path())?;

    let loaded_content = std::fs::read_to_string(temp_file.path())
        .map_err(|e| Error::config(format!("Failed to read temp file: {e}")))?;
    let loaded = Config::from_toml_str(&loaded_content)?;

    assert_eq!(loaded.schema.retention, 4);
    assert_eq!(loaded.indexer.action()?, ImportAction::Emplace);
    Ok(())
}
