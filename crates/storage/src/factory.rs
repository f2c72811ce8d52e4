use crate::{MockSearchClient, SearchClient, TypesenseClient};
use searchkeeper_core::{config::ServiceConfig, Result};
use std::sync::Arc;
use tracing::info;

/// Creates a search client based on configuration.
///
/// Returns the in-memory mock when `use_mock` is set, otherwise an HTTP client
/// for the configured Typesense-compatible service. The trait object hides the
/// implementation so lifecycle code is identical for both.
///
/// # Errors
/// Returns an error if the HTTP client cannot be constructed
pub fn create_search_client(config: &ServiceConfig) -> Result<Arc<dyn SearchClient>> {
    if config.use_mock {
        info!("Using in-memory search client");
        return Ok(Arc::new(MockSearchClient::new()) as Arc<dyn SearchClient>);
    }
    Ok(Arc::new(TypesenseClient::new(config)?) as Arc<dyn SearchClient>)
}
