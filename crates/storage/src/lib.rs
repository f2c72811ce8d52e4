#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Search service access for the collection lifecycle engine
//!
//! The engine talks to the remote document-search service only through the
//! [`SearchClient`] trait. Two implementations ship here: a Typesense-compatible
//! HTTP client and an in-memory mock used by tests and dry local runs.

mod factory;
pub mod mock;
mod typesense;

pub use factory::create_search_client;
pub use mock::{MockSearchClient, ScriptedFailure};
pub use typesense::TypesenseClient;

use async_trait::async_trait;
use searchkeeper_core::{CollectionSchema, ImportAction, Result};
use serde::{Deserialize, Serialize};

/// Raw answer to an import call, parsed by the import dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResponse {
    pub http_status: u16,
    pub body: String,
}

/// Operations the lifecycle engine needs from the search service
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Create a physical collection; `schema.name` is the physical name
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Delete a physical collection. An absent collection surfaces as
    /// `Error::Api { status: 404, .. }` so callers can tell it apart.
    async fn delete_collection(&self, physical: &str) -> Result<()>;

    /// Names of every physical collection on the service
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Physical collection the alias points at, `None` when no alias exists
    async fn resolve_alias(&self, logical: &str) -> Result<Option<String>>;

    /// Create or repoint an alias
    async fn upsert_alias(&self, logical: &str, physical: &str) -> Result<()>;

    /// Live schema of a physical collection, `None` when it does not exist
    async fn retrieve_schema(&self, physical: &str) -> Result<Option<CollectionSchema>>;

    /// Send one newline-delimited batch
    async fn import_documents(
        &self,
        physical: &str,
        payload: &str,
        action: ImportAction,
    ) -> Result<ImportResponse>;

    /// Delete every document matching `filter`, returning how many went away
    async fn delete_by_filter(&self, physical: &str, filter: &str) -> Result<u64>;
}
