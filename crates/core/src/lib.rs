//! Core types for the searchkeeper collection lifecycle engine
//!
//! This crate provides the foundational pieces shared by every other crate:
//!
//! - **Configuration**: layered TOML/environment configuration
//! - **Error handling**: the unified error taxonomy and retry classification
//! - **Schema**: compiled collection schemas as the search service sees them
//! - **Diff**: order-independent comparison of compiled and live schemas
//! - **Documents**: source records, identities and import actions
//! - **Partitions**: opaque, declaration-ordered partition tokens

pub mod config;
pub mod diff;
pub mod document;
pub mod error;
pub mod partition;
pub mod schema;

// Re-export main types for convenience
pub use config::{CascadeConfig, Config, IndexerConfig, RetryConfig, SchemaConfig, ServiceConfig};
pub use diff::{diff, AttributeChange, OptionChange, SchemaDiff, SchemaStatus};
pub use document::{identity_of, Document, ImportAction};
pub use error::{Error, Result, ResultExt};
pub use partition::{PartitionToken, TokenValue};
pub use schema::{CollectionSchema, FieldSpec};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
