#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Collection lifecycle management
//!
//! - **Registry**: registered collection definitions and their joins
//! - **Schema manager**: blue-green generations, alias swaps, retention, rollback
//! - **Cascade**: cycle-safe re-indexation of dependent collections
//! - **Events**: named lifecycle events for logging or inspection
//! - **Orchestrator**: the per-collection state machine tying it together

pub mod cascade;
pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod schema_manager;

pub use cascade::{CascadeGraph, CascadeMode, CascadeOutcome, CascadeReport, DependentReindexer};
pub use events::{EventSink, LifecycleEvent, RecordingEventSink, TracingEventSink};
pub use orchestrator::{
    CollectionStatus, IndexOptions, LifecycleOrchestrator, PartitionOutcome, RunKind, RunReport,
    StaleDeletion,
};
pub use registry::{CollectionDefinition, CollectionRegistry, JoinDeclaration};
pub use schema_manager::{ApplyResult, Generation, RollbackResult, SchemaManager};

pub use searchkeeper_core::{Error, Result};
