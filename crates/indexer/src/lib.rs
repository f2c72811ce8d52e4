//! Batch indexing for the searchkeeper lifecycle engine
//!
//! The pieces here run beneath a schema apply or an in-sync indexation:
//!
//! - [`retry`]: retry eligibility and jittered exponential backoff
//! - [`batch_planner`]: validation and newline-delimited encoding
//! - [`import`]: one batch against the service, with retries
//! - [`partitioner`]: partition specs compiled into ordered tokens
//! - [`execution`]: inline or queued partition execution
//! - [`stale`]: stale-document filters and idempotent deletion
//! - [`source`]: document sources
//! - [`partition_indexer`]: a whole partition, batch by batch

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod batch_planner;
pub mod execution;
pub mod import;
pub mod partition_indexer;
pub mod partitioner;
pub mod retry;
pub mod source;
pub mod stale;
pub mod summary;

pub use batch_planner::{BatchPlanner, EncodedBatch};
pub use execution::{
    DispatchHandle, ExecutionDispatcher, ExecutionMode, JobMetadata, JobQueue, JobStatus,
    PartitionJob, TokioJobQueue,
};
pub use import::import_batch;
pub use partition_indexer::PartitionIndexer;
pub use partitioner::{CompiledPartitions, PartitionSource, PartitionSpec};
pub use retry::RetryPolicy;
pub use source::{DocumentSource, InMemorySource, JsonlSource};
pub use stale::{StaleCallback, StaleContext, StaleRule};
pub use summary::{BatchSummary, ImportStatus, ImportSummary};

// Re-export error types from core
pub use searchkeeper_core::error::{Error, Result};
