//! Run summaries
//!
//! Summaries are plain serializable values so callers can render them as text
//! or emit them as JSON.

use searchkeeper_core::error::{truncate_message, MAX_REPORTED_MESSAGE_CHARS};
use searchkeeper_core::PartitionToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error samples kept per batch
pub const MAX_ERROR_SAMPLES: usize = 5;

/// Outcome of one import call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Sequence number within the partition; split halves keep their parent's
    pub index: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub attempts: u32,
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub error_samples: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Ok,
    Partial,
    Failed,
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
        })
    }
}

/// Outcome of indexing one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub partition: Option<PartitionToken>,
    pub docs_total: usize,
    pub batches_total: usize,
    pub duration_ms_total: u64,
    pub status: ImportStatus,
    pub per_batch: Vec<BatchSummary>,
    /// Fatal error that aborted the partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportSummary {
    /// Aggregate batch summaries.
    ///
    /// A fatal error makes the partition `failed`. Otherwise the status is `ok`
    /// when no document failed, `failed` when every document failed and
    /// `partial` in between.
    pub fn from_batches(
        partition: Option<PartitionToken>,
        per_batch: Vec<BatchSummary>,
        elapsed: Duration,
        fatal: Option<String>,
    ) -> Self {
        let succeeded: usize = per_batch.iter().map(|b| b.success_count).sum();
        let failed: usize = per_batch.iter().map(|b| b.failure_count).sum();
        let docs_total = succeeded + failed;

        let (status, error) = match fatal {
            Some(message) => (
                ImportStatus::Failed,
                Some(truncate_message(&message, MAX_REPORTED_MESSAGE_CHARS)),
            ),
            None if failed == 0 => (ImportStatus::Ok, None),
            None if succeeded == 0 => (
                ImportStatus::Failed,
                Some(format!("all {failed} documents were rejected")),
            ),
            None => (ImportStatus::Partial, None),
        };

        Self {
            partition,
            docs_total,
            batches_total: per_batch.len(),
            duration_ms_total: elapsed.as_millis() as u64,
            status,
            per_batch,
            error,
        }
    }

    pub fn success_count(&self) -> usize {
        self.per_batch.iter().map(|b| b.success_count).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.per_batch.iter().map(|b| b.failure_count).sum()
    }

    pub fn is_ok(&self) -> bool {
        self.status == ImportStatus::Ok
    }
}
