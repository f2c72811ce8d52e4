//! Synchronous and queued partition execution
//!
//! A partition job is an owned future producing the partition's
//! [`ImportSummary`]. `Sync` runs it inline; `Async` hands it to a
//! [`JobQueue`] and returns a correlation id immediately.

use crate::summary::ImportSummary;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use searchkeeper_core::{PartitionToken, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Work unit indexing one partition
pub type PartitionJob = BoxFuture<'static, Result<ImportSummary>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

/// Describes a dispatched job for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub collection: String,
    pub partition: Option<PartitionToken>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl JobMetadata {
    pub fn new(collection: impl Into<String>, partition: Option<PartitionToken>) -> Self {
        Self {
            collection: collection.into(),
            partition,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Uniform result of [`ExecutionDispatcher::dispatch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchHandle {
    Completed { summary: ImportSummary },
    Enqueued { correlation_id: Uuid },
}

impl DispatchHandle {
    pub fn summary(&self) -> Option<&ImportSummary> {
        match self {
            Self::Completed { summary } => Some(summary),
            Self::Enqueued { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded(ImportSummary),
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

/// Out-of-band execution of partition jobs
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue a job and return its correlation id
    fn enqueue(&self, metadata: JobMetadata, job: PartitionJob) -> Uuid;

    /// Current status, `None` for unknown ids
    fn status(&self, correlation_id: &Uuid) -> Option<JobStatus>;

    /// Wait for a job to reach a terminal status; `None` once it was evicted
    async fn wait(&self, correlation_id: &Uuid) -> Option<JobStatus>;
}

/// Finished jobs a [`TokioJobQueue`] remembers before evicting the oldest
pub const DEFAULT_RETAINED_FINISHED: usize = 1024;

struct JobEntry {
    metadata: JobMetadata,
    status: JobStatus,
    /// Completion order, set once the job is terminal
    finished: Option<u64>,
}

/// In-process queue running each job on its own tokio task.
///
/// Finished jobs stay queryable until more than `retain_finished` of them
/// have accumulated; the oldest are then forgotten on the next enqueue.
pub struct TokioJobQueue {
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    handles: DashMap<Uuid, JoinHandle<()>>,
    completions: Arc<AtomicU64>,
    retain_finished: usize,
}

impl Default for TokioJobQueue {
    fn default() -> Self {
        Self {
            jobs: Arc::default(),
            handles: DashMap::new(),
            completions: Arc::default(),
            retain_finished: DEFAULT_RETAINED_FINISHED,
        }
    }
}

impl TokioJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retained_finished(mut self, retain_finished: usize) -> Self {
        self.retain_finished = retain_finished;
        self
    }

    /// Forget the oldest finished jobs beyond the retention bound
    pub fn evict_finished(&self) -> usize {
        let mut finished: Vec<(u64, Uuid)> = self
            .jobs
            .iter()
            .filter_map(|entry| entry.finished.map(|order| (order, *entry.key())))
            .collect();
        if finished.len() <= self.retain_finished {
            return 0;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.retain_finished;
        for (_, id) in &finished[..excess] {
            self.jobs.remove(id);
            self.handles.remove(id);
        }
        debug!(evicted = excess, "Evicted finished jobs");
        excess
    }

    /// Metadata of a known job
    pub fn metadata(&self, correlation_id: &Uuid) -> Option<JobMetadata> {
        self.jobs
            .get(correlation_id)
            .map(|entry| entry.metadata.clone())
    }

    /// Ids of every job still tracked
    pub fn job_ids(&self) -> Vec<Uuid> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }
}

fn set_status(jobs: &DashMap<Uuid, JobEntry>, id: &Uuid, status: JobStatus, completions: &AtomicU64) {
    if let Some(mut entry) = jobs.get_mut(id) {
        if status.is_terminal() && entry.finished.is_none() {
            entry.finished = Some(completions.fetch_add(1, Ordering::Relaxed));
        }
        entry.status = status;
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    fn enqueue(&self, metadata: JobMetadata, job: PartitionJob) -> Uuid {
        self.evict_finished();
        let id = Uuid::new_v4();
        info!(
            correlation_id = %id,
            collection = %metadata.collection,
            "Enqueued partition job"
        );
        self.jobs.insert(
            id,
            JobEntry {
                metadata,
                status: JobStatus::Queued,
                finished: None,
            },
        );

        let jobs = Arc::clone(&self.jobs);
        let completions = Arc::clone(&self.completions);
        let handle = tokio::spawn(async move {
            set_status(&jobs, &id, JobStatus::Running, &completions);
            let status = match job.await {
                Ok(summary) => JobStatus::Succeeded(summary),
                Err(e) => {
                    error!(correlation_id = %id, "Partition job failed: {e}");
                    JobStatus::Failed(e.to_string())
                }
            };
            set_status(&jobs, &id, status, &completions);
        });
        self.handles.insert(id, handle);
        id
    }

    fn status(&self, correlation_id: &Uuid) -> Option<JobStatus> {
        self.jobs
            .get(correlation_id)
            .map(|entry| entry.status.clone())
    }

    async fn wait(&self, correlation_id: &Uuid) -> Option<JobStatus> {
        if let Some((_, handle)) = self.handles.remove(correlation_id) {
            if let Err(e) = handle.await {
                set_status(
                    &self.jobs,
                    correlation_id,
                    JobStatus::Failed(format!("job task aborted: {e}")),
                    &self.completions,
                );
            }
        }
        self.status(correlation_id)
    }
}

/// Chooses inline or queued execution per partition
#[derive(Clone)]
pub struct ExecutionDispatcher {
    queue: Arc<dyn JobQueue>,
}

impl ExecutionDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Run or enqueue one partition job
    pub async fn dispatch(
        &self,
        metadata: JobMetadata,
        mode: ExecutionMode,
        job: PartitionJob,
    ) -> Result<DispatchHandle> {
        match mode {
            ExecutionMode::Sync => {
                debug!(collection = %metadata.collection, "Running partition inline");
                let summary = job.await?;
                Ok(DispatchHandle::Completed { summary })
            }
            ExecutionMode::Async => Ok(DispatchHandle::Enqueued {
                correlation_id: self.queue.enqueue(metadata, job),
            }),
        }
    }

    /// Dispatch several partition jobs with at most `max_parallel` in flight.
    ///
    /// Jobs may finish in any order; results come back in input order.
    pub async fn dispatch_all(
        &self,
        jobs: Vec<(JobMetadata, PartitionJob)>,
        mode: ExecutionMode,
        max_parallel: usize,
    ) -> Vec<Result<DispatchHandle>> {
        let collected: BoxFuture<'_, Vec<(usize, Result<DispatchHandle>)>> = Box::pin(
            stream::iter(jobs.into_iter().enumerate())
                .map(|(position, (metadata, job))| async move {
                    (position, self.dispatch(metadata, mode, job).await)
                })
                .buffer_unordered(max_parallel.max(1))
                .collect(),
        );
        let mut results = collected.await;
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

impl Default for ExecutionDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(TokioJobQueue::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use searchkeeper_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn summary(partition: Option<PartitionToken>) -> ImportSummary {
        ImportSummary::from_batches(partition, Vec::new(), Duration::ZERO, None)
    }

    fn ok_job(partition: Option<PartitionToken>) -> PartitionJob {
        async move { Ok(summary(partition)) }.boxed()
    }

    #[tokio::test]
    async fn test_sync_dispatch_returns_summary() {
        let dispatcher = ExecutionDispatcher::default();
        let token = PartitionToken::new(0, "eu");

        let handle = dispatcher
            .dispatch(
                JobMetadata::new("products", Some(token.clone())),
                ExecutionMode::Sync,
                ok_job(Some(token.clone())),
            )
            .await
            .unwrap();

        assert_eq!(handle.summary().and_then(|s| s.partition.clone()), Some(token));
    }

    #[tokio::test]
    async fn test_async_dispatch_enqueues_and_completes() {
        let queue = Arc::new(TokioJobQueue::new());
        let dispatcher = ExecutionDispatcher::new(queue.clone());

        let handle = dispatcher
            .dispatch(
                JobMetadata::new("products", None).with_label("trigger", "test"),
                ExecutionMode::Async,
                ok_job(None),
            )
            .await
            .unwrap();

        let DispatchHandle::Enqueued { correlation_id } = handle else {
            panic!("expected an enqueued handle");
        };
        assert!(queue.status(&correlation_id).is_some());
        assert_eq!(
            queue.metadata(&correlation_id).map(|m| m.labels["trigger"].clone()),
            Some("test".to_string())
        );

        let status = queue.wait(&correlation_id).await.unwrap();
        assert!(matches!(status, JobStatus::Succeeded(_)));
        assert!(status.is_terminal());
    }

    #[tokio::test]
    async fn test_failed_job_is_reported() {
        let queue = TokioJobQueue::new();
        let id = queue.enqueue(
            JobMetadata::new("products", None),
            async { Err(Error::validation("boom")) }.boxed(),
        );
        let status = queue.wait(&id).await.unwrap();
        assert!(matches!(status, JobStatus::Failed(message) if message.contains("boom")));
        assert!(queue.status(&Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_all_bounds_parallelism_and_keeps_order() {
        let dispatcher = ExecutionDispatcher::default();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<(JobMetadata, PartitionJob)> = (0..6)
            .map(|i| {
                let token = PartitionToken::new(i, i as i64);
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let job: PartitionJob = async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 * (6 - i as u64))).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(summary(Some(token)))
                }
                .boxed();
                (JobMetadata::new("products", None), job)
            })
            .collect();

        let results = dispatcher.dispatch_all(jobs, ExecutionMode::Sync, 2).await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let ordinals: Vec<usize> = results
            .iter()
            .map(|r| {
                r.as_ref()
                    .unwrap()
                    .summary()
                    .and_then(|s| s.partition.as_ref())
                    .map(PartitionToken::ordinal)
                    .unwrap()
            })
            .collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_oldest_first() {
        let queue = TokioJobQueue::new().with_retained_finished(1);

        let first = queue.enqueue(JobMetadata::new("products", None), ok_job(None));
        queue.wait(&first).await.unwrap();
        let second = queue.enqueue(JobMetadata::new("products", None), ok_job(None));
        queue.wait(&second).await.unwrap();
        assert_eq!(queue.job_ids().len(), 2);

        let third = queue.enqueue(JobMetadata::new("products", None), ok_job(None));
        assert!(queue.status(&first).is_none());
        assert!(queue.status(&second).is_some());
        queue.wait(&third).await.unwrap();

        assert_eq!(queue.evict_finished(), 1);
        assert!(queue.status(&second).is_none());
        assert!(matches!(queue.status(&third), Some(JobStatus::Succeeded(_))));
        assert_eq!(queue.evict_finished(), 0);
    }
}
