//! Indexes one partition: source batches through planner and dispatcher
//!
//! Batches are imported strictly in submission order. The first fatal error
//! aborts the partition and is recorded in its summary. A payload-too-large
//! rejection splits the batch in halves, down to `max_split_depth` levels.

use crate::batch_planner::BatchPlanner;
use crate::execution::PartitionJob;
use crate::import::import_batch;
use crate::retry::RetryPolicy;
use crate::source::DocumentSource;
use crate::summary::{BatchSummary, ImportSummary};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use searchkeeper_core::config::{IndexerConfig, RetryConfig};
use searchkeeper_core::partition::describe;
use searchkeeper_core::{Document, Error, ImportAction, PartitionToken, Result};
use searchkeeper_storage::SearchClient;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct PartitionIndexer {
    client: Arc<dyn SearchClient>,
    planner: BatchPlanner,
    policy: RetryPolicy,
    action: ImportAction,
    dry_run: bool,
    batch_size: usize,
    max_split_depth: u32,
}

impl PartitionIndexer {
    /// Indexer for one run started at `generated_at` (Unix seconds)
    pub fn new(
        client: Arc<dyn SearchClient>,
        config: &IndexerConfig,
        retry: &RetryConfig,
        generated_at: i64,
    ) -> Result<Self> {
        Ok(Self {
            client,
            planner: BatchPlanner::new(config, generated_at),
            policy: RetryPolicy::from(retry),
            action: config.action()?,
            dry_run: config.dry_run,
            batch_size: config.documents_per_batch.max(1),
            max_split_depth: config.max_split_depth,
        })
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn planner(&self) -> &BatchPlanner {
        &self.planner
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Import every batch `source` yields for `partition` into `physical`
    pub async fn index_partition(
        &self,
        physical: &str,
        source: &dyn DocumentSource,
        partition: Option<&PartitionToken>,
    ) -> ImportSummary {
        self.index_stream(physical, partition.cloned(), source.batches(partition))
            .await
    }

    /// Import an already materialized document set, chunked by the batch size
    pub async fn index_documents(
        &self,
        physical: &str,
        partition: Option<PartitionToken>,
        documents: Vec<Document>,
    ) -> ImportSummary {
        let batches: Vec<Result<Vec<Document>>> = documents
            .chunks(self.batch_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        self.index_stream(physical, partition, stream::iter(batches).boxed())
            .await
    }

    /// Owned job indexing one partition, for the execution dispatcher
    pub fn partition_job(
        &self,
        physical: String,
        source: Arc<dyn DocumentSource>,
        partition: Option<PartitionToken>,
    ) -> PartitionJob {
        let indexer = self.clone();
        async move {
            Ok(indexer
                .index_partition(&physical, source.as_ref(), partition.as_ref())
                .await)
        }
        .boxed()
    }

    async fn index_stream(
        &self,
        physical: &str,
        partition: Option<PartitionToken>,
        mut batches: BoxStream<'_, Result<Vec<Document>>>,
    ) -> ImportSummary {
        let started = Instant::now();
        let label = describe(partition.as_ref());
        let mut per_batch = Vec::new();
        let mut fatal = None;
        let mut index = 0;

        while let Some(next) = batches.next().await {
            let documents = match next {
                Ok(documents) => documents,
                Err(e) => {
                    error!("Reading partition {label} of {physical} failed: {e}");
                    fatal = Some(e.to_string());
                    break;
                }
            };
            if documents.is_empty() {
                continue;
            }

            // Halves imported before a fatal error still count
            if let Err(e) = self
                .import_split(physical, index, &documents, 0, &mut per_batch)
                .await
            {
                error!("Batch {index} of partition {label} into {physical} failed: {e}");
                fatal = Some(e.to_string());
                break;
            }
            index += 1;
        }

        let summary = ImportSummary::from_batches(partition, per_batch, started.elapsed(), fatal);
        info!(
            collection = %physical,
            partition = %label,
            status = %summary.status,
            docs = summary.docs_total,
            batches = summary.batches_total,
            "Indexed partition"
        );
        summary
    }

    /// Import `documents`, appending one summary per import call to `summaries`
    fn import_split<'a>(
        &'a self,
        physical: &'a str,
        index: usize,
        documents: &'a [Document],
        depth: u32,
        summaries: &'a mut Vec<BatchSummary>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let encoded = self.planner.encode(documents)?;
            let result = import_batch(
                self.client.as_ref(),
                physical,
                self.action,
                index,
                &encoded,
                &self.policy,
                self.dry_run,
            )
            .await;

            match result {
                Ok(summary) => {
                    summaries.push(summary);
                    Ok(())
                }
                Err(Error::PayloadTooLarge { bytes })
                    if documents.len() > 1 && depth < self.max_split_depth =>
                {
                    let mid = documents.len() / 2;
                    warn!(
                        "Batch {index} ({bytes} bytes, {} docs) too large for {physical}; splitting (depth {})",
                        documents.len(),
                        depth + 1
                    );
                    self.import_split(physical, index, &documents[..mid], depth + 1, summaries)
                        .await?;
                    self.import_split(physical, index, &documents[mid..], depth + 1, summaries)
                        .await
                }
                Err(e) => Err(e),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::source::InMemorySource;
    use crate::summary::ImportStatus;
    use searchkeeper_core::{CollectionSchema, FieldSpec};
    use searchkeeper_storage::{MockSearchClient, ScriptedFailure};
    use serde_json::json;
    use std::time::Duration;

    fn docs(count: usize) -> Vec<Document> {
        (0..count)
            .map(|i| json!({"id": format!("d{i}"), "name": "x"}).as_object().cloned().unwrap())
            .collect()
    }

    async fn setup(mock: MockSearchClient, batch_size: usize) -> (MockSearchClient, PartitionIndexer) {
        mock.create_collection(&CollectionSchema::new(
            "products_v1",
            vec![FieldSpec::new("id", "string")],
        ))
        .await
        .unwrap();
        let config = IndexerConfig {
            documents_per_batch: batch_size,
            ..IndexerConfig::default()
        };
        let client: Arc<dyn SearchClient> = Arc::new(mock.clone());
        let indexer = PartitionIndexer::new(client, &config, &RetryConfig::default(), 42)
            .unwrap()
            .with_policy(RetryPolicy::new(
                3,
                Duration::from_millis(1),
                Duration::from_millis(1),
                0.0,
            ));
        (mock, indexer)
    }

    #[tokio::test]
    async fn test_single_partition_three_documents() {
        let (mock, indexer) = setup(MockSearchClient::new(), 100).await;
        let source = InMemorySource::new(100).with_documents(docs(3));

        let summary = indexer.index_partition("products_v1", &source, None).await;

        assert_eq!(summary.status, ImportStatus::Ok);
        assert_eq!(summary.docs_total, 3);
        assert_eq!(summary.batches_total, 1);
        assert_eq!(mock.document_count("products_v1"), 3);
        let stored = mock.document("products_v1", "d0").unwrap();
        assert_eq!(stored.get("doc_updated_at"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_partition() {
        let (mock, indexer) = setup(MockSearchClient::new(), 2).await;
        let source = InMemorySource::new(2).with_documents(docs(6));
        mock.fail_next_import(ScriptedFailure::Status(400));

        let summary = indexer.index_partition("products_v1", &source, None).await;

        assert_eq!(summary.status, ImportStatus::Failed);
        assert!(summary.error.is_some());
        assert_eq!(mock.call_count("import_documents"), 1);
        assert_eq!(mock.document_count("products_v1"), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_mid_partition_keeps_earlier_batches() {
        let (_mock, indexer) = setup(MockSearchClient::new(), 2).await;
        let mut documents = docs(4);
        documents.push(json!({"name": "no identity"}).as_object().cloned().unwrap());
        let source = InMemorySource::new(2).with_documents(documents);

        let summary = indexer.index_partition("products_v1", &source, None).await;

        assert_eq!(summary.status, ImportStatus::Failed);
        assert_eq!(summary.batches_total, 2);
        assert_eq!(summary.docs_total, 4);
        assert!(summary.error.unwrap().contains("identity"));
    }

    #[tokio::test]
    async fn test_payload_too_large_splits_batch() {
        let (mock, indexer) = setup(MockSearchClient::new().with_max_payload_bytes(120), 4).await;
        let source = InMemorySource::new(4).with_documents(docs(4));

        let summary = indexer.index_partition("products_v1", &source, None).await;

        assert_eq!(summary.status, ImportStatus::Ok);
        assert_eq!(mock.document_count("products_v1"), 4);
        assert!(summary.batches_total > 1);
        assert!(summary.per_batch.iter().all(|b| b.index == 0));
    }

    #[tokio::test]
    async fn test_failed_split_keeps_imported_halves() {
        let (mock, indexer) = setup(MockSearchClient::new().with_max_payload_bytes(120), 4).await;
        let mut documents = docs(3);
        documents.push(
            json!({"id": "d3", "blob": "x".repeat(200)})
                .as_object()
                .cloned()
                .unwrap(),
        );

        let summary = indexer.index_documents("products_v1", None, documents).await;

        assert_eq!(summary.status, ImportStatus::Failed);
        assert!(summary.error.is_some());
        assert_eq!(mock.document_count("products_v1"), 3);
        assert_eq!(summary.docs_total, 3);
        assert_eq!(summary.success_count(), 3);
        assert_eq!(summary.batches_total, summary.per_batch.len());
        assert!(summary.batches_total >= 2);
    }

    #[tokio::test]
    async fn test_single_document_too_large_fails() {
        let (_mock, indexer) = setup(MockSearchClient::new().with_max_payload_bytes(10), 4).await;
        let source = InMemorySource::new(4).with_documents(docs(2));

        let summary = indexer.index_partition("products_v1", &source, None).await;
        assert_eq!(summary.status, ImportStatus::Failed);
    }

    #[tokio::test]
    async fn test_partial_status_on_rejected_document() {
        let (mock, indexer) = setup(MockSearchClient::new(), 10).await;
        mock.reject_document("d1");
        let source = InMemorySource::new(10).with_documents(docs(3));

        let summary = indexer.index_partition("products_v1", &source, None).await;
        assert_eq!(summary.status, ImportStatus::Partial);
        assert_eq!(summary.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_service_untouched() {
        let (mock, indexer) = setup(MockSearchClient::new(), 10).await;
        let indexer = indexer.with_dry_run(true);
        let source = InMemorySource::new(10).with_documents(docs(5));

        let summary = indexer.index_partition("products_v1", &source, None).await;
        assert_eq!(summary.status, ImportStatus::Ok);
        assert_eq!(summary.docs_total, 5);
        assert_eq!(mock.call_count("import_documents"), 0);
    }

    #[tokio::test]
    async fn test_partition_job_is_owned() {
        let (mock, indexer) = setup(MockSearchClient::new(), 10).await;
        let source: Arc<dyn DocumentSource> =
            Arc::new(InMemorySource::new(10).with_partition("eu", docs(2)));
        let token = PartitionToken::new(0, "eu");

        let job = indexer.partition_job("products_v1".to_string(), source, Some(token.clone()));
        let summary = tokio::spawn(job).await.unwrap().unwrap();

        assert_eq!(summary.partition, Some(token));
        assert_eq!(mock.document_count("products_v1"), 2);
    }
}
