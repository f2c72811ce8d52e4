//! Integration tests for the indexer crate
//!
//! These tests drive partitions end to end: compile the partition spec,
//! dispatch one job per partition, then clean up stale documents.

use pretty_assertions::assert_eq;
use searchkeeper_core::config::{IndexerConfig, RetryConfig};
use searchkeeper_core::{CollectionSchema, Document, FieldSpec, PartitionToken};
use searchkeeper_indexer::{
    partitioner, stale, DispatchHandle, DocumentSource, ExecutionDispatcher, ExecutionMode,
    ImportStatus, InMemorySource, JobMetadata, JobQueue, JobStatus, PartitionIndexer,
    PartitionSpec, StaleContext, StaleRule, TokioJobQueue,
};
use searchkeeper_storage::{MockSearchClient, SearchClient};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn doc(id: &str, region: &str) -> Document {
    json!({"id": id, "region": region})
        .as_object()
        .cloned()
        .unwrap()
}

async fn mock_with_collection() -> MockSearchClient {
    let mock = MockSearchClient::new();
    mock.create_collection(&CollectionSchema::new(
        "stores_v1",
        vec![
            FieldSpec::new("id", "string"),
            FieldSpec::new("region", "string").facet(),
            FieldSpec::new("doc_updated_at", "int64"),
        ],
    ))
    .await
    .unwrap();
    mock
}

fn source() -> Arc<dyn DocumentSource> {
    Arc::new(
        InMemorySource::new(2)
            .with_partition("eu", vec![doc("s1", "eu"), doc("s2", "eu"), doc("s3", "eu")])
            .with_partition("us", vec![doc("s4", "us")])
            .with_partition("apac", vec![doc("s5", "apac"), doc("s6", "apac")]),
    )
}

fn indexer(mock: &MockSearchClient, generated_at: i64) -> PartitionIndexer {
    let client: Arc<dyn SearchClient> = Arc::new(mock.clone());
    PartitionIndexer::new(
        client,
        &IndexerConfig::default(),
        &RetryConfig::default(),
        generated_at,
    )
    .unwrap()
}

#[tokio::test]
async fn test_partitions_dispatched_in_parallel_then_stale_cleanup() {
    let mock = mock_with_collection().await;
    mock.insert_document(
        "stores_v1",
        json!({"id": "gone", "region": "eu", "doc_updated_at": 1})
            .as_object()
            .cloned()
            .unwrap(),
    )
    .unwrap();

    let spec = PartitionSpec::enumerated(["eu", "us", "apac"]).with_max_parallel(2);
    let compiled = partitioner::compile(Some(&spec)).unwrap();
    let indexer = indexer(&mock, 100);
    let source = source();

    let jobs = compiled
        .partitions
        .iter()
        .map(|partition| {
            (
                JobMetadata::new("stores", partition.clone()),
                indexer.partition_job("stores_v1".to_string(), source.clone(), partition.clone()),
            )
        })
        .collect();

    let dispatcher = ExecutionDispatcher::default();
    let handles = dispatcher
        .dispatch_all(jobs, ExecutionMode::Sync, compiled.max_parallel.unwrap_or(1))
        .await;

    let summaries: Vec<_> = handles
        .into_iter()
        .map(|h| h.unwrap().summary().cloned().unwrap())
        .collect();
    assert!(summaries.iter().all(|s| s.status == ImportStatus::Ok));
    assert_eq!(summaries.iter().map(|s| s.docs_total).sum::<usize>(), 6);
    assert_eq!(summaries[0].batches_total, 2);

    let scopes = BTreeMap::new();
    let context = StaleContext {
        scopes: &scopes,
        timestamp_field: "doc_updated_at",
        run_started_at: 100,
        partition_field: Some("region"),
    };
    let mut deleted = Vec::new();
    for partition in &compiled.partitions {
        let filter = stale::compile(&[StaleRule::NotRefreshed], partition.as_ref(), &context)
            .unwrap()
            .unwrap();
        deleted.push(stale::delete(&mock, "stores_v1", &filter).await.unwrap());
        assert_eq!(stale::delete(&mock, "stores_v1", &filter).await.unwrap(), 0);
    }
    assert_eq!(deleted, vec![1, 0, 0]);
    assert_eq!(mock.document_count("stores_v1"), 6);
}

#[tokio::test]
async fn test_stale_deletion_stays_inside_partition() {
    let mock = mock_with_collection().await;
    for (id, region) in [("old-eu", "eu"), ("old-us", "us")] {
        mock.insert_document(
            "stores_v1",
            json!({"id": id, "region": region, "doc_updated_at": 1})
                .as_object()
                .cloned()
                .unwrap(),
        )
        .unwrap();
    }

    let scopes = BTreeMap::new();
    let context = StaleContext {
        scopes: &scopes,
        timestamp_field: "doc_updated_at",
        run_started_at: 100,
        partition_field: Some("region"),
    };
    let eu = PartitionToken::new(0, "eu");
    let filter = stale::compile(&[StaleRule::NotRefreshed], Some(&eu), &context)
        .unwrap()
        .unwrap();

    assert_eq!(stale::delete(&mock, "stores_v1", &filter).await.unwrap(), 1);
    assert_eq!(mock.document_ids("stores_v1"), vec!["old-us".to_string()]);
}

#[tokio::test]
async fn test_async_dispatch_reports_through_queue() {
    let mock = mock_with_collection().await;
    let indexer = indexer(&mock, 7);
    let queue = Arc::new(TokioJobQueue::new());
    let dispatcher = ExecutionDispatcher::new(queue.clone());
    let token = PartitionToken::new(1, "us");

    let handle = dispatcher
        .dispatch(
            JobMetadata::new("stores", Some(token.clone())),
            ExecutionMode::Async,
            indexer.partition_job("stores_v1".to_string(), source(), Some(token)),
        )
        .await
        .unwrap();

    let DispatchHandle::Enqueued { correlation_id } = handle else {
        panic!("async dispatch must enqueue");
    };
    match queue.wait(&correlation_id).await {
        Some(JobStatus::Succeeded(summary)) => {
            assert_eq!(summary.docs_total, 1);
            assert_eq!(summary.status, ImportStatus::Ok);
        }
        other => panic!("unexpected job status: {other:?}"),
    }
    assert_eq!(mock.document_ids("stores_v1"), vec!["s4".to_string()]);
}

#[tokio::test]
async fn test_failed_partition_does_not_stop_siblings() {
    let mock = mock_with_collection().await;
    let indexer = indexer(&mock, 5);
    let bad: Arc<dyn DocumentSource> = Arc::new(
        InMemorySource::new(10)
            .with_partition("eu", vec![doc("s1", "eu")])
            .with_partition(
                "us",
                vec![json!({"region": "us"}).as_object().cloned().unwrap()],
            ),
    );

    let compiled = partitioner::compile(Some(&PartitionSpec::enumerated(["us", "eu"]))).unwrap();
    let jobs = compiled
        .partitions
        .iter()
        .map(|p| {
            (
                JobMetadata::new("stores", p.clone()),
                indexer.partition_job("stores_v1".to_string(), bad.clone(), p.clone()),
            )
        })
        .collect();

    let results = ExecutionDispatcher::default()
        .dispatch_all(jobs, ExecutionMode::Sync, 1)
        .await;
    let statuses: Vec<ImportStatus> = results
        .iter()
        .map(|r| r.as_ref().unwrap().summary().unwrap().status)
        .collect();

    assert_eq!(statuses, vec![ImportStatus::Failed, ImportStatus::Ok]);
    assert_eq!(mock.document_ids("stores_v1"), vec!["s1".to_string()]);
}
