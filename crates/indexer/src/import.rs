//! Executes one encoded batch against the search service

use crate::batch_planner::EncodedBatch;
use crate::retry::RetryPolicy;
use crate::summary::{BatchSummary, MAX_ERROR_SAMPLES};
use searchkeeper_core::error::truncate_message;
use searchkeeper_core::{ImportAction, Result};
use searchkeeper_storage::SearchClient;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

const MAX_SAMPLE_CHARS: usize = 200;

/// Per-document tallies parsed from an import response
#[derive(Debug, Default, PartialEq, Eq)]
struct ImportTally {
    success_count: usize,
    failure_count: usize,
    error_samples: Vec<String>,
}

impl ImportTally {
    fn record_failure(&mut self, sample: String) {
        self.failure_count += 1;
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples
                .push(truncate_message(&sample, MAX_SAMPLE_CHARS));
        }
    }

    fn record(&mut self, result: &Value) {
        if result.get("success").and_then(Value::as_bool) == Some(true) {
            self.success_count += 1;
            return;
        }
        let message = result
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown import error");
        self.record_failure(message.to_string());
    }
}

/// Parse a line-delimited or array-of-results import response.
///
/// Documents the service did not report on count as failures.
fn parse_import_response(body: &str, expected: usize) -> Result<ImportTally> {
    let trimmed = body.trim();
    let results: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut tally = ImportTally::default();
    for result in &results {
        tally.record(result);
    }
    if results.len() < expected {
        let missing = expected - results.len();
        for _ in 0..missing {
            tally.record_failure(format!("no result reported ({missing} documents unaccounted)"));
        }
    }
    Ok(tally)
}

/// Import one batch, retrying transient failures.
///
/// Fatal errors, payload-too-large included, are returned immediately so the
/// caller can decide whether to split the batch. In dry-run mode nothing is
/// sent and every document is reported as succeeded.
pub async fn import_batch(
    client: &dyn SearchClient,
    collection: &str,
    action: ImportAction,
    index: usize,
    batch: &EncodedBatch,
    policy: &RetryPolicy,
    dry_run: bool,
) -> Result<BatchSummary> {
    let started = Instant::now();

    if dry_run {
        debug!(collection, index, docs = batch.docs_count, "Dry run: skipping import");
        return Ok(BatchSummary {
            index,
            success_count: batch.docs_count,
            failure_count: 0,
            attempts: 0,
            http_status: None,
            duration_ms: started.elapsed().as_millis() as u64,
            error_samples: Vec::new(),
        });
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match client
            .import_documents(collection, &batch.payload, action)
            .await
        {
            Ok(response) => {
                let tally = parse_import_response(&response.body, batch.docs_count)?;
                debug!(
                    collection,
                    index,
                    attempt,
                    success = tally.success_count,
                    failure = tally.failure_count,
                    "Imported batch"
                );
                return Ok(BatchSummary {
                    index,
                    success_count: tally.success_count,
                    failure_count: tally.failure_count,
                    attempts: attempt,
                    http_status: Some(response.http_status),
                    duration_ms: started.elapsed().as_millis() as u64,
                    error_samples: tally.error_samples,
                });
            }
            Err(e) if policy.retryable(attempt, &e) => {
                let delay = policy.next_delay(attempt);
                warn!(
                    "Import of batch {index} into {collection} failed: {e}. Retrying in {delay:?} (attempt {attempt}/{})",
                    policy.attempts()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_planner::BatchPlanner;
    use searchkeeper_core::{CollectionSchema, Document, Error, FieldSpec};
    use searchkeeper_storage::{MockSearchClient, ScriptedFailure};
    use serde_json::json;
    use std::time::Duration;

    fn docs(ids: &[&str]) -> Vec<Document> {
        ids.iter()
            .map(|id| json!({"id": id}).as_object().cloned().unwrap())
            .collect()
    }

    async fn client() -> MockSearchClient {
        let client = MockSearchClient::new();
        client
            .create_collection(&CollectionSchema::new(
                "products_v1",
                vec![FieldSpec::new("id", "string")],
            ))
            .await
            .unwrap();
        client
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2), 0.0)
    }

    fn encode(ids: &[&str]) -> EncodedBatch {
        BatchPlanner::with_fields("id", "doc_updated_at", 1)
            .encode(&docs(ids))
            .unwrap()
    }

    #[test]
    fn test_parse_line_delimited_response() {
        let body = "{\"success\":true}\n{\"success\":false,\"error\":\"bad field\",\"document\":\"{}\"}";
        let tally = parse_import_response(body, 2).unwrap();
        assert_eq!(tally.success_count, 1);
        assert_eq!(tally.failure_count, 1);
        assert_eq!(tally.error_samples, vec!["bad field".to_string()]);
    }

    #[test]
    fn test_parse_array_response() {
        let body = r#"[{"success":true},{"success":true},{"success":false,"error":"x"}]"#;
        let tally = parse_import_response(body, 3).unwrap();
        assert_eq!(tally.success_count, 2);
        assert_eq!(tally.failure_count, 1);
    }

    #[test]
    fn test_error_samples_are_capped() {
        let body = (0..8)
            .map(|i| format!("{{\"success\":false,\"error\":\"e{i}\"}}"))
            .collect::<Vec<_>>()
            .join("\n");
        let tally = parse_import_response(&body, 8).unwrap();
        assert_eq!(tally.failure_count, 8);
        assert_eq!(tally.error_samples.len(), MAX_ERROR_SAMPLES);
    }

    #[test]
    fn test_missing_results_count_as_failures() {
        let tally = parse_import_response("{\"success\":true}", 3).unwrap();
        assert_eq!(tally.success_count, 1);
        assert_eq!(tally.failure_count, 2);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_call() {
        let client = client().await;
        let summary = import_batch(
            &client,
            "products_v1",
            ImportAction::Upsert,
            0,
            &encode(&["1", "2"]),
            &fast_policy(3),
            true,
        )
        .await
        .unwrap();

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 0);
        assert_eq!(summary.attempts, 0);
        assert_eq!(client.call_count("import_documents"), 0);
        assert_eq!(client.document_count("products_v1"), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let client = client().await;
        client.fail_next_import(ScriptedFailure::Connection);
        client.fail_next_import(ScriptedFailure::Status(503));

        let summary = import_batch(
            &client,
            "products_v1",
            ImportAction::Upsert,
            4,
            &encode(&["1", "2", "3"]),
            &fast_policy(3),
            false,
        )
        .await
        .unwrap();

        assert_eq!(summary.index, 4);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.http_status, Some(200));
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let client = client().await;
        for _ in 0..3 {
            client.fail_next_import(ScriptedFailure::Timeout);
        }

        let err = import_batch(
            &client,
            "products_v1",
            ImportAction::Upsert,
            0,
            &encode(&["1"]),
            &fast_policy(3),
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(client.call_count("import_documents"), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let client = client().await;
        client.fail_next_import(ScriptedFailure::Status(413));

        let err = import_batch(
            &client,
            "products_v1",
            ImportAction::Upsert,
            0,
            &encode(&["1"]),
            &fast_policy(3),
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert_eq!(client.call_count("import_documents"), 1);
    }

    #[tokio::test]
    async fn test_partial_document_failure() {
        let client = client().await;
        client.reject_document("2");

        let summary = import_batch(
            &client,
            "products_v1",
            ImportAction::Upsert,
            0,
            &encode(&["1", "2"]),
            &fast_policy(3),
            false,
        )
        .await
        .unwrap();

        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failure_count, 1);
        assert_eq!(summary.error_samples.len(), 1);
    }
}
