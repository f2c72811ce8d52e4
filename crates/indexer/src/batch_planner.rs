//! Turns in-memory documents into one newline-delimited transfer unit

use searchkeeper_core::config::IndexerConfig;
use searchkeeper_core::{identity_of, Document, Error, Result};
use serde_json::Value;

/// A validated, serialized batch ready for one import call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    pub payload: String,
    pub docs_count: usize,
    pub byte_size: usize,
}

/// Encodes batches for one indexation run.
///
/// Every record is stamped with the run's ingestion time so stale documents can
/// later be recognised by their older timestamp.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    identity_field: String,
    timestamp_field: String,
    generated_at: i64,
}

impl BatchPlanner {
    /// `generated_at` is the run start as Unix seconds
    pub fn new(config: &IndexerConfig, generated_at: i64) -> Self {
        Self::with_fields(
            config.identity_field.clone(),
            config.timestamp_field.clone(),
            generated_at,
        )
    }

    pub fn with_fields(
        identity_field: impl Into<String>,
        timestamp_field: impl Into<String>,
        generated_at: i64,
    ) -> Self {
        Self {
            identity_field: identity_field.into(),
            timestamp_field: timestamp_field.into(),
            generated_at,
        }
    }

    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    pub fn timestamp_field(&self) -> &str {
        &self.timestamp_field
    }

    pub fn generated_at(&self) -> i64 {
        self.generated_at
    }

    /// Validate and serialize `documents`, one record per line.
    ///
    /// Fails on the first document without a usable identity.
    pub fn encode(&self, documents: &[Document]) -> Result<EncodedBatch> {
        let mut payload = String::new();

        for (position, document) in documents.iter().enumerate() {
            if identity_of(document, &self.identity_field).is_none() {
                return Err(Error::validation(format!(
                    "Document at position {position} is missing identity field '{}'",
                    self.identity_field
                )));
            }

            let mut record = document.clone();
            record.insert(
                self.timestamp_field.clone(),
                Value::from(self.generated_at),
            );
            payload.push_str(&serde_json::to_string(&record)?);
            payload.push('\n');
        }

        Ok(EncodedBatch {
            byte_size: payload.len(),
            docs_count: documents.len(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    fn planner() -> BatchPlanner {
        BatchPlanner::with_fields("id", "doc_updated_at", 1_700_000_000)
    }

    #[test]
    fn test_encode_one_line_per_document() {
        let documents = vec![
            doc(json!({"id": 1, "name": "line\nbreak"})),
            doc(json!({"id": "2", "name": "b"})),
            doc(json!({"id": "3", "tags": ["x", "y"]})),
        ];

        let batch = planner().encode(&documents).unwrap();
        assert_eq!(batch.docs_count, 3);
        assert_eq!(batch.byte_size, batch.payload.len());
        assert!(batch.payload.ends_with('\n'));
        assert!(!batch.payload.ends_with("\n\n"));

        let lines: Vec<&str> = batch.payload.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let record: Document = serde_json::from_str(line).unwrap();
            assert_eq!(record.get("doc_updated_at"), Some(&json!(1_700_000_000)));
        }
    }

    #[test]
    fn test_encode_empty_batch() {
        let batch = planner().encode(&[]).unwrap();
        assert_eq!(batch.payload, "");
        assert_eq!(batch.docs_count, 0);
        assert_eq!(batch.byte_size, 0);
    }

    #[test]
    fn test_missing_identity_is_validation_error() {
        let documents = vec![doc(json!({"id": "1"})), doc(json!({"name": "anonymous"}))];
        let err = planner().encode(&documents).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!err.is_retryable_kind());
        assert!(err.to_string().contains("position 1"));
    }

    #[test]
    fn test_empty_identity_is_rejected() {
        let documents = vec![doc(json!({"id": ""}))];
        assert!(planner().encode(&documents).is_err());
    }

    #[test]
    fn test_timestamp_overrides_source_value() {
        let documents = vec![doc(json!({"id": "1", "doc_updated_at": 5}))];
        let batch = planner().encode(&documents).unwrap();
        assert!(batch.payload.contains("\"doc_updated_at\":1700000000"));
        assert!(!batch.payload.contains("\"doc_updated_at\":5"));
    }
}
