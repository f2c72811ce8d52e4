//! Document sources
//!
//! A source yields the batches of one partition in order, lazily where it can.
//! Sources that can look documents up by a field value enable partial cascades.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use searchkeeper_core::{Document, Error, PartitionToken, Result, ResultExt};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Batches of `partition` in submission order; `None` is the whole collection
    fn batches<'a>(
        &'a self,
        partition: Option<&'a PartitionToken>,
    ) -> BoxStream<'a, Result<Vec<Document>>>;

    /// Whether [`DocumentSource::lookup`] is supported
    fn supports_lookup(&self) -> bool {
        false
    }

    /// Documents whose `field` matches any of `values`
    async fn lookup(&self, field: &str, values: &[String]) -> Result<Vec<Document>> {
        let _ = (field, values);
        Err(Error::validation("Document source does not support key lookups"))
    }
}

/// Whether a document's `field` holds any of `values`.
///
/// Strings and numbers compare by their rendered form; arrays match when any
/// element does.
pub fn field_matches(document: &Document, field: &str, values: &HashSet<String>) -> bool {
    fn matches_value(value: &Value, values: &HashSet<String>) -> bool {
        match value {
            Value::String(s) => values.contains(s),
            Value::Number(n) => values.contains(&n.to_string()),
            Value::Array(items) => items.iter().any(|v| matches_value(v, values)),
            _ => false,
        }
    }
    document
        .get(field)
        .is_some_and(|value| matches_value(value, values))
}

/// In-memory source keyed by partition value
pub struct InMemorySource {
    batch_size: usize,
    partitions: DashMap<Option<String>, Vec<Document>>,
    lookup: bool,
}

impl InMemorySource {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            partitions: DashMap::new(),
            lookup: false,
        }
    }

    /// Documents of the implicit single partition
    pub fn with_documents(self, documents: Vec<Document>) -> Self {
        self.set_documents(None, documents);
        self
    }

    /// Documents of the partition whose value renders as `partition`
    pub fn with_partition(self, partition: impl Into<String>, documents: Vec<Document>) -> Self {
        self.set_documents(Some(partition.into()), documents);
        self
    }

    /// Enable key lookups
    pub fn with_lookup(mut self) -> Self {
        self.lookup = true;
        self
    }

    /// Replace the documents of a partition
    pub fn set_documents(&self, partition: Option<String>, documents: Vec<Document>) {
        self.partitions.insert(partition, documents);
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    fn batches<'a>(
        &'a self,
        partition: Option<&'a PartitionToken>,
    ) -> BoxStream<'a, Result<Vec<Document>>> {
        let key = partition.map(ToString::to_string);
        let documents = self
            .partitions
            .get(&key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let batches: Vec<Result<Vec<Document>>> = documents
            .chunks(self.batch_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        stream::iter(batches).boxed()
    }

    fn supports_lookup(&self) -> bool {
        self.lookup
    }

    async fn lookup(&self, field: &str, values: &[String]) -> Result<Vec<Document>> {
        if !self.lookup {
            return Err(Error::validation("Document source does not support key lookups"));
        }
        let wanted: HashSet<String> = values.iter().cloned().collect();
        let mut found = Vec::new();
        for entry in self.partitions.iter() {
            found.extend(
                entry
                    .value()
                    .iter()
                    .filter(|doc| field_matches(doc, field, &wanted))
                    .cloned(),
            );
        }
        Ok(found)
    }
}

/// Newline-delimited JSON files under a root directory.
///
/// An unpartitioned collection reads `<root>/<logical>.jsonl`; partition `t`
/// reads `<root>/<logical>/<t>.jsonl`.
pub struct JsonlSource {
    root: PathBuf,
    logical: String,
    batch_size: usize,
}

enum ReadState {
    Pending(PathBuf),
    Reading {
        lines: Lines<BufReader<File>>,
        line_no: usize,
        path: PathBuf,
    },
    Done,
}

impl JsonlSource {
    pub fn new(root: impl Into<PathBuf>, logical: impl Into<String>, batch_size: usize) -> Self {
        Self {
            root: root.into(),
            logical: logical.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// File backing a partition
    pub fn path_for(&self, partition: Option<&PartitionToken>) -> PathBuf {
        match partition {
            Some(token) => self.root.join(&self.logical).join(format!("{token}.jsonl")),
            None => self.root.join(format!("{}.jsonl", self.logical)),
        }
    }

    /// Every file of the collection, partitioned or not
    async fn all_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let single = self.path_for(None);
        if tokio::fs::try_exists(&single).await? {
            files.push(single);
        }

        let dir = self.root.join(&self.logical);
        if tokio::fs::try_exists(&dir).await? {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .context(format!("Failed to read {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "jsonl") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn parse_line(path: &Path, line_no: usize, line: &str) -> Result<Document> {
    serde_json::from_str(line).map_err(|e| {
        Error::validation(format!(
            "{}:{line_no}: invalid JSON document: {e}",
            path.display()
        ))
    })
}

#[async_trait]
impl DocumentSource for JsonlSource {
    fn batches<'a>(
        &'a self,
        partition: Option<&'a PartitionToken>,
    ) -> BoxStream<'a, Result<Vec<Document>>> {
        let batch_size = self.batch_size;
        stream::unfold(
            ReadState::Pending(self.path_for(partition)),
            move |state| async move {
                let (mut lines, mut line_no, path) = match state {
                    ReadState::Done => return None,
                    ReadState::Pending(path) => match File::open(&path).await {
                        Ok(file) => (BufReader::new(file).lines(), 0, path),
                        Err(e) => {
                            let err = Error::with_context(
                                format!("Failed to open {}", path.display()),
                                e,
                            );
                            return Some((Err(err), ReadState::Done));
                        }
                    },
                    ReadState::Reading {
                        lines,
                        line_no,
                        path,
                    } => (lines, line_no, path),
                };

                let mut batch = Vec::with_capacity(batch_size);
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            line_no += 1;
                            if line.trim().is_empty() {
                                continue;
                            }
                            match parse_line(&path, line_no, &line) {
                                Ok(document) => batch.push(document),
                                Err(e) => return Some((Err(e), ReadState::Done)),
                            }
                            if batch.len() >= batch_size {
                                let next = ReadState::Reading {
                                    lines,
                                    line_no,
                                    path,
                                };
                                return Some((Ok(batch), next));
                            }
                        }
                        Ok(None) if batch.is_empty() => return None,
                        Ok(None) => return Some((Ok(batch), ReadState::Done)),
                        Err(e) => {
                            let err = Error::with_context(
                                format!("Failed to read {}", path.display()),
                                e,
                            );
                            return Some((Err(err), ReadState::Done));
                        }
                    }
                }
            },
        )
        .boxed()
    }

    fn supports_lookup(&self) -> bool {
        true
    }

    async fn lookup(&self, field: &str, values: &[String]) -> Result<Vec<Document>> {
        let wanted: HashSet<String> = values.iter().cloned().collect();
        let mut found = Vec::new();
        for path in self.all_files().await? {
            let content = tokio::fs::read_to_string(&path)
                .await
                .context(format!("Failed to read {}", path.display()))?;
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let document = parse_line(&path, index + 1, line)?;
                if field_matches(&document, field, &wanted) {
                    found.push(document);
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn collect(source: &dyn DocumentSource, partition: Option<&PartitionToken>) -> Vec<Vec<Document>> {
        source
            .batches(partition)
            .map(|batch| batch.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    fn write_jsonl(path: &Path, lines: &[&str]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[tokio::test]
    async fn test_in_memory_batches_in_order() {
        let source = InMemorySource::new(2).with_documents(vec![
            doc(json!({"id": "1"})),
            doc(json!({"id": "2"})),
            doc(json!({"id": "3"})),
        ]);

        let batches = collect(&source, None).await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1][0]["id"], json!("3"));
    }

    #[tokio::test]
    async fn test_in_memory_partitions_and_lookup() {
        let source = InMemorySource::new(10)
            .with_partition("eu", vec![doc(json!({"id": "1", "product_id": 7}))])
            .with_partition("us", vec![doc(json!({"id": "2", "product_id": "8"}))])
            .with_lookup();

        let eu = PartitionToken::new(0, "eu");
        assert_eq!(collect(&source, Some(&eu)).await.len(), 1);
        assert!(collect(&source, None).await.is_empty());

        let found = source
            .lookup("product_id", &["7".to_string(), "8".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_unsupported_by_default() {
        let source = InMemorySource::new(10);
        assert!(!source.supports_lookup());
        assert!(source.lookup("id", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_jsonl_reads_lazily_in_batches() {
        let dir = TempDir::new().unwrap();
        write_jsonl(
            &dir.path().join("products.jsonl"),
            &[r#"{"id":"1"}"#, "", r#"{"id":"2"}"#, r#"{"id":"3"}"#],
        );

        let source = JsonlSource::new(dir.path(), "products", 2);
        let batches = collect(&source, None).await;
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_jsonl_partition_files_and_lookup() {
        let dir = TempDir::new().unwrap();
        write_jsonl(
            &dir.path().join("orders").join("2024.jsonl"),
            &[r#"{"id":"o1","product_id":"p1"}"#],
        );
        write_jsonl(
            &dir.path().join("orders").join("2025.jsonl"),
            &[r#"{"id":"o2","product_id":"p2"}"#, r#"{"id":"o3","product_id":"p1"}"#],
        );

        let source = JsonlSource::new(dir.path(), "orders", 100);
        let token = PartitionToken::new(1, 2025_i64);
        assert_eq!(collect(&source, Some(&token)).await[0].len(), 2);

        let found = source.lookup("product_id", &["p1".to_string()]).await.unwrap();
        let ids: Vec<_> = found.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("o1"), json!("o3")]);
    }

    #[tokio::test]
    async fn test_jsonl_errors() {
        let dir = TempDir::new().unwrap();
        let missing = JsonlSource::new(dir.path(), "ghost", 10);
        let mut stream = missing.batches(None);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());

        write_jsonl(&dir.path().join("broken.jsonl"), &[r#"{"id":"1"}"#, "{not json"]);
        let broken = JsonlSource::new(dir.path(), "broken", 10);
        let mut stream = broken.batches(None);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }
}
