//! In-memory search client for testing
//!
//! Holds collections, aliases and documents behind a mutex and behaves like a
//! single-node service: aliases resolve on every document call, imports honour
//! the requested action and answer with one JSON result per line, and
//! `filter_by` deletions evaluate a practical subset of the filter grammar.
//! Failures can be scripted per operation.

mod filter;

use crate::{ImportResponse, SearchClient};
use async_trait::async_trait;
use searchkeeper_core::error::{Error, Result};
use searchkeeper_core::{CollectionSchema, Document, ImportAction};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const IDENTITY_FIELD: &str = "id";

/// Failure injected into the next call of a given operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Connection,
    Timeout,
    /// Non-success HTTP status; 413 surfaces as payload-too-large
    Status(u16),
}

impl ScriptedFailure {
    fn into_error(self, payload_bytes: usize) -> Error {
        match self {
            Self::Connection => Error::connection("mock: connection reset"),
            Self::Timeout => Error::timeout("mock: request timed out"),
            Self::Status(413) => Error::PayloadTooLarge {
                bytes: payload_bytes,
            },
            Self::Status(status) => Error::api(status, format!("mock: scripted HTTP {status}")),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredCollection {
    schema: CollectionSchema,
    documents: BTreeMap<String, Document>,
}

impl StoredCollection {
    /// `id` is always filterable; a `.*` field indexes everything
    fn is_filterable(&self, field: &str) -> bool {
        field == IDENTITY_FIELD
            || self
                .schema
                .fields
                .iter()
                .any(|f| f.name == field || f.name == ".*")
    }
}

#[derive(Debug, Default)]
struct MockData {
    collections: BTreeMap<String, StoredCollection>,
    aliases: HashMap<String, String>,
    calls: Vec<String>,
    create_failures: VecDeque<ScriptedFailure>,
    import_failures: VecDeque<ScriptedFailure>,
    alias_failures: VecDeque<ScriptedFailure>,
    delete_failures: VecDeque<ScriptedFailure>,
    rejected_ids: HashSet<String>,
    max_payload_bytes: Option<usize>,
}

impl MockData {
    /// Physical collection addressed by a name that may be an alias
    fn resolve(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut StoredCollection> {
        let physical = self.resolve(name);
        self.collections
            .get_mut(&physical)
            .ok_or_else(|| Error::api(404, format!("Collection `{name}` not found.")))
    }
}

/// In-memory [`SearchClient`]
#[derive(Clone, Default)]
pub struct MockSearchClient {
    data: Arc<Mutex<MockData>>,
}

impl MockSearchClient {
    /// Create an empty mock service
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockData> {
        // A panicking test thread must not wedge every later assertion
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject import payloads above `bytes` with payload-too-large
    pub fn with_max_payload_bytes(self, bytes: usize) -> Self {
        self.state().max_payload_bytes = Some(bytes);
        self
    }

    /// Fail the next `create_collection` call
    pub fn fail_next_create(&self, failure: ScriptedFailure) {
        self.state().create_failures.push_back(failure);
    }

    /// Fail the next `import_documents` call; queue several for consecutive failures
    pub fn fail_next_import(&self, failure: ScriptedFailure) {
        self.state().import_failures.push_back(failure);
    }

    /// Fail the next `upsert_alias` call
    pub fn fail_next_alias(&self, failure: ScriptedFailure) {
        self.state().alias_failures.push_back(failure);
    }

    /// Fail the next `delete_collection` call
    pub fn fail_next_delete(&self, failure: ScriptedFailure) {
        self.state().delete_failures.push_back(failure);
    }

    /// Reject documents with this identity on import
    pub fn reject_document(&self, id: impl Into<String>) {
        self.state().rejected_ids.insert(id.into());
    }

    /// Store a document directly, bypassing import
    pub fn insert_document(&self, collection: &str, document: Document) -> Result<()> {
        let mut data = self.state();
        let id = document
            .get(IDENTITY_FIELD)
            .and_then(identity_string)
            .ok_or_else(|| Error::validation("mock: document has no id"))?;
        data.collection_mut(collection)?
            .documents
            .insert(id, document);
        Ok(())
    }

    /// Names of every physical collection, sorted
    pub fn collection_names(&self) -> Vec<String> {
        self.state()
            .collections
            .keys()
            .cloned()
            .collect()
    }

    /// Current alias target
    pub fn alias_target(&self, logical: &str) -> Option<String> {
        self.state().aliases.get(logical).cloned()
    }

    /// Number of documents stored in a collection (alias names resolve)
    pub fn document_count(&self, collection: &str) -> usize {
        let data = self.state();
        let physical = data.resolve(collection);
        data.collections
            .get(&physical)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    /// Stored document by identity
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        let data = self.state();
        let physical = data.resolve(collection);
        data.collections
            .get(&physical)
            .and_then(|c| c.documents.get(id).cloned())
    }

    /// Sorted identities stored in a collection
    pub fn document_ids(&self, collection: &str) -> Vec<String> {
        let data = self.state();
        let physical = data.resolve(collection);
        data.collections
            .get(&physical)
            .map(|c| c.documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Log of calls in the order they reached the mock
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls whose log entry starts with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

fn identity_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Apply one import line, returning the per-document result object
fn import_line(
    collection: &mut StoredCollection,
    rejected: &HashSet<String>,
    line: &str,
    action: ImportAction,
) -> Value {
    let document: Document = match serde_json::from_str(line) {
        Ok(doc) => doc,
        Err(_) => return json!({"success": false, "error": "Bad JSON.", "document": line}),
    };
    let Some(id) = document.get(IDENTITY_FIELD).and_then(identity_string) else {
        return json!({"success": false, "error": "Document has no `id` field.", "document": line});
    };
    if rejected.contains(&id) {
        return json!({"success": false, "error": format!("Document `{id}` rejected."), "document": line});
    }

    let exists = collection.documents.contains_key(&id);
    match action {
        ImportAction::Create if exists => {
            return json!({
                "success": false,
                "error": format!("A document with id {id} already exists."),
                "document": line
            });
        }
        ImportAction::Update if !exists => {
            return json!({
                "success": false,
                "error": format!("Could not find a document with id: {id}"),
                "document": line
            });
        }
        ImportAction::Update | ImportAction::Emplace if exists => {
            if let Some(stored) = collection.documents.get_mut(&id) {
                stored.extend(document);
            }
        }
        _ => {
            collection.documents.insert(id, document);
        }
    }
    json!({"success": true})
}

#[async_trait]
impl SearchClient for MockSearchClient {
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut data = self.state();
        data.calls.push(format!("create_collection {}", schema.name));
        if let Some(failure) = data.create_failures.pop_front() {
            return Err(failure.into_error(0));
        }
        if data.collections.contains_key(&schema.name) {
            return Err(Error::api(
                409,
                format!("A collection with name `{}` already exists.", schema.name),
            ));
        }
        schema
            .validate()
            .map_err(|e| Error::api(400, e.to_string()))?;

        let mut stored = schema.clone();
        stored.fields = schema.fields.iter().map(|f| f.normalized()).collect();
        data.collections.insert(
            schema.name.clone(),
            StoredCollection {
                schema: stored,
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, physical: &str) -> Result<()> {
        let mut data = self.state();
        data.calls.push(format!("delete_collection {physical}"));
        if let Some(failure) = data.delete_failures.pop_front() {
            return Err(failure.into_error(0));
        }
        data.collections
            .remove(physical)
            .map(|_| ())
            .ok_or_else(|| Error::api(404, format!("No collection with name `{physical}` found.")))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut data = self.state();
        data.calls.push("list_collections".to_string());
        Ok(data.collections.keys().cloned().collect())
    }

    async fn resolve_alias(&self, logical: &str) -> Result<Option<String>> {
        let mut data = self.state();
        data.calls.push(format!("resolve_alias {logical}"));
        Ok(data.aliases.get(logical).cloned())
    }

    async fn upsert_alias(&self, logical: &str, physical: &str) -> Result<()> {
        let mut data = self.state();
        data.calls.push(format!("upsert_alias {logical} {physical}"));
        if let Some(failure) = data.alias_failures.pop_front() {
            return Err(failure.into_error(0));
        }
        if !data.collections.contains_key(physical) {
            return Err(Error::api(
                404,
                format!("Collection `{physical}` not found."),
            ));
        }
        data.aliases
            .insert(logical.to_string(), physical.to_string());
        Ok(())
    }

    async fn retrieve_schema(&self, physical: &str) -> Result<Option<CollectionSchema>> {
        let mut data = self.state();
        data.calls.push(format!("retrieve_schema {physical}"));
        let resolved = data.resolve(physical);
        Ok(data.collections.get(&resolved).map(|c| c.schema.clone()))
    }

    async fn import_documents(
        &self,
        physical: &str,
        payload: &str,
        action: ImportAction,
    ) -> Result<ImportResponse> {
        let mut data = self.state();
        data.calls
            .push(format!("import_documents {physical} {action}"));
        if let Some(failure) = data.import_failures.pop_front() {
            return Err(failure.into_error(payload.len()));
        }
        if let Some(max) = data.max_payload_bytes {
            if payload.len() > max {
                return Err(Error::PayloadTooLarge {
                    bytes: payload.len(),
                });
            }
        }

        let rejected = data.rejected_ids.clone();
        let collection = data.collection_mut(physical)?;
        let results: Vec<String> = payload
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| import_line(collection, &rejected, line, action).to_string())
            .collect();

        Ok(ImportResponse {
            http_status: 200,
            body: results.join("\n"),
        })
    }

    async fn delete_by_filter(&self, physical: &str, filter_by: &str) -> Result<u64> {
        let mut data = self.state();
        data.calls
            .push(format!("delete_by_filter {physical} {filter_by}"));
        let parsed = filter::parse(filter_by).map_err(|e| Error::api(400, e))?;
        let collection = data.collection_mut(physical)?;
        // The service only filters on indexed fields
        if let Some(field) = parsed
            .fields()
            .into_iter()
            .find(|field| !collection.is_filterable(field))
        {
            return Err(Error::api(
                404,
                format!("Could not find a filter field named `{field}` in the schema."),
            ));
        }

        let before = collection.documents.len();
        collection
            .documents
            .retain(|_, doc| !filter::matches(&parsed, doc));
        Ok((before - collection.documents.len()) as u64)
    }
}
