//! Dependent re-indexation
//!
//! The graph is an arena of collection nodes with index-based edges running
//! from a source collection to the collections that join against it. Cycles are
//! allowed; traversal carries the current chain and refuses to re-enter it.

use crate::registry::CollectionRegistry;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use searchkeeper_core::error::{truncate_message, MAX_REPORTED_MESSAGE_CHARS};
use searchkeeper_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    Partial,
    Full,
    SkippedUnregistered,
    SkippedCycle,
}

impl fmt::Display for CascadeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Partial => "partial",
            Self::Full => "full",
            Self::SkippedUnregistered => "skipped_unregistered",
            Self::SkippedCycle => "skipped_cycle",
        })
    }
}

/// What happened to one dependent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    pub collection: String,
    /// Collection whose change reached this dependent
    pub via: String,
    pub mode: CascadeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CascadeOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub source: String,
    pub outcomes: Vec<CascadeOutcome>,
}

impl CascadeReport {
    pub fn failures(&self) -> impl Iterator<Item = &CascadeOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

/// Re-indexes one dependent on behalf of the graph
#[async_trait]
pub trait DependentReindexer: Send + Sync {
    fn is_registered(&self, logical: &str) -> bool;

    /// Whether `logical` can re-import a subset selected by key
    fn supports_partial(&self, logical: &str) -> bool;

    /// Full run of `logical`, applying its schema when needed
    async fn reindex_full(&self, logical: &str) -> Result<()>;

    /// Re-import the documents of `logical` whose `local_key` holds one of
    /// `ids`, returning the identities of the re-imported documents
    async fn reindex_partial(&self, logical: &str, local_key: &str, ids: &[String])
        -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Edge {
    target: usize,
    local_key: Option<String>,
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    edges: Vec<Edge>,
}

#[derive(Debug, Clone, Default)]
pub struct CascadeGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl CascadeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of every registered join plus `extra_edges` (source, dependent)
    pub fn from_registry(registry: &CollectionRegistry, extra_edges: &[(String, String)]) -> Self {
        let mut graph = Self::new();
        for definition in registry.definitions() {
            graph.node(&definition.logical);
            for join in definition.all_joins() {
                graph.add_edge(&join.source, &definition.logical, join.local_key);
            }
        }
        for (source, dependent) in extra_edges {
            graph.add_edge(source, dependent, None);
        }
        graph
    }

    fn node(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            edges: Vec::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Declare that `dependent` joins against `source`
    pub fn add_edge(&mut self, source: &str, dependent: &str, local_key: Option<String>) {
        let from = self.node(source);
        let target = self.node(dependent);
        if self.nodes[from].edges.iter().any(|e| e.target == target) {
            return;
        }
        let mut edges = std::mem::take(&mut self.nodes[from].edges);
        edges.push(Edge { target, local_key });
        edges.sort_by(|a, b| self.nodes[a.target].name.cmp(&self.nodes[b.target].name));
        self.nodes[from].edges = edges;
    }

    /// Direct dependents of `source`, sorted by name
    pub fn dependents(&self, source: &str) -> Vec<&str> {
        self.index
            .get(source)
            .map(|&id| {
                self.nodes[id]
                    .edges
                    .iter()
                    .map(|e| self.nodes[e.target].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Depth-first re-indexation of everything downstream of `source`.
    ///
    /// With `ids`, dependents that declare a local key and support lookups are
    /// re-indexed partially; everything else gets a full run. Dependents run
    /// one at a time and a failing dependent does not stop its siblings.
    pub async fn reindex_dependents(
        &self,
        source: &str,
        ids: Option<&[String]>,
        reindexer: &dyn DependentReindexer,
    ) -> CascadeReport {
        let mut outcomes = Vec::new();
        if let Some(&start) = self.index.get(source) {
            let mut chain = vec![start];
            self.visit(start, ids.map(<[String]>::to_vec), &mut chain, reindexer, &mut outcomes)
                .await;
        }
        CascadeReport {
            source: source.to_string(),
            outcomes,
        }
    }

    fn visit<'a>(
        &'a self,
        node: usize,
        ids: Option<Vec<String>>,
        chain: &'a mut Vec<usize>,
        reindexer: &'a dyn DependentReindexer,
        outcomes: &'a mut Vec<CascadeOutcome>,
    ) -> BoxFuture<'a, ()> {
        async move {
            let via = self.nodes[node].name.clone();
            for edge in &self.nodes[node].edges {
                let name = self.nodes[edge.target].name.clone();
                let outcome = |mode, error| CascadeOutcome {
                    collection: name.clone(),
                    via: via.clone(),
                    mode,
                    error,
                };

                if chain.contains(&edge.target) {
                    debug!(collection = %name, via = %via, "Cascade cycle, skipping");
                    outcomes.push(outcome(CascadeMode::SkippedCycle, None));
                    continue;
                }
                if !reindexer.is_registered(&name) {
                    debug!(collection = %name, "Cascade dependent is not registered");
                    outcomes.push(outcome(CascadeMode::SkippedUnregistered, None));
                    continue;
                }

                let partial = match (&ids, &edge.local_key) {
                    (Some(ids), Some(key)) if reindexer.supports_partial(&name) => Some((ids, key)),
                    _ => None,
                };
                let (mode, result) = match partial {
                    Some((ids, key)) => (
                        CascadeMode::Partial,
                        reindexer.reindex_partial(&name, key, ids).await.map(Some),
                    ),
                    None => (
                        CascadeMode::Full,
                        reindexer.reindex_full(&name).await.map(|()| None),
                    ),
                };

                match result {
                    Ok(next_ids) => {
                        outcomes.push(outcome(mode, None));
                        chain.push(edge.target);
                        self.visit(edge.target, next_ids, chain, reindexer, outcomes)
                            .await;
                        chain.pop();
                    }
                    Err(e) => {
                        warn!(collection = %name, via = %via, "Cascade re-indexation failed: {e}");
                        outcomes.push(outcome(
                            mode,
                            Some(truncate_message(&e.to_string(), MAX_REPORTED_MESSAGE_CHARS)),
                        ));
                    }
                }
            }
        }
        .boxed()
    }
}
