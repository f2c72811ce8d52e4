//! Stale document filters and deletion
//!
//! Staleness rules are resolved into one `filter_by` expression per partition.
//! Rule groups are OR-ed together, each wrapped in parentheses. When the
//! partition spec names its token field, the group is AND-ed with
//! `{field}:={token}` so a partition only deletes its own documents. A
//! collection with no rules compiles to `None` and its deletion step is skipped.

use searchkeeper_core::{Error, PartitionToken, Result, TokenValue};
use searchkeeper_storage::SearchClient;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Callback returning a filter fragment for the whole collection
pub type StaticStaleFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Callback returning a filter fragment for one partition
pub type PartitionedStaleFn = Arc<dyn Fn(Option<&PartitionToken>) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub enum StaleCallback {
    Static(StaticStaleFn),
    Partitioned(PartitionedStaleFn),
}

impl StaleCallback {
    fn call(&self, partition: Option<&PartitionToken>) -> Option<String> {
        match self {
            Self::Static(f) => f(),
            Self::Partitioned(f) => f(partition),
        }
    }
}

impl fmt::Debug for StaleCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(<fn>)"),
            Self::Partitioned(_) => f.write_str("Partitioned(<fn>)"),
        }
    }
}

/// A declared staleness rule
#[derive(Debug, Clone)]
pub enum StaleRule {
    /// Named scope registered on the collection
    Scope { name: String },
    /// `field` equals `value`
    Attribute { field: String, value: Value },
    /// Every pair in the map matches
    Hash(BTreeMap<String, Value>),
    /// Filter fragment used verbatim
    RawFilter { expr: String },
    Callback(StaleCallback),
    /// Documents whose ingestion timestamp predates the current run
    NotRefreshed,
}

/// Values a rule may refer to while compiling
#[derive(Debug, Clone, Copy)]
pub struct StaleContext<'a> {
    pub scopes: &'a BTreeMap<String, String>,
    pub timestamp_field: &'a str,
    pub run_started_at: i64,
    /// Field the partition token is matched against
    pub partition_field: Option<&'a str>,
}

/// Backtick-quote a string; the filter grammar has no escape for a backtick
fn quoted(s: &str) -> Result<String> {
    if s.contains('`') {
        return Err(Error::validation(format!(
            "Filter value {s:?} contains a backtick"
        )));
    }
    Ok(format!("`{s}`"))
}

/// Render a JSON value as a filter literal
fn literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::String(s) => quoted(s)?,
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(literal).collect::<Result<Vec<_>>>()?.join(",")
        ),
        other => other.to_string(),
    })
}

fn clause(field: &str, value: &Value) -> Result<String> {
    Ok(format!("{field}:={}", literal(value)?))
}

fn token_clause(field: &str, token: &PartitionToken) -> Result<String> {
    Ok(match token.value() {
        TokenValue::Number(n) => format!("{field}:={n}"),
        TokenValue::Text(s) => format!("{field}:={}", quoted(s)?),
    })
}

fn non_empty(fragment: Option<String>) -> Option<String> {
    fragment
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
}

impl StaleRule {
    fn fragment(
        &self,
        partition: Option<&PartitionToken>,
        context: &StaleContext<'_>,
    ) -> Result<Option<String>> {
        Ok(match self {
            Self::Scope { name } => {
                let expr = context.scopes.get(name).ok_or_else(|| {
                    Error::validation(format!("Stale rule refers to unknown scope '{name}'"))
                })?;
                non_empty(Some(expr.clone()))
            }
            Self::Attribute { field, value } => Some(clause(field, value)?),
            Self::Hash(pairs) => {
                let clauses = pairs
                    .iter()
                    .map(|(f, v)| clause(f, v))
                    .collect::<Result<Vec<_>>>()?;
                (!clauses.is_empty()).then(|| clauses.join(" && "))
            }
            Self::RawFilter { expr } => non_empty(Some(expr.clone())),
            Self::Callback(callback) => non_empty(callback.call(partition)),
            Self::NotRefreshed => Some(format!(
                "{}:<{}",
                context.timestamp_field, context.run_started_at
            )),
        })
    }
}

/// Merge every rule into one filter for `partition`, `None` when nothing applies
pub fn compile(
    rules: &[StaleRule],
    partition: Option<&PartitionToken>,
    context: &StaleContext<'_>,
) -> Result<Option<String>> {
    let mut fragments = Vec::new();
    for rule in rules {
        if let Some(fragment) = rule.fragment(partition, context)? {
            fragments.push(format!("({fragment})"));
        }
    }
    if fragments.is_empty() {
        return Ok(None);
    }
    let group = fragments.join(" || ");
    match (context.partition_field, partition) {
        (Some(field), Some(token)) => {
            Ok(Some(format!("{} && ({group})", token_clause(field, token)?)))
        }
        _ => Ok(Some(group)),
    }
}

/// Delete documents matching `filter`.
///
/// Re-running against an already-clean collection returns 0.
pub async fn delete(client: &dyn SearchClient, collection: &str, filter: &str) -> Result<u64> {
    if filter.trim().is_empty() {
        debug!(collection, "Empty stale filter, nothing to delete");
        return Ok(0);
    }
    let deleted = client.delete_by_filter(collection, filter).await?;
    info!(collection, deleted, "Deleted stale documents");
    Ok(deleted)
}
