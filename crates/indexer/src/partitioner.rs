//! Compiles declarative partition specs into ordered token sequences

use searchkeeper_core::{Error, PartitionToken, Result, TokenValue};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Callback producing partition values at compile time
pub type TokenGenerator = Arc<dyn Fn() -> Vec<TokenValue> + Send + Sync>;

/// Where partition values come from
#[derive(Clone)]
pub enum PartitionSource {
    /// Explicit values in declaration order
    Enumerated(Vec<TokenValue>),
    /// Inclusive numeric range
    Range { start: i64, end: i64, step: i64 },
    Custom(TokenGenerator),
}

impl fmt::Debug for PartitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enumerated(values) => f.debug_tuple("Enumerated").field(values).finish(),
            Self::Range { start, end, step } => f
                .debug_struct("Range")
                .field("start", start)
                .field("end", end)
                .field("step", step)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Declarative partition spec of one collection
#[derive(Debug, Clone)]
pub struct PartitionSpec {
    pub source: PartitionSource,
    /// Advisory bound on concurrently indexed partitions
    pub max_parallel: Option<usize>,
    /// Document field carrying the token
    pub field: Option<String>,
}

impl PartitionSpec {
    pub fn enumerated<V: Into<TokenValue>>(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            source: PartitionSource::Enumerated(values.into_iter().map(Into::into).collect()),
            max_parallel: None,
            field: None,
        }
    }

    pub fn range(start: i64, end: i64, step: i64) -> Self {
        Self {
            source: PartitionSource::Range { start, end, step },
            max_parallel: None,
            field: None,
        }
    }

    pub fn custom(generator: impl Fn() -> Vec<TokenValue> + Send + Sync + 'static) -> Self {
        Self {
            source: PartitionSource::Custom(Arc::new(generator)),
            max_parallel: None,
            field: None,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    /// Name the document field holding the token so stale deletion stays
    /// inside the partition
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Deterministic partition sequence; `None` is the implicit single partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPartitions {
    pub partitions: Vec<Option<PartitionToken>>,
    pub max_parallel: Option<usize>,
}

impl CompiledPartitions {
    /// The single implicit partition
    pub fn implicit() -> Self {
        Self {
            partitions: vec![None],
            max_parallel: None,
        }
    }

    /// Token whose value renders as `selector`
    pub fn select(&self, selector: &str) -> Option<&PartitionToken> {
        self.partitions
            .iter()
            .flatten()
            .find(|token| token.matches(selector))
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitions.iter().any(Option::is_some)
    }
}

/// Compile a partition spec.
///
/// Tokens carry their declaration ordinal. Empty or duplicate-valued sequences
/// and non-positive range steps are rejected.
pub fn compile(spec: Option<&PartitionSpec>) -> Result<CompiledPartitions> {
    let Some(spec) = spec else {
        return Ok(CompiledPartitions::implicit());
    };

    let values: Vec<TokenValue> = match &spec.source {
        PartitionSource::Enumerated(values) => values.clone(),
        PartitionSource::Range { start, end, step } => {
            if *step <= 0 {
                return Err(Error::validation(format!(
                    "Partition range step must be positive, got {step}"
                )));
            }
            let mut values = Vec::new();
            let mut current = *start;
            while current <= *end {
                values.push(TokenValue::Number(current));
                current = match current.checked_add(*step) {
                    Some(next) => next,
                    None => break,
                };
            }
            values
        }
        PartitionSource::Custom(generator) => generator(),
    };

    if values.is_empty() {
        return Err(Error::validation("Partition spec produced no partitions"));
    }

    let mut seen = HashSet::new();
    for value in &values {
        if !seen.insert(value) {
            return Err(Error::validation(format!(
                "Partition spec declares '{value}' more than once"
            )));
        }
    }

    if spec.max_parallel == Some(0) {
        return Err(Error::validation("Partition max_parallel must be at least 1"));
    }

    Ok(CompiledPartitions {
        partitions: values
            .into_iter()
            .enumerate()
            .map(|(ordinal, value)| Some(PartitionToken::new(ordinal, value)))
            .collect(),
        max_parallel: spec.max_parallel,
    })
}
