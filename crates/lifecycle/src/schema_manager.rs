//! Blue-green schema management
//!
//! Each schema change produces a new physical generation named
//! `{logical}_v{n}`. The alias is only repointed once the new generation has
//! been populated, and older generations are pruned beyond the retention count.

use crate::events::{EventSink, LifecycleEvent};
use searchkeeper_core::{diff, CollectionSchema, Error, Result, SchemaDiff};
use searchkeeper_storage::SearchClient;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`SchemaManager::apply`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub logical: String,
    /// Generation the alias points at afterwards; `None` only when nothing exists
    pub new_physical: Option<String>,
    pub previous_physical: Option<String>,
    pub dropped_physicals: Vec<String>,
    /// Whether a generation was created
    pub created: bool,
    pub diff: SchemaDiff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub logical: String,
    pub new_target: String,
    pub previous_target: Option<String>,
}

/// Physical generation of a logical collection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation {
    pub number: u64,
    pub physical: String,
}

/// Physical name of generation `number`
pub fn physical_name(logical: &str, number: u64) -> String {
    format!("{logical}_v{number}")
}

/// Generation number of `physical` when it belongs to `logical`
pub fn parse_generation(logical: &str, physical: &str) -> Option<u64> {
    let suffix = physical.strip_prefix(logical)?.strip_prefix("_v")?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

pub struct SchemaManager {
    client: Arc<dyn SearchClient>,
    retention: usize,
    events: Arc<dyn EventSink>,
}

impl SchemaManager {
    pub fn new(client: Arc<dyn SearchClient>, retention: usize, events: Arc<dyn EventSink>) -> Self {
        Self {
            client,
            retention: retention.max(1),
            events,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Live schema behind the alias, `None` when the alias or its target is missing
    pub async fn live_schema(&self, logical: &str) -> Result<Option<CollectionSchema>> {
        match self.client.resolve_alias(logical).await? {
            Some(physical) => self.client.retrieve_schema(&physical).await,
            None => Ok(None),
        }
    }

    /// Diff of the compiled schema against what the alias currently serves
    pub async fn current_diff(&self, compiled: &CollectionSchema) -> Result<SchemaDiff> {
        let live = self.live_schema(&compiled.name).await?;
        Ok(diff(compiled, live.as_ref()))
    }

    /// Existing generations of `logical`, oldest first
    pub async fn generations(&self, logical: &str) -> Result<Vec<Generation>> {
        let mut generations: Vec<Generation> = self
            .client
            .list_collections()
            .await?
            .into_iter()
            .filter_map(|physical| {
                parse_generation(logical, &physical).map(|number| Generation { number, physical })
            })
            .collect();
        generations.sort();
        Ok(generations)
    }

    /// Name the next generation of `logical` would get
    pub async fn next_physical(&self, logical: &str) -> Result<String> {
        let next = self
            .generations(logical)
            .await?
            .last()
            .map_or(1, |g| g.number + 1);
        Ok(physical_name(logical, next))
    }

    /// Bring the alias of `schema.name` in line with the compiled schema.
    ///
    /// When the live schema already matches, nothing is created and `populate`
    /// is not called. Otherwise a new generation is created, handed to
    /// `populate`, and only on success aliased and followed by pruning.
    pub async fn apply<T, F, Fut>(
        &self,
        schema: &CollectionSchema,
        populate: F,
    ) -> Result<(ApplyResult, Option<T>)>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let logical = schema.name.clone();
        let previous = self.client.resolve_alias(&logical).await?;
        let live = match &previous {
            Some(physical) => self.client.retrieve_schema(physical).await?,
            None => None,
        };
        let changes = diff(schema, live.as_ref());
        self.events.emit(&LifecycleEvent::SchemaDiffComputed {
            collection: logical.clone(),
            status: changes.status(),
            diff: changes.clone(),
        });

        if changes.is_empty() {
            debug!(collection = %logical, "Schema in sync, nothing to apply");
            return Ok((
                ApplyResult {
                    logical,
                    new_physical: previous,
                    previous_physical: None,
                    dropped_physicals: Vec::new(),
                    created: false,
                    diff: changes,
                },
                None,
            ));
        }

        let physical = self.next_physical(&logical).await?;
        info!(collection = %logical, physical = %physical, "Creating physical generation");
        self.client.create_collection(&schema.renamed(&physical)).await?;
        self.events.emit(&LifecycleEvent::PhysicalCreated {
            collection: logical.clone(),
            physical: physical.clone(),
        });

        let populated = match populate(physical.clone()).await {
            Ok(populated) => populated,
            Err(e) => {
                warn!(physical = %physical, "Population failed, discarding generation: {e}");
                if let Err(cleanup) = self.client.delete_collection(&physical).await {
                    warn!(physical = %physical, "Failed to discard unpopulated generation: {cleanup}");
                }
                return Err(match e {
                    Error::Population { .. } => e,
                    other => Error::Population {
                        physical,
                        message: other.to_string(),
                    },
                });
            }
        };

        if let Err(e) = self.client.upsert_alias(&logical, &physical).await {
            return Err(Error::AliasSwap {
                logical,
                physical,
                message: e.to_string(),
            });
        }
        info!(collection = %logical, physical = %physical, "Alias swapped");
        self.events.emit(&LifecycleEvent::AliasSwapped {
            collection: logical.clone(),
            from: previous.clone(),
            to: physical.clone(),
        });

        let dropped_physicals = self.prune(&logical, &physical).await?;

        Ok((
            ApplyResult {
                logical,
                new_physical: Some(physical),
                previous_physical: previous,
                dropped_physicals,
                created: true,
                diff: changes,
            },
            Some(populated),
        ))
    }

    /// Drop generations beyond retention, oldest first, never the live one.
    ///
    /// Already-absent generations are skipped; other delete failures are logged
    /// and leave the generation in place.
    async fn prune(&self, logical: &str, live: &str) -> Result<Vec<String>> {
        let generations = self.generations(logical).await?;
        let excess = generations.len().saturating_sub(self.retention);
        let mut dropped = Vec::new();

        for generation in generations.into_iter().take(excess) {
            if generation.physical == live {
                continue;
            }
            match self.client.delete_collection(&generation.physical).await {
                Ok(()) => {
                    info!(physical = %generation.physical, "Pruned generation");
                    self.events.emit(&LifecycleEvent::GenerationDropped {
                        collection: logical.to_string(),
                        physical: generation.physical.clone(),
                    });
                    dropped.push(generation.physical);
                }
                Err(e) if e.is_not_found() => {
                    debug!(physical = %generation.physical, "Generation already absent");
                }
                Err(e) => {
                    warn!(physical = %generation.physical, "Failed to prune generation: {e}");
                }
            }
        }
        Ok(dropped)
    }

    /// Point the alias at the generation preceding the live one.
    ///
    /// Without an alias the second-most-recent generation is used.
    pub async fn rollback(&self, logical: &str) -> Result<RollbackResult> {
        let generations = self.generations(logical).await?;
        let unavailable = || Error::RollbackUnavailable {
            collection: logical.to_string(),
            retained: generations.len(),
        };
        if generations.len() < 2 {
            return Err(unavailable());
        }

        let previous = self.client.resolve_alias(logical).await?;
        let live_position = previous
            .as_deref()
            .and_then(|p| generations.iter().position(|g| g.physical == p))
            .unwrap_or(generations.len() - 1);
        let target = live_position
            .checked_sub(1)
            .and_then(|i| generations.get(i))
            .ok_or_else(unavailable)?;

        self.client.upsert_alias(logical, &target.physical).await?;
        info!(collection = %logical, physical = %target.physical, "Rolled back");
        self.events.emit(&LifecycleEvent::AliasSwapped {
            collection: logical.to_string(),
            from: previous.clone(),
            to: target.physical.clone(),
        });

        Ok(RollbackResult {
            logical: logical.to_string(),
            new_target: target.physical.clone(),
            previous_target: previous,
        })
    }

    /// Delete every generation of `logical`, returning the deleted names
    pub async fn drop_all(&self, logical: &str) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        for generation in self.generations(logical).await? {
            match self.client.delete_collection(&generation.physical).await {
                Ok(()) => {
                    self.events.emit(&LifecycleEvent::GenerationDropped {
                        collection: logical.to_string(),
                        physical: generation.physical.clone(),
                    });
                    dropped.push(generation.physical);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        info!(collection = %logical, count = dropped.len(), "Dropped all generations");
        Ok(dropped)
    }
}
