//! Per-collection lifecycle state machine
//!
//! Each run derives the collection state from a fresh schema diff:
//!
//! - `absent` and `present_drift` go through a blue-green apply whose
//!   population step indexes every partition into the new generation
//! - `present_in_sync` indexes straight into the aliased generation, either
//!   every partition or a single selected one
//!
//! Only a successful run over all partitions deletes stale documents and
//! cascades to dependents. Nothing guards two concurrent runs on the same
//! collection; callers must keep to one writer per collection.

use crate::cascade::{CascadeGraph, CascadeReport, DependentReindexer};
use crate::events::{EventSink, LifecycleEvent, TracingEventSink};
use crate::registry::{CollectionDefinition, CollectionRegistry};
use crate::schema_manager::{ApplyResult, Generation, RollbackResult, SchemaManager};
use async_trait::async_trait;
use chrono::Utc;
use searchkeeper_core::error::{truncate_message, MAX_REPORTED_MESSAGE_CHARS};
use searchkeeper_core::partition::describe;
use searchkeeper_core::{
    identity_of, CollectionSchema, Config, Error, PartitionToken, Result, SchemaDiff, SchemaStatus,
};
use searchkeeper_indexer::partitioner::{self, CompiledPartitions};
use searchkeeper_indexer::stale::{self, StaleContext};
use searchkeeper_indexer::{
    DispatchHandle, ExecutionDispatcher, ExecutionMode, ImportStatus, ImportSummary, JobMetadata,
    JobStatus, PartitionIndexer,
};
use searchkeeper_storage::SearchClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Caller choices for one run
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Index only the partition rendering as this value
    pub partition: Option<String>,
    pub mode: ExecutionMode,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// First generation created and populated
    Create,
    /// New generation populated to replace a drifted one
    Migrate,
    /// Every partition indexed into the live generation
    Full,
    /// One partition indexed into the live generation
    Partial,
    /// Batches encoded, nothing sent
    DryRun,
}

/// Result of dispatching one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PartitionOutcome {
    Completed {
        summary: ImportSummary,
    },
    Enqueued {
        partition: Option<PartitionToken>,
        correlation_id: Uuid,
    },
    Failed {
        partition: Option<PartitionToken>,
        error: String,
    },
}

impl PartitionOutcome {
    pub fn summary(&self) -> Option<&ImportSummary> {
        match self {
            Self::Completed { summary } => Some(summary),
            _ => None,
        }
    }

    fn partition(&self) -> Option<&PartitionToken> {
        match self {
            Self::Completed { summary } => summary.partition.as_ref(),
            Self::Enqueued { partition, .. } | Self::Failed { partition, .. } => partition.as_ref(),
        }
    }

    /// Why the partition did not fully succeed, `None` when it did or is still queued
    fn problem(&self, tolerate_partial: bool) -> Option<String> {
        let label = describe(self.partition());
        match self {
            Self::Completed { summary } => match summary.status {
                ImportStatus::Ok => None,
                ImportStatus::Partial if tolerate_partial => None,
                ImportStatus::Partial => Some(format!(
                    "partition {label}: {} of {} documents failed",
                    summary.failure_count(),
                    summary.docs_total
                )),
                ImportStatus::Failed => Some(format!(
                    "partition {label}: {}",
                    summary.error.as_deref().unwrap_or("failed")
                )),
            },
            Self::Enqueued { .. } => None,
            Self::Failed { error, .. } => Some(format!("partition {label}: {error}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleDeletion {
    pub partition: Option<PartitionToken>,
    pub filter: Option<String>,
    pub deleted: u64,
}

/// Everything one run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub collection: String,
    /// State observed before the run
    pub state: SchemaStatus,
    pub kind: RunKind,
    pub physical: String,
    pub run_started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyResult>,
    pub partitions: Vec<PartitionOutcome>,
    pub stale: Vec<StaleDeletion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeReport>,
}

impl RunReport {
    /// Every partition completed with no failed document
    pub fn is_complete_success(&self) -> bool {
        self.partitions
            .iter()
            .all(|p| p.summary().is_some_and(ImportSummary::is_ok))
    }

    pub fn docs_total(&self) -> usize {
        self.partitions
            .iter()
            .filter_map(PartitionOutcome::summary)
            .map(|s| s.docs_total)
            .sum()
    }

    pub fn problems(&self) -> Vec<String> {
        self.partitions
            .iter()
            .filter_map(|p| p.problem(false))
            .collect()
    }
}

/// Observed state of one logical collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub logical: String,
    pub status: SchemaStatus,
    pub alias_target: Option<String>,
    pub generations: Vec<Generation>,
    pub diff: SchemaDiff,
}

pub struct LifecycleOrchestrator {
    client: Arc<dyn SearchClient>,
    registry: Arc<CollectionRegistry>,
    config: Config,
    schema: SchemaManager,
    dispatcher: ExecutionDispatcher,
    events: Arc<dyn EventSink>,
    extra_edges: Vec<(String, String)>,
}

impl LifecycleOrchestrator {
    pub fn new(client: Arc<dyn SearchClient>, registry: Arc<CollectionRegistry>, config: Config) -> Self {
        let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
        let schema = SchemaManager::new(client.clone(), config.schema.retention, events.clone());
        Self {
            client,
            registry,
            config,
            schema,
            dispatcher: ExecutionDispatcher::default(),
            events,
            extra_edges: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.schema = SchemaManager::new(
            self.client.clone(),
            self.config.schema.retention,
            events.clone(),
        );
        self.events = events;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: ExecutionDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Cascade edges `(source, dependent)` not implied by any registered join
    pub fn with_extra_edges(mut self, edges: Vec<(String, String)>) -> Self {
        self.extra_edges = edges;
        self
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn compiled_schema(&self, definition: &CollectionDefinition) -> CollectionSchema {
        definition.compiled_schema(&self.config.indexer.timestamp_field)
    }

    fn definition(&self, logical: &str) -> Result<Arc<CollectionDefinition>> {
        self.registry
            .get(logical)
            .ok_or_else(|| Error::UnknownCollection(logical.to_string()))
    }

    pub async fn status(&self, logical: &str) -> Result<CollectionStatus> {
        let definition = self.definition(logical)?;
        let at = stage_error(logical, "status");
        let diff = self
            .schema
            .current_diff(&self.compiled_schema(&definition))
            .await
            .map_err(at)?;
        let alias_target = self.client.resolve_alias(logical).await.map_err(at)?;
        let generations = self.schema.generations(logical).await.map_err(at)?;
        Ok(CollectionStatus {
            logical: logical.to_string(),
            status: diff.status(),
            alias_target,
            generations,
            diff,
        })
    }

    pub async fn diff(&self, logical: &str) -> Result<SchemaDiff> {
        let definition = self.definition(logical)?;
        self.schema
            .current_diff(&self.compiled_schema(&definition))
            .await
            .map_err(stage_error(logical, "diff"))
    }

    /// Apply the compiled schema, populating every partition when a new
    /// generation is created. No stale deletion or cascade.
    pub async fn apply(&self, logical: &str) -> Result<ApplyResult> {
        let definition = self.definition(logical)?;
        let (compiled, indexer) = self.prepare(&definition, Utc::now().timestamp(), false)?;
        let max_parallel = self.max_parallel(&compiled);
        let indexer_ref = &indexer;
        let definition_ref = definition.as_ref();
        let (result, _) = self
            .schema
            .apply(&self.compiled_schema(&definition), move |physical| {
                self.populate(definition_ref, indexer_ref, physical, compiled.partitions, max_parallel)
            })
            .await
            .map_err(stage_error(logical, "apply"))?;
        Ok(result)
    }

    /// Run the lifecycle of one collection and cascade to its dependents
    pub async fn index_collection(&self, logical: &str, options: &IndexOptions) -> Result<RunReport> {
        self.run(logical, options, true).await
    }

    async fn run(&self, logical: &str, options: &IndexOptions, cascade: bool) -> Result<RunReport> {
        let definition = self.definition(logical)?;
        let run_started_at = Utc::now().timestamp();
        let dry_run = options.dry_run || self.config.indexer.dry_run;

        let diff = self
            .schema
            .current_diff(&self.compiled_schema(&definition))
            .await
            .map_err(stage_error(logical, "diff"))?;
        let state = diff.status();
        info!(collection = %logical, state = %state, "Starting lifecycle run");

        let (compiled, indexer) = self.prepare(&definition, run_started_at, dry_run)?;
        let max_parallel = self.max_parallel(&compiled);

        let selected: Vec<Option<PartitionToken>> = match &options.partition {
            Some(selector) => {
                if state != SchemaStatus::PresentInSync {
                    return Err(Error::at_stage(
                        logical,
                        "partial_guard",
                        Error::SchemaMissingOrDrifted {
                            collection: logical.to_string(),
                            state: state.to_string(),
                        },
                    ));
                }
                let token = compiled.select(selector).cloned().ok_or_else(|| {
                    Error::at_stage(
                        logical,
                        "partition",
                        Error::validation(format!(
                            "Collection '{logical}' has no partition '{selector}'"
                        )),
                    )
                })?;
                vec![Some(token)]
            }
            None => compiled.partitions.clone(),
        };
        let partial = options.partition.is_some();

        let mut report = if state == SchemaStatus::PresentInSync {
            self.emit_diff(logical, &diff);
            let physical = self.live_physical(logical).await?;
            let partitions = self
                .dispatch(&definition, &indexer, &physical, &selected, options.mode, max_parallel)
                .await;
            RunReport {
                collection: logical.to_string(),
                state,
                kind: if dry_run {
                    RunKind::DryRun
                } else if partial {
                    RunKind::Partial
                } else {
                    RunKind::Full
                },
                physical,
                run_started_at,
                apply: None,
                partitions,
                stale: Vec::new(),
                cascade: None,
            }
        } else if dry_run {
            self.emit_diff(logical, &diff);
            let physical = self
                .schema
                .next_physical(logical)
                .await
                .map_err(stage_error(logical, "plan"))?;
            let partitions = self
                .dispatch(&definition, &indexer, &physical, &selected, ExecutionMode::Sync, max_parallel)
                .await;
            RunReport {
                collection: logical.to_string(),
                state,
                kind: RunKind::DryRun,
                physical,
                run_started_at,
                apply: None,
                partitions,
                stale: Vec::new(),
                cascade: None,
            }
        } else {
            if options.mode == ExecutionMode::Async {
                info!(collection = %logical, "Populating a new generation inline; async mode ignored");
            }
            let indexer_ref = &indexer;
            let definition_ref = definition.as_ref();
            let to_populate = selected.clone();
            let (result, populated) = self
                .schema
                .apply(&self.compiled_schema(&definition), move |physical| {
                    self.populate(definition_ref, indexer_ref, physical, to_populate, max_parallel)
                })
                .await
                .map_err(stage_error(logical, "apply"))?;

            match populated {
                Some(partitions) => RunReport {
                    collection: logical.to_string(),
                    state,
                    kind: if state == SchemaStatus::Absent {
                        RunKind::Create
                    } else {
                        RunKind::Migrate
                    },
                    physical: result.new_physical.clone().unwrap_or_default(),
                    run_started_at,
                    apply: Some(result),
                    partitions,
                    stale: Vec::new(),
                    cascade: None,
                },
                // Someone else brought the schema in line since the diff
                None => {
                    let physical = self.live_physical(logical).await?;
                    let partitions = self
                        .dispatch(&definition, &indexer, &physical, &selected, options.mode, max_parallel)
                        .await;
                    RunReport {
                        collection: logical.to_string(),
                        state,
                        kind: RunKind::Full,
                        physical,
                        run_started_at,
                        apply: Some(result),
                        partitions,
                        stale: Vec::new(),
                        cascade: None,
                    }
                }
            }
        };

        if partial || dry_run {
            return Ok(report);
        }
        if !report.is_complete_success() {
            if options.mode == ExecutionMode::Async && report.problems().is_empty() {
                info!(collection = %logical, "Partitions queued; stale deletion and cascade skipped");
            } else {
                warn!(
                    collection = %logical,
                    "Run incomplete, stale deletion and cascade skipped: {}",
                    report.problems().join("; ")
                );
            }
            return Ok(report);
        }

        report.stale = self
            .delete_stale(&definition, &report.physical, &selected, run_started_at)
            .await?;

        if cascade && self.config.cascade.enabled {
            report.cascade = Some(self.cascade(logical, None).await?);
        }

        info!(
            collection = %logical,
            physical = %report.physical,
            docs = report.docs_total(),
            "Lifecycle run finished"
        );
        Ok(report)
    }

    fn prepare(
        &self,
        definition: &CollectionDefinition,
        run_started_at: i64,
        dry_run: bool,
    ) -> Result<(CompiledPartitions, PartitionIndexer)> {
        let at = stage_error(&definition.logical, "prepare");
        let compiled = partitioner::compile(definition.partitions.as_ref()).map_err(at)?;
        let indexer = PartitionIndexer::new(
            self.client.clone(),
            &self.config.indexer,
            &self.config.retry,
            run_started_at,
        )
        .map_err(at)?
        .with_dry_run(dry_run);
        Ok((compiled, indexer))
    }

    fn max_parallel(&self, compiled: &CompiledPartitions) -> usize {
        compiled
            .max_parallel
            .unwrap_or(self.config.indexer.max_parallel)
            .max(1)
    }

    async fn live_physical(&self, logical: &str) -> Result<String> {
        let at = stage_error(logical, "resolve_alias");
        self.client
            .resolve_alias(logical)
            .await
            .map_err(at)?
            .ok_or_else(|| {
                at(Error::SchemaMissingOrDrifted {
                    collection: logical.to_string(),
                    state: SchemaStatus::Absent.to_string(),
                })
            })
    }

    fn emit_diff(&self, logical: &str, diff: &SchemaDiff) {
        self.events.emit(&LifecycleEvent::SchemaDiffComputed {
            collection: logical.to_string(),
            status: diff.status(),
            diff: diff.clone(),
        });
    }

    /// Index the selected partitions into `physical` with bounded parallelism
    async fn dispatch(
        &self,
        definition: &CollectionDefinition,
        indexer: &PartitionIndexer,
        physical: &str,
        selected: &[Option<PartitionToken>],
        mode: ExecutionMode,
        max_parallel: usize,
    ) -> Vec<PartitionOutcome> {
        let jobs: Vec<_> = selected
            .iter()
            .map(|partition| {
                let metadata = JobMetadata::new(&definition.logical, partition.clone())
                    .with_label("physical", physical);
                let job = indexer.partition_job(
                    physical.to_string(),
                    definition.source.clone(),
                    partition.clone(),
                );
                (metadata, job)
            })
            .collect();

        let results = self.dispatcher.dispatch_all(jobs, mode, max_parallel).await;

        selected
            .iter()
            .cloned()
            .zip(results)
            .map(|(partition, result)| match result {
                Ok(DispatchHandle::Completed { summary }) => {
                    self.emit_summary(&definition.logical, physical, &summary);
                    PartitionOutcome::Completed { summary }
                }
                Ok(DispatchHandle::Enqueued { correlation_id }) => {
                    info!(
                        collection = %definition.logical,
                        partition = %describe(partition.as_ref()),
                        %correlation_id,
                        "Partition enqueued"
                    );
                    PartitionOutcome::Enqueued {
                        partition,
                        correlation_id,
                    }
                }
                Err(e) => PartitionOutcome::Failed {
                    partition,
                    error: truncate_message(&e.to_string(), MAX_REPORTED_MESSAGE_CHARS),
                },
            })
            .collect()
    }

    fn emit_summary(&self, logical: &str, physical: &str, summary: &ImportSummary) {
        for batch in &summary.per_batch {
            self.events.emit(&LifecycleEvent::BatchImported {
                collection: logical.to_string(),
                physical: physical.to_string(),
                partition: summary.partition.clone(),
                batch: batch.clone(),
            });
        }
        self.events.emit(&LifecycleEvent::PartitionIndexed {
            collection: logical.to_string(),
            physical: physical.to_string(),
            partition: summary.partition.clone(),
            status: summary.status,
            docs_total: summary.docs_total,
        });
    }

    /// Population step of a schema apply: every partition, inline
    async fn populate(
        &self,
        definition: &CollectionDefinition,
        indexer: &PartitionIndexer,
        physical: String,
        partitions: Vec<Option<PartitionToken>>,
        max_parallel: usize,
    ) -> Result<Vec<PartitionOutcome>> {
        let outcomes = self
            .dispatch(
                definition,
                indexer,
                &physical,
                &partitions,
                ExecutionMode::Sync,
                max_parallel,
            )
            .await;

        let tolerate_partial = self.config.indexer.allow_partial_population;
        let problems: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.problem(tolerate_partial))
            .collect();
        if !problems.is_empty() {
            return Err(Error::Population {
                message: format!(
                    "{} of {} partitions failed: {}",
                    problems.len(),
                    outcomes.len(),
                    problems.join("; ")
                ),
                physical,
            });
        }
        Ok(outcomes)
    }

    async fn delete_stale(
        &self,
        definition: &CollectionDefinition,
        physical: &str,
        partitions: &[Option<PartitionToken>],
        run_started_at: i64,
    ) -> Result<Vec<StaleDeletion>> {
        let logical = definition.logical.as_str();
        let context = StaleContext {
            scopes: &definition.scopes,
            timestamp_field: &self.config.indexer.timestamp_field,
            run_started_at,
            partition_field: definition.partition_field(),
        };

        let mut deletions = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let filter = stale::compile(&definition.stale_rules, partition.as_ref(), &context)
                .map_err(stage_error(logical, "stale_filter"))?;
            let deleted = match &filter {
                Some(filter) => stale::delete(self.client.as_ref(), physical, filter)
                    .await
                    .map_err(stage_error(logical, "stale_deletion"))?,
                None => 0,
            };
            self.events.emit(&LifecycleEvent::StaleDeletionRun {
                collection: logical.to_string(),
                physical: physical.to_string(),
                partition: partition.clone(),
                filter: filter.clone(),
                deleted,
            });
            deletions.push(StaleDeletion {
                partition: partition.clone(),
                filter,
                deleted,
            });
        }
        Ok(deletions)
    }

    /// Re-index everything downstream of `logical`; with `ids`, dependents
    /// that support it only re-import the documents joined to those ids
    pub async fn cascade(&self, logical: &str, ids: Option<Vec<String>>) -> Result<CascadeReport> {
        self.definition(logical)?;
        let graph = CascadeGraph::from_registry(&self.registry, &self.extra_edges);
        let report = graph.reindex_dependents(logical, ids.as_deref(), self).await;
        for outcome in &report.outcomes {
            self.events.emit(&LifecycleEvent::CascadeOutcome {
                source: logical.to_string(),
                outcome: outcome.clone(),
            });
        }
        Ok(report)
    }

    pub async fn rollback(&self, logical: &str) -> Result<RollbackResult> {
        self.definition(logical)?;
        self.schema
            .rollback(logical)
            .await
            .map_err(stage_error(logical, "rollback"))
    }

    /// Delete every physical generation of `logical`
    pub async fn drop_collection(&self, logical: &str, confirmed: bool) -> Result<Vec<String>> {
        self.definition(logical)?;
        if !confirmed {
            return Err(Error::ConfirmationRequired(format!(
                "dropping '{logical}' deletes every physical generation"
            )));
        }
        self.schema
            .drop_all(logical)
            .await
            .map_err(stage_error(logical, "drop"))
    }

    /// Drop followed by a full run
    pub async fn reindexate(
        &self,
        logical: &str,
        confirmed: bool,
        options: &IndexOptions,
    ) -> Result<RunReport> {
        if !confirmed {
            return Err(Error::ConfirmationRequired(format!(
                "reindexing '{logical}' drops every physical generation first"
            )));
        }
        self.drop_collection(logical, true).await?;
        let options = IndexOptions {
            partition: None,
            ..options.clone()
        };
        self.index_collection(logical, &options).await
    }

    /// Status of a partition queued by an async run
    pub fn job_status(&self, correlation_id: &Uuid) -> Option<JobStatus> {
        self.dispatcher.queue().status(correlation_id)
    }

    /// Wait for a queued partition to finish
    pub async fn wait_for_job(&self, correlation_id: &Uuid) -> Option<JobStatus> {
        self.dispatcher.queue().wait(correlation_id).await
    }
}

#[async_trait]
impl DependentReindexer for LifecycleOrchestrator {
    fn is_registered(&self, logical: &str) -> bool {
        self.registry.contains(logical)
    }

    fn supports_partial(&self, logical: &str) -> bool {
        self.registry
            .get(logical)
            .is_some_and(|definition| definition.source.supports_lookup())
    }

    async fn reindex_full(&self, logical: &str) -> Result<()> {
        let report = self.run(logical, &IndexOptions::default(), false).await?;
        if report.is_complete_success() {
            return Ok(());
        }
        Err(Error::Population {
            physical: report.physical.clone(),
            message: report.problems().join("; "),
        })
    }

    async fn reindex_partial(
        &self,
        logical: &str,
        local_key: &str,
        ids: &[String],
    ) -> Result<Vec<String>> {
        let definition = self.definition(logical)?;
        let state = self.schema.current_diff(&self.compiled_schema(&definition)).await?.status();
        if state != SchemaStatus::PresentInSync {
            return Err(Error::SchemaMissingOrDrifted {
                collection: logical.to_string(),
                state: state.to_string(),
            });
        }
        let physical = self.live_physical(logical).await?;

        let documents = definition.source.lookup(local_key, ids).await?;
        let identity_field = &self.config.indexer.identity_field;
        let identities: Vec<String> = documents
            .iter()
            .filter_map(|document| identity_of(document, identity_field))
            .collect();
        info!(
            collection = %logical,
            matched = documents.len(),
            "Re-importing joined documents"
        );

        let (_, indexer) = self.prepare(&definition, Utc::now().timestamp(), false)?;
        let summary = indexer.index_documents(&physical, None, documents).await;
        self.emit_summary(logical, &physical, &summary);

        let outcome = PartitionOutcome::Completed { summary };
        match outcome.problem(false) {
            Some(problem) => Err(Error::Population {
                physical,
                message: problem,
            }),
            None => Ok(identities),
        }
    }
}

/// Wraps errors of `stage` into a collection-level report
fn stage_error<'a>(logical: &'a str, stage: &'static str) -> impl Fn(Error) -> Error + Copy + 'a {
    move |e| Error::at_stage(logical, stage, e)
}
