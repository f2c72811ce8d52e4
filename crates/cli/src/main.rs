//! searchkeeper CLI - search collection lifecycle management
//!
//! This binary provides the command-line interface over the lifecycle engine.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use searchkeeper::manifest::{Manifest, DEFAULT_MANIFEST};
use searchkeeper::output;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use searchkeeper_core::config::Config;
use searchkeeper_indexer::{ExecutionMode, JobStatus};
use searchkeeper_lifecycle::{IndexOptions, LifecycleOrchestrator, PartitionOutcome};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "searchkeeper")]
#[command(about = "Blue-green lifecycle management for search collections")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Collections manifest
    #[arg(short, long, value_name = "FILE", global = true, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show schema state, alias target and generations
    Status {
        /// Collection to inspect; all collections when omitted
        collection: Option<String>,
    },
    /// Show how the compiled schema differs from the live one
    Diff { collection: String },
    /// Create or migrate the physical generation when the schema changed
    Apply { collection: String },
    /// Run the lifecycle of a collection
    Index {
        collection: String,
        /// Index a single partition (requires an in-sync schema)
        #[arg(long)]
        partition: Option<String>,
        /// Queue partitions instead of running them inline
        #[arg(long = "async")]
        run_async: bool,
        /// Encode batches without sending anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Point the alias back at the previous generation
    Rollback { collection: String },
    /// Re-index the collections that join against a collection
    Cascade {
        collection: String,
        /// Changed source identities; dependents that can are re-indexed partially
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Delete every physical generation of a collection (requires confirmation)
    Drop {
        collection: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Drop and fully rebuild a collection (requires confirmation)
    Reindex {
        collection: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    let orchestrator = build_orchestrator(cli.config.as_deref(), &cli.manifest)?;
    let json = cli.json;

    match cli.command {
        Commands::Status { collection } => {
            let names = match collection {
                Some(name) => vec![name],
                None => orchestrator.registry().names(),
            };
            let mut statuses = Vec::with_capacity(names.len());
            for name in &names {
                statuses.push(orchestrator.status(name).await?);
            }
            if json {
                println!("{}", output::to_json(&statuses)?);
            } else {
                for status in &statuses {
                    print!("{}", output::render_status(status));
                }
            }
            Ok(())
        }
        Commands::Diff { collection } => {
            let diff = orchestrator.diff(&collection).await?;
            emit(json, &diff, || output::render_diff(&collection, &diff))
        }
        Commands::Apply { collection } => {
            let result = orchestrator.apply(&collection).await?;
            emit(json, &result, || output::render_apply(&result))
        }
        Commands::Index {
            collection,
            partition,
            run_async,
            dry_run,
        } => {
            let options = IndexOptions {
                partition,
                mode: if run_async {
                    ExecutionMode::Async
                } else {
                    ExecutionMode::Sync
                },
                dry_run,
            };
            let report = orchestrator.index_collection(&collection, &options).await?;
            emit(json, &report, || output::render_run(&report))?;
            if run_async {
                wait_for_queued(&orchestrator, &report.partitions, json).await?;
            }
            Ok(())
        }
        Commands::Rollback { collection } => {
            let result = orchestrator.rollback(&collection).await?;
            emit(json, &result, || output::render_rollback(&result))
        }
        Commands::Cascade { collection, ids } => {
            let ids = (!ids.is_empty()).then_some(ids);
            let report = orchestrator.cascade(&collection, ids).await?;
            emit(json, &report, || output::render_cascade(&report))
        }
        Commands::Drop { collection, yes } => {
            if !confirm(yes, &format!("Delete every generation of '{collection}'?"))? {
                println!("Operation cancelled.");
                return Ok(());
            }
            let dropped = orchestrator.drop_collection(&collection, true).await?;
            emit(json, &dropped, || {
                format!("{collection}: dropped {}\n", dropped.join(", "))
            })
        }
        Commands::Reindex { collection, yes } => {
            if !confirm(
                yes,
                &format!("Drop and rebuild '{collection}'? The collection is unavailable until the rebuild finishes."),
            )? {
                println!("Operation cancelled.");
                return Ok(());
            }
            let report = orchestrator
                .reindexate(&collection, true, &IndexOptions::default())
                .await?;
            emit(json, &report, || output::render_run(&report))
        }
    }
}

/// Initialize logging system
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={level},searchkeeper_core={level},searchkeeper_storage={level},\
             searchkeeper_indexer={level},searchkeeper_lifecycle={level}",
            env!("CARGO_PKG_NAME")
        ))
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn build_orchestrator(config_path: Option<&Path>, manifest_path: &Path) -> Result<LifecycleOrchestrator> {
    let config = Config::load(config_path)?;
    config.validate()?;
    debug!(?config, "Loaded configuration");

    let manifest = Manifest::from_file(manifest_path)?;
    let registry = manifest
        .registry(config.indexer.documents_per_batch)
        .context("Failed to build collection registry")?;
    info!(
        "Loaded {} collection(s) from {}",
        registry.len(),
        manifest_path.display()
    );

    let client = searchkeeper_storage::create_search_client(&config.service)
        .context("Failed to create search client")?;

    Ok(
        LifecycleOrchestrator::new(client, Arc::new(registry), config)
            .with_extra_edges(manifest.extra_edges()),
    )
}

/// Print `value` as JSON or as the rendered text
fn emit<T: Serialize>(json: bool, value: &T, render: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", output::to_json(value)?);
    } else {
        print!("{}", render());
    }
    Ok(())
}

fn confirm(skip_prompt: bool, prompt: &str) -> Result<bool> {
    if skip_prompt {
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| anyhow!("Failed to read confirmation: {e}"))
}

/// Queued partitions run inside this process, so wait for them before exiting
async fn wait_for_queued(
    orchestrator: &LifecycleOrchestrator,
    partitions: &[PartitionOutcome],
    json: bool,
) -> Result<()> {
    let mut failed = 0;
    for partition in partitions {
        let PartitionOutcome::Enqueued { correlation_id, .. } = partition else {
            continue;
        };
        let status = orchestrator.wait_for_job(correlation_id).await;
        match &status {
            Some(JobStatus::Succeeded(summary)) if summary.is_ok() => {}
            Some(JobStatus::Succeeded(_)) | Some(JobStatus::Failed(_)) => failed += 1,
            other => warn!(%correlation_id, "Job finished in unexpected state: {other:?}"),
        }
        if json {
            println!("{}", output::to_json(&status)?);
        } else {
            println!("job {correlation_id}: {status:?}");
        }
    }
    if failed > 0 {
        return Err(anyhow!("{failed} queued partition(s) did not complete cleanly"));
    }
    Ok(())
}
