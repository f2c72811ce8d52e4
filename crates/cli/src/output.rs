//! Text rendering of run results
//!
//! Every renderer returns a `String` so the binary decides where it goes and
//! tests can assert on it. `--json` output bypasses these and serializes the
//! result values directly.

use anyhow::Result;
use searchkeeper_core::partition::describe;
use searchkeeper_core::{OptionChange, SchemaDiff};
use searchkeeper_lifecycle::{
    ApplyResult, CascadeReport, CollectionStatus, PartitionOutcome, RollbackResult, RunReport,
};
use serde::Serialize;
use std::fmt::Write;

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn render_status(status: &CollectionStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}: {}", status.logical, status.status);
    let _ = writeln!(
        out,
        "  alias -> {}",
        status.alias_target.as_deref().unwrap_or("<none>")
    );
    if status.generations.is_empty() {
        let _ = writeln!(out, "  generations: none");
    } else {
        let names: Vec<&str> = status
            .generations
            .iter()
            .map(|g| g.physical.as_str())
            .collect();
        let _ = writeln!(out, "  generations: {}", names.join(", "));
    }
    out
}

pub fn render_diff(logical: &str, diff: &SchemaDiff) -> String {
    let mut out = String::new();
    if diff.is_missing() {
        let _ = writeln!(out, "{logical}: live collection missing");
        return out;
    }
    if diff.is_empty() {
        let _ = writeln!(out, "{logical}: in sync");
        return out;
    }

    let _ = writeln!(out, "{logical}: drift");
    for field in &diff.added_fields {
        let _ = writeln!(out, "  + {field}");
    }
    for field in &diff.removed_fields {
        let _ = writeln!(out, "  - {field}");
    }
    for (field, changes) in &diff.changed_fields {
        for change in changes {
            let _ = writeln!(
                out,
                "  ~ {field}.{}: {} -> {}",
                change.attribute, change.from, change.to
            );
        }
    }
    for (option, change) in &diff.collection_options {
        match change {
            OptionChange::Missing => {
                let _ = writeln!(out, "  ~ option {option}: missing");
            }
            OptionChange::Changed { from, to } => {
                let _ = writeln!(out, "  ~ option {option}: {from} -> {to}");
            }
        }
    }
    out
}

pub fn render_apply(result: &ApplyResult) -> String {
    let mut out = String::new();
    if !result.created {
        let _ = writeln!(out, "{}: schema in sync, nothing applied", result.logical);
        return out;
    }
    let _ = writeln!(
        out,
        "{}: {} -> {}",
        result.logical,
        result.previous_physical.as_deref().unwrap_or("<none>"),
        result.new_physical.as_deref().unwrap_or("<none>")
    );
    for dropped in &result.dropped_physicals {
        let _ = writeln!(out, "  dropped {dropped}");
    }
    out
}

pub fn render_rollback(result: &RollbackResult) -> String {
    format!(
        "{}: {} -> {}\n",
        result.logical,
        result.previous_target.as_deref().unwrap_or("<none>"),
        result.new_target
    )
}

pub fn render_run(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}, {:?}) into {}",
        report.collection, report.state, report.kind, report.physical
    );
    for partition in &report.partitions {
        match partition {
            PartitionOutcome::Completed { summary } => {
                let _ = write!(
                    out,
                    "  partition {}: {} docs={} batches={} ok={} failed={} {}ms",
                    describe(summary.partition.as_ref()),
                    summary.status,
                    summary.docs_total,
                    summary.batches_total,
                    summary.success_count(),
                    summary.failure_count(),
                    summary.duration_ms_total
                );
                if let Some(error) = &summary.error {
                    let _ = write!(out, " ({error})");
                }
                out.push('\n');
            }
            PartitionOutcome::Enqueued {
                partition,
                correlation_id,
            } => {
                let _ = writeln!(
                    out,
                    "  partition {}: queued as {correlation_id}",
                    describe(partition.as_ref())
                );
            }
            PartitionOutcome::Failed { partition, error } => {
                let _ = writeln!(
                    out,
                    "  partition {}: dispatch failed ({error})",
                    describe(partition.as_ref())
                );
            }
        }
    }
    for deletion in &report.stale {
        match &deletion.filter {
            Some(filter) => {
                let _ = writeln!(
                    out,
                    "  stale {}: deleted {} ({filter})",
                    describe(deletion.partition.as_ref()),
                    deletion.deleted
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "  stale {}: no rules",
                    describe(deletion.partition.as_ref())
                );
            }
        }
    }
    if let Some(cascade) = &report.cascade {
        out.push_str(&render_cascade(cascade));
    }
    out
}

pub fn render_cascade(report: &CascadeReport) -> String {
    let mut out = String::new();
    if report.outcomes.is_empty() {
        let _ = writeln!(out, "  cascade from {}: no dependents", report.source);
        return out;
    }
    for outcome in &report.outcomes {
        let _ = write!(
            out,
            "  cascade {} -> {}: {}",
            outcome.via, outcome.collection, outcome.mode
        );
        if let Some(error) = &outcome.error {
            let _ = write!(out, " (error: {error})");
        }
        out.push('\n');
    }
    out
}
