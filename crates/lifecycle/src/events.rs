//! Named lifecycle events
//!
//! Every stage of a run reports through an [`EventSink`]. The default sink logs
//! through `tracing`; [`RecordingEventSink`] keeps events in memory.

use crate::cascade::CascadeOutcome;
use searchkeeper_core::{PartitionToken, SchemaDiff, SchemaStatus};
use searchkeeper_indexer::{BatchSummary, ImportStatus};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SchemaDiffComputed {
        collection: String,
        status: SchemaStatus,
        diff: SchemaDiff,
    },
    PhysicalCreated {
        collection: String,
        physical: String,
    },
    BatchImported {
        collection: String,
        physical: String,
        partition: Option<PartitionToken>,
        batch: BatchSummary,
    },
    PartitionIndexed {
        collection: String,
        physical: String,
        partition: Option<PartitionToken>,
        status: ImportStatus,
        docs_total: usize,
    },
    AliasSwapped {
        collection: String,
        from: Option<String>,
        to: String,
    },
    GenerationDropped {
        collection: String,
        physical: String,
    },
    StaleDeletionRun {
        collection: String,
        physical: String,
        partition: Option<PartitionToken>,
        filter: Option<String>,
        deleted: u64,
    },
    CascadeOutcome {
        source: String,
        outcome: CascadeOutcome,
    },
}

impl LifecycleEvent {
    /// Stable event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::SchemaDiffComputed { .. } => "schema_diff_computed",
            Self::PhysicalCreated { .. } => "physical_created",
            Self::BatchImported { .. } => "batch_imported",
            Self::PartitionIndexed { .. } => "partition_indexed",
            Self::AliasSwapped { .. } => "alias_swapped",
            Self::GenerationDropped { .. } => "generation_dropped",
            Self::StaleDeletionRun { .. } => "stale_deletion_run",
            Self::CascadeOutcome { .. } => "cascade_outcome",
        }
    }

    /// Logical collection the event concerns
    pub fn collection(&self) -> &str {
        match self {
            Self::SchemaDiffComputed { collection, .. }
            | Self::PhysicalCreated { collection, .. }
            | Self::BatchImported { collection, .. }
            | Self::PartitionIndexed { collection, .. }
            | Self::AliasSwapped { collection, .. }
            | Self::GenerationDropped { collection, .. }
            | Self::StaleDeletionRun { collection, .. } => collection,
            Self::CascadeOutcome { source, .. } => source,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Logs each event with its name and JSON payload
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(
                event = event.name(),
                collection = event.collection(),
                payload = %payload,
                "Lifecycle event"
            ),
            Err(e) => warn!(event = event.name(), "Failed to serialize lifecycle event: {e}"),
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of the events recorded so far, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(LifecycleEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        sink.emit(&LifecycleEvent::PhysicalCreated {
            collection: "products".into(),
            physical: "products_v1".into(),
        });
        sink.emit(&LifecycleEvent::AliasSwapped {
            collection: "products".into(),
            from: None,
            to: "products_v1".into(),
        });

        assert_eq!(sink.names(), vec!["physical_created", "alias_swapped"]);
        assert_eq!(sink.events()[1].collection(), "products");
    }

    #[test]
    fn test_events_serialize_with_name_tag() {
        let event = LifecycleEvent::GenerationDropped {
            collection: "products".into(),
            physical: "products_v1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "generation_dropped");
        assert_eq!(json["physical"], "products_v1");
    }
}
