use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::core::graph::NodeState;
use crate::core::ids::NodeId;

/// One finished node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Milliseconds since the Unix epoch at which the run started.
    pub timestamp: u64,
    pub node: NodeId,
    pub class: String,
    pub inputs: serde_json::Value,
    pub outputs: serde_json::Value,
    pub status: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl TraceEntry {
    pub fn succeeded(&self) -> bool {
        self.status == NodeState::Done.to_string()
    }
}

/// Sink for execution traces.
pub trait Telemetry: Send + Sync {
    fn record(&self, entry: TraceEntry);
    /// Called whenever [`Graph::wait_idle`](crate::Graph::wait_idle) returns.
    fn flush(&self);
}

/// In-memory collector.
#[derive(Default)]
pub struct MemoryTelemetry {
    traces: Mutex<Vec<TraceEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn traces_for(&self, node: NodeId) -> Vec<TraceEntry> {
        self.get_traces()
            .into_iter()
            .filter(|t| t.node == node)
            .collect()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record(&self, entry: TraceEntry) {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn flush(&self) {}
}

/// Forwards traces to the `log` facade at debug level.
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn record(&self, entry: TraceEntry) {
        log::debug!(
            "{} ({}) {} in {}ms",
            entry.class,
            entry.node,
            entry.status,
            entry.duration_ms
        );
    }

    fn flush(&self) {
        log::logger().flush();
    }
}
