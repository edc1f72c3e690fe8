//! Structured messages for a worker process that mirrors graph activity to a
//! front end. Transport is up to the caller.

use serde::{Deserialize, Serialize};

use crate::core::signal::{Event, Listener, SignalManager, WILDCARD, listener};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "progress")]
    Progress {
        message: String,
        status: String,
        /// Fraction done, within `0.0..=1.0`.
        progress: f64,
        blocking: bool,
    },
    #[serde(rename = "workerevent")]
    WorkerEvent {
        event: String,
        data: serde_json::Value,
    },
}

impl WorkerMessage {
    pub fn progress(
        message: impl Into<String>,
        status: impl Into<String>,
        progress: f64,
        blocking: bool,
    ) -> Self {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        WorkerMessage::Progress {
            message: message.into(),
            status: status.into(),
            progress,
            blocking,
        }
    }

    /// Wraps an event; `data` holds its arguments and `src`.
    pub fn from_event(event: &Event) -> Self {
        WorkerMessage::WorkerEvent {
            event: event.name.clone(),
            data: event.args_json(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Forwards every event of `events` to `sink` as a [`WorkerMessage`].
///
/// Returns the registered listener so it can be removed with
/// [`SignalManager::off`] and [`WILDCARD`].
pub fn forward_events<F>(events: &SignalManager, sink: F) -> Listener
where
    F: Fn(WorkerMessage) + Send + Sync + 'static,
{
    let forward = listener(move |event: &Event| sink(WorkerMessage::from_event(event)));
    events.on(WILDCARD, forward.clone());
    forward
}
