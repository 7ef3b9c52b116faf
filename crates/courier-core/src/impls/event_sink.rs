use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::domain::QueueEvent;
use crate::ports::EventSink;

/// Renders queue events as `debug` records (JSON in the `json` field).
///
/// The queue itself logs drops at `warn` and persist failures at `error`;
/// this sink only adds the structured event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &QueueEvent) {
        match serde_json::to_string(event) {
            Ok(json) => debug!(event = event.name(), %json, "queue event"),
            Err(_) => debug!(event = event.name(), detail = ?event, "queue event"),
        }
    }
}

/// Collects events in memory (tests, telemetry tallies).
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<QueueEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(QueueEvent::name)
            .collect()
    }

    pub fn drops(&self) -> Vec<QueueEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.is_drop())
            .cloned()
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &QueueEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
