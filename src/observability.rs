//! Structured event port
//!
//! Components report notable pipeline events through an injected `Observer`
//! instead of a process-wide logger, so tests can capture them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::info;

/// One structured pipeline event
#[derive(Debug, Clone, Serialize)]
pub struct ObservedEvent {
    pub component: &'static str,
    pub name: &'static str,
    pub fields: Value,
    pub at: DateTime<Utc>,
}

impl ObservedEvent {
    pub fn new(component: &'static str, name: &'static str, fields: Value) -> Self {
        Self {
            component,
            name,
            fields,
            at: Utc::now(),
        }
    }
}

/// Sink for structured pipeline events
pub trait Observer: Send + Sync {
    fn record(&self, event: ObservedEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn record(&self, event: ObservedEvent) {
        info!(
            component = event.component,
            event = event.name,
            fields = %event.fields,
            "pipeline event"
        );
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Event names in the order they were recorded
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name == name).count()
    }
}

impl Observer for RecordingObserver {
    fn record(&self, event: ObservedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Default observer used by the binaries
pub fn tracing_observer() -> Arc<dyn Observer> {
    Arc::new(TracingObserver)
}
