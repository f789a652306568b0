// Stepwright: Event bus (broadcast channel from the engine to observers)

use crate::engine::session::{RunSummary, SessionStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    /// Parse a backend log type; unknown values read as `Info`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "success" => LogLevel::Success,
            "warning" | "warn" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Flattened index of the step that produced the line, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            step: None,
        }
    }

    pub fn at_step(mut self, index: usize) -> Self {
        self.step = Some(index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    StatusChanged {
        session_id: String,
        status: SessionStatus,
    },
    Progress {
        percent: u8,
        completed: usize,
        total: usize,
    },
    StepStarted {
        index: usize,
        total: usize,
        action: String,
        label: String,
    },
    Log(LogEntry),
    Summary(RunSummary),
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// Fan-out of execution events. Publishing never blocks; observers that lag
/// behind lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // No subscribers is fine; the engine runs headless too.
        if self.tx.send(event).is_err() {
            tracing::trace!("Execution event dropped: no subscribers");
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.publish(ExecutionEvent::Log(LogEntry::new(level, message)));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
