// Stepwright: Execution session state and run results

use crate::bus::{EventBus, ExecutionEvent, LogEntry, LogLevel};
use crate::workflow::Workflow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Stopped | SessionStatus::Completed | SessionStatus::Failed
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Transport actually used by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Remote,
    Local,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Remote => f.write_str("remote"),
            ExecutionMode::Local => f.write_str("local"),
        }
    }
}

/// Transport requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModePreference {
    /// Remote when the backend is reachable, otherwise local.
    #[default]
    Auto,
    Local,
    Remote,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: ModePreference,
    /// Step ids the local interpreter pauses in front of.
    pub breakpoints: HashSet<String>,
}

impl RunOptions {
    pub fn with_mode(mode: ModePreference) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_breakpoints(mut self, breakpoints: impl IntoIterator<Item = String>) -> Self {
        self.breakpoints = breakpoints.into_iter().collect();
        self
    }
}

/// One run of one workflow. The workflow is a snapshot taken at run start.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub id: String,
    pub workflow: Workflow,
    pub status: SessionStatus,
    pub current_step_index: Option<usize>,
    pub progress_percent: u8,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
}

impl ExecutionSession {
    pub fn new(workflow: Workflow, mode: ExecutionMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow,
            status: SessionStatus::Idle,
            current_step_index: None,
            progress_percent: 0,
            mode,
            started_at: Utc::now(),
        }
    }
}

/// Terminal notification, published once per run and appended to the
/// journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: SessionStatus,
    pub mode: ExecutionMode,
    pub progress_percent: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What `ExecutionController::run` hands back for a started run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub mode: ExecutionMode,
    pub progress_percent: u8,
    pub duration: Duration,
    pub error: Option<String>,
}

impl From<&RunSummary> for RunReport {
    fn from(summary: &RunSummary) -> Self {
        Self {
            session_id: summary.session_id.clone(),
            status: summary.status,
            mode: summary.mode,
            progress_percent: summary.progress_percent,
            duration: Duration::from_millis(summary.duration_ms),
            error: summary.error.clone(),
        }
    }
}

/// Integer percentage of `completed` over `total`, rounded to nearest.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let p = (completed.min(total) as f64 / total as f64 * 100.0).round();
    p as u8
}

// ---------------------------------------------------------------------------
// Run control (stop / pause signals)
// ---------------------------------------------------------------------------

/// Stop and pause flags for one run, shared by the controller and whichever
/// transport executes the run.
#[derive(Clone)]
pub struct RunControl {
    stop: Arc<watch::Sender<bool>>,
    pause: Arc<watch::Sender<bool>>,
}

impl RunControl {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (pause, _) = watch::channel(false);
        Self {
            stop: Arc::new(stop),
            pause: Arc::new(pause),
        }
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn subscribe_pause(&self) -> watch::Receiver<bool> {
        self.pause.subscribe()
    }

    /// Resolves once `stop()` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Wait while paused. Returns `false` if the run was stopped instead of
    /// resumed.
    pub async fn wait_while_paused(&self) -> bool {
        let mut stop = self.stop.subscribe();
        let mut pause = self.pause.subscribe();
        loop {
            if *stop.borrow_and_update() {
                return false;
            }
            if !*pause.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = stop.changed() => {}
                _ = pause.changed() => {}
            }
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Run reporter (session updates + bus events)
// ---------------------------------------------------------------------------

/// Shared slot holding the active session, if any.
pub type SessionSlot = Arc<RwLock<Option<ExecutionSession>>>;

/// Writes progress into the active session and mirrors it on the event bus.
/// Progress is monotonic: a value is only published when it exceeds the
/// last one.
#[derive(Clone)]
pub struct RunReporter {
    bus: EventBus,
    session: SessionSlot,
    best: Arc<AtomicU8>,
}

impl RunReporter {
    pub fn new(bus: EventBus, session: SessionSlot) -> Self {
        Self {
            bus,
            session,
            best: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Reporter with no session behind it.
    pub fn detached(bus: EventBus) -> Self {
        Self::new(bus, Arc::new(RwLock::new(None)))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn percent(&self) -> u8 {
        self.best.load(Ordering::SeqCst)
    }

    /// Publish the initial 0% for a run of `total` steps.
    pub fn begin(&self, total: usize) {
        self.best.store(0, Ordering::SeqCst);
        self.bus.publish(ExecutionEvent::Progress {
            percent: 0,
            completed: 0,
            total,
        });
    }

    pub async fn set_status(&self, status: SessionStatus) {
        let session_id = {
            let mut guard = self.session.write().await;
            match guard.as_mut() {
                Some(session) if session.status != status => {
                    session.status = status;
                    session.id.clone()
                }
                Some(_) => return,
                None => String::new(),
            }
        };
        self.bus.publish(ExecutionEvent::StatusChanged { session_id, status });
    }

    pub async fn step_started(&self, index: usize, total: usize, action: &str, label: &str) {
        if let Some(session) = self.session.write().await.as_mut() {
            session.current_step_index = Some(index);
        }
        self.bus.publish(ExecutionEvent::StepStarted {
            index,
            total,
            action: action.to_string(),
            label: label.to_string(),
        });
    }

    pub async fn progress(&self, completed: usize, total: usize) {
        let p = percent(completed, total);
        if self.best.fetch_max(p, Ordering::SeqCst) >= p {
            return;
        }
        if let Some(session) = self.session.write().await.as_mut() {
            session.progress_percent = p;
        }
        self.bus.publish(ExecutionEvent::Progress {
            percent: p,
            completed,
            total,
        });
    }

    pub fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Error => tracing::error!(step = ?entry.step, "{}", entry.message),
            LogLevel::Warning => tracing::warn!(step = ?entry.step, "{}", entry.message),
            _ => tracing::info!(step = ?entry.step, "{}", entry.message),
        }
        self.bus.publish(ExecutionEvent::Log(entry));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warning, message));
    }
}
