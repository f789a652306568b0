// Stepwright: Local fallback interpreter

pub mod handlers;
pub mod prompt;
pub mod system;

pub use prompt::{ConsolePrompter, NonInteractivePrompter, Prompter};
pub use system::{HttpSystemService, SystemOperation, SystemResponse, SystemService};

use crate::bus::{LogEntry, LogLevel};
use crate::engine::session::{RunControl, RunReporter, SessionStatus};
use crate::error::{EngineError, EngineResult};
use crate::variables::{resolve_step_params, SharedVariables};
use crate::workflow::{flatten, WorkflowStep};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// Everything a handler sees while executing one step.
pub struct StepContext<'a> {
    pub step: &'a WorkflowStep,
    /// Flattened index of the step.
    pub index: usize,
    /// Params resolved against the variable store for this attempt.
    pub params: Map<String, Value>,
    pub variables: &'a SharedVariables,
    pub reporter: &'a RunReporter,
    pub control: &'a RunControl,
}

impl StepContext<'_> {
    /// First non-empty string among `keys`.
    pub fn str_param(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| match self.params.get(*k) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
    }

    /// First numeric (or numeric string) param among `keys`.
    pub fn f64_param(&self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|k| match self.params.get(*k) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.reporter.log(LogEntry::new(level, message).at_step(self.index));
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Action ids served by this handler.
    fn actions(&self) -> &[&'static str];

    async fn execute(&self, ctx: &StepContext<'_>) -> EngineResult<()>;
}

// ---------------------------------------------------------------------------
// Handler registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ActionHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, handler: Arc<dyn ActionHandler>) {
        let mut handlers = self.handlers.write().await;
        for id in handler.actions() {
            handlers.insert(id.to_string(), handler.clone());
        }
    }

    pub async fn get(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().await.get(action).cloned()
    }

    pub async fn contains(&self, action: &str) -> bool {
        self.handlers.read().await.contains_key(action)
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LocalOutcome {
    Completed,
    Stopped,
}

fn continue_on_error(step: &WorkflowStep) -> bool {
    match step.params.get("continueOnError") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Walks the step tree in-process. Containers only group their children:
/// branches and loops are not evaluated here.
pub struct LocalInterpreter {
    handlers: HandlerRegistry,
    unimplemented_latency: Duration,
}

impl LocalInterpreter {
    pub fn new(handlers: HandlerRegistry, unimplemented_latency: Duration) -> Self {
        Self {
            handlers,
            unimplemented_latency: unimplemented_latency.min(Duration::from_secs(2)),
        }
    }

    /// Interpreter with every built-in handler family registered.
    pub async fn with_defaults(
        system: Arc<dyn SystemService>,
        prompter: Arc<dyn Prompter>,
        ack_timeout: Duration,
        unimplemented_latency: Duration,
    ) -> Self {
        let handlers = HandlerRegistry::new();
        handlers::register_defaults(&handlers, system, prompter, ack_timeout).await;
        Self::new(handlers, unimplemented_latency)
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Execute `steps` in flattened order. Stop and pause requests are
    /// honoured between steps; a step whose id is in `breakpoints` pauses
    /// the run before it executes.
    pub async fn run(
        &self,
        steps: &[WorkflowStep],
        variables: &SharedVariables,
        reporter: &RunReporter,
        control: &RunControl,
        breakpoints: &HashSet<String>,
    ) -> EngineResult<LocalOutcome> {
        let ordered = flatten(steps);
        let total = ordered.len();

        for (index, step) in ordered.into_iter().enumerate() {
            if control.is_stopped() {
                return Ok(LocalOutcome::Stopped);
            }

            if breakpoints.contains(&step.id) {
                reporter.log(
                    LogEntry::new(LogLevel::Info, format!("Breakpoint at '{}'", step.display_label()))
                        .at_step(index),
                );
                control.pause();
            }
            if control.is_paused() {
                reporter.set_status(SessionStatus::Paused).await;
                if !control.wait_while_paused().await {
                    return Ok(LocalOutcome::Stopped);
                }
                reporter.set_status(SessionStatus::Running).await;
            }

            reporter
                .step_started(index, total, &step.action, step.display_label())
                .await;

            if step.is_container {
                tracing::debug!(step = %step.id, children = step.children.len(), "Entering container");
                reporter.progress(index + 1, total).await;
                continue;
            }

            let params = {
                let store = variables.read().await;
                resolve_step_params(&step.params, &store)
            };
            let ctx = StepContext {
                step,
                index,
                params,
                variables,
                reporter,
                control,
            };

            match self.execute_step(&ctx).await {
                Ok(()) => {}
                Err(e) if continue_on_error(step) => {
                    reporter.log(
                        LogEntry::new(LogLevel::Error, format!("{} (continuing)", e)).at_step(index),
                    );
                }
                Err(e) => {
                    reporter.log(LogEntry::new(LogLevel::Error, e.to_string()).at_step(index));
                    return Err(e);
                }
            }

            reporter.progress(index + 1, total).await;
        }

        Ok(LocalOutcome::Completed)
    }

    async fn execute_step(&self, ctx: &StepContext<'_>) -> EngineResult<()> {
        let action = ctx.step.action.as_str();
        let Some(handler) = self.handlers.get(action).await else {
            return self.unimplemented(ctx).await;
        };

        tracing::info!(action = %action, step = %ctx.step.id, "Executing step locally");
        let start = std::time::Instant::now();
        let result = handler.execute(ctx).await;
        let duration = start.elapsed();

        match &result {
            Ok(()) => tracing::info!(action = %action, duration_ms = %duration.as_millis(), "Step completed"),
            Err(e) => tracing::error!(action = %action, duration_ms = %duration.as_millis(), error = %e, "Step failed"),
        }
        result
    }

    async fn unimplemented(&self, ctx: &StepContext<'_>) -> EngineResult<()> {
        ctx.log(
            LogLevel::Warning,
            format!(
                "Action '{}' has no local implementation; simulated",
                ctx.step.action
            ),
        );
        tokio::select! {
            _ = tokio::time::sleep(self.unimplemented_latency) => {}
            _ = ctx.control.stopped() => {}
        }
        Ok(())
    }
}

/// Shorthand used by handlers for missing/invalid params.
pub(crate) fn invalid(ctx: &StepContext<'_>, message: impl Into<String>) -> EngineError {
    EngineError::invalid_params(ctx.step.action.clone(), message)
}
