// Stepwright: Execution controller (validate, pick a transport, run, report)

pub mod session;

pub use session::{
    ExecutionMode, ExecutionSession, ModePreference, RunControl, RunOptions, RunReport,
    RunReporter, RunSummary, SessionSlot, SessionStatus,
};

use crate::bus::{EventBus, ExecutionEvent, LogEntry, LogLevel};
use crate::config::Config;
use crate::error::{EngineError, EngineResult, TransportError};
use crate::journal::RunJournal;
use crate::local::{HttpSystemService, LocalInterpreter, LocalOutcome, Prompter};
use crate::registry::{ActionDescriptor, ActionRegistry};
use crate::remote::{RemoteClient, RemoteOutcome, WsChannel};
use crate::validate::{validate_workflow, ValidationReport};
use crate::variables::{SharedVariables, VariableStore};
use crate::workflow::Workflow;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Handles of the run in progress.
#[derive(Clone)]
struct ActiveRun {
    control: RunControl,
    reporter: RunReporter,
    mode: ExecutionMode,
}

/// A reconciled workflow copy with its validation result and the custom
/// components it would create.
struct PreparedRun {
    workflow: Workflow,
    pending: Vec<ActionDescriptor>,
    report: ValidationReport,
}

/// Clears the busy flag on every exit path of `run`.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the session lifecycle: one run at a time, `Idle → Running →
/// {Completed, Failed, Stopped}` with `Running ⇄ Paused` in between.
pub struct ExecutionController {
    registry: ActionRegistry,
    bus: EventBus,
    remote: Option<RemoteClient>,
    interpreter: LocalInterpreter,
    variables: SharedVariables,
    session: SessionSlot,
    active: RwLock<Option<ActiveRun>>,
    busy: AtomicBool,
    journal: Option<RunJournal>,
    seed_system_variables: bool,
}

impl ExecutionController {
    pub fn new(registry: ActionRegistry, interpreter: LocalInterpreter) -> Self {
        Self {
            registry,
            bus: EventBus::new(),
            remote: None,
            interpreter,
            variables: VariableStore::new().shared(),
            session: Arc::new(RwLock::new(None)),
            active: RwLock::new(None),
            busy: AtomicBool::new(false),
            journal: None,
            seed_system_variables: true,
        }
    }

    /// Wire a controller from configuration: file-backed registry, HTTP
    /// system service, WebSocket backend channel and run journal.
    pub async fn from_config(config: &Config, prompter: Arc<dyn Prompter>) -> anyhow::Result<Self> {
        let registry = ActionRegistry::open(&config.registry_path()?).await?;
        let system = Arc::new(HttpSystemService::new(
            &config.system_service.url,
            config.system_service.request_timeout(),
        )?);
        let interpreter = LocalInterpreter::with_defaults(
            system,
            prompter,
            config.interpreter.ack_timeout(),
            config.interpreter.unimplemented_latency(),
        )
        .await;

        let mut controller = Self::new(registry, interpreter)
            .with_system_variables(config.interpreter.seed_system_variables);

        if config.backend.enabled {
            let channel = Arc::new(WsChannel::new(&config.backend.url));
            controller = controller.with_remote(
                RemoteClient::new(channel)
                    .with_timeouts(config.backend.connect_wait(), config.backend.run_timeout()),
            );
        }
        if config.journal.enabled {
            controller = controller.with_journal(RunJournal::new(config.journal_path()?));
        }

        Ok(controller)
    }

    pub fn with_remote(mut self, remote: RemoteClient) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_variables(mut self, variables: SharedVariables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_system_variables(mut self, enabled: bool) -> Self {
        self.seed_system_variables = enabled;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn variables(&self) -> SharedVariables {
        self.variables.clone()
    }

    pub fn journal(&self) -> Option<&RunJournal> {
        self.journal.as_ref()
    }

    /// Snapshot of the active session, if a run is in progress.
    pub async fn session(&self) -> Option<ExecutionSession> {
        self.session.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Request cancellation of the active run. Returns `false` when idle.
    pub async fn stop(&self) -> bool {
        match self.active.read().await.as_ref() {
            Some(run) => {
                tracing::info!("Stop requested");
                run.control.stop();
                true
            }
            None => false,
        }
    }

    pub async fn pause(&self) -> bool {
        let Some(run) = self.active.read().await.clone() else {
            return false;
        };
        run.control.pause();
        // The local interpreter reports Paused itself once it reaches the
        // next step boundary.
        if run.mode == ExecutionMode::Remote {
            run.reporter.set_status(SessionStatus::Paused).await;
        }
        true
    }

    pub async fn resume(&self) -> bool {
        let Some(run) = self.active.read().await.clone() else {
            return false;
        };
        run.control.resume();
        if run.mode == ExecutionMode::Remote {
            run.reporter.set_status(SessionStatus::Running).await;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check `workflow` against the catalog without starting anything.
    /// Neither the shared store nor the registry is touched.
    pub async fn check(&self, workflow: &Workflow) -> ValidationReport {
        self.prepare(workflow).await.report
    }

    /// Reconcile and validate a copy of `workflow` against a copy of the
    /// store. Nothing is committed here.
    async fn prepare(&self, workflow: &Workflow) -> PreparedRun {
        let mut snapshot = workflow.clone();
        let pending = self.registry.plan_custom_components(&mut snapshot.steps).await;

        let mut catalog = self.registry.snapshot().await;
        for descriptor in &pending {
            catalog.insert(descriptor.action.clone(), descriptor.clone());
        }

        let mut store = self.variables.read().await.clone();
        self.merge_variables(&mut store, &snapshot);
        let report = validate_workflow(&snapshot.steps, &catalog, &store);

        PreparedRun {
            workflow: snapshot,
            pending,
            report,
        }
    }

    /// System variables first, so values declared by the workflow win.
    fn merge_variables(&self, store: &mut VariableStore, workflow: &Workflow) {
        if self.seed_system_variables {
            store.seed_system_variables(workflow.display_name());
        }
        for var in &workflow.variables {
            if store.contains(&var.name) {
                store.assign(&var.name, var.value.clone());
            } else {
                store.define(var.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    async fn select_mode(&self, preference: ModePreference) -> EngineResult<ExecutionMode> {
        match (preference, &self.remote) {
            (ModePreference::Local, _) => Ok(ExecutionMode::Local),
            (ModePreference::Remote, None) => Err(TransportError::NotConnected.into()),
            (ModePreference::Remote, Some(remote)) => {
                if remote.ensure_ready().await {
                    Ok(ExecutionMode::Remote)
                } else {
                    Err(TransportError::NotConnected.into())
                }
            }
            (ModePreference::Auto, None) => Ok(ExecutionMode::Local),
            (ModePreference::Auto, Some(remote)) => {
                if remote.ensure_ready().await {
                    Ok(ExecutionMode::Remote)
                } else {
                    tracing::info!("Automation backend unavailable, running locally");
                    Ok(ExecutionMode::Local)
                }
            }
        }
    }

    /// Run `workflow` to a terminal state.
    ///
    /// Errors are returned only for runs that never started (another run
    /// active, validation failures, a required backend that is down). A
    /// started run always yields a [`RunReport`], failed or not, and exactly
    /// one [`ExecutionEvent::Summary`] on the bus.
    pub async fn run(&self, workflow: &Workflow, options: RunOptions) -> EngineResult<RunReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning(workflow.display_name().to_string()));
        }
        let _busy = BusyGuard(&self.busy);

        let PreparedRun {
            workflow: snapshot,
            pending,
            report,
        } = self.prepare(workflow).await;
        if !report.is_empty() {
            tracing::warn!(workflow = %snapshot.id, errors = report.field_error_count(), "Workflow failed validation");
            return Err(EngineError::Validation(report));
        }

        let mode = self.select_mode(options.mode).await?;

        let created = self.registry.register_custom(pending).await?;
        for descriptor in &created {
            self.bus.log(
                LogLevel::Info,
                format!("Created custom component '{}' ({})", descriptor.label, descriptor.action),
            );
        }
        {
            let mut store = self.variables.write().await;
            self.merge_variables(&mut store, &snapshot);
        }

        let total = snapshot.step_count();

        let session = ExecutionSession::new(snapshot.clone(), mode);
        let session_id = session.id.clone();
        *self.session.write().await = Some(session);

        let control = RunControl::new();
        let reporter = RunReporter::new(self.bus.clone(), self.session.clone());
        *self.active.write().await = Some(ActiveRun {
            control: control.clone(),
            reporter: reporter.clone(),
            mode,
        });

        tracing::info!(session = %session_id, workflow = %snapshot.id, mode = %mode, steps = total, "Run started");
        let started_at = Utc::now();
        let clock = Instant::now();

        reporter.set_status(SessionStatus::Running).await;
        reporter.begin(total);
        reporter.info(format!(
            "Running '{}' ({} steps, {} mode)",
            snapshot.display_name(),
            total,
            mode
        ));

        let (status, error, backend_duration) = match mode {
            ExecutionMode::Remote => self.run_remote(&snapshot, &reporter, &control, &options).await,
            ExecutionMode::Local => {
                let result = self
                    .interpreter
                    .run(&snapshot.steps, &self.variables, &reporter, &control, &options.breakpoints)
                    .await;
                match result {
                    Ok(LocalOutcome::Completed) => (SessionStatus::Completed, None, None),
                    Ok(LocalOutcome::Stopped) | Err(EngineError::Stopped) => {
                        (SessionStatus::Stopped, None, None)
                    }
                    Err(e) => (SessionStatus::Failed, Some(e.to_string()), None),
                }
            }
        };

        reporter.set_status(status).await;
        let duration_ms = backend_duration.unwrap_or_else(|| clock.elapsed().as_millis() as u64);
        let summary = RunSummary {
            session_id: session_id.clone(),
            workflow_id: snapshot.id.clone(),
            workflow_name: snapshot.display_name().to_string(),
            status,
            mode,
            progress_percent: reporter.percent(),
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            error,
        };

        match (&summary.status, &summary.error) {
            (SessionStatus::Failed, Some(e)) => {
                tracing::error!(session = %session_id, error = %e, "Run failed")
            }
            _ => {
                tracing::info!(session = %session_id, status = %summary.status, duration_ms, "Run finished")
            }
        }
        self.bus.publish(ExecutionEvent::Summary(summary.clone()));

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&summary).await {
                tracing::warn!(path = %journal.path().display(), error = %e, "Failed to append run journal");
            }
        }

        *self.active.write().await = None;
        *self.session.write().await = None;

        Ok(RunReport::from(&summary))
    }

    async fn run_remote(
        &self,
        workflow: &Workflow,
        reporter: &RunReporter,
        control: &RunControl,
        options: &RunOptions,
    ) -> (SessionStatus, Option<String>, Option<u64>) {
        let Some(remote) = &self.remote else {
            return (
                SessionStatus::Failed,
                Some(TransportError::NotConnected.to_string()),
                None,
            );
        };
        if !options.breakpoints.is_empty() {
            reporter.warn("Breakpoints are not applied to remote runs");
        }

        let store = self.variables.read().await.clone();
        match remote.run(workflow, &store, reporter, control).await {
            Ok(RemoteOutcome::Completed { duration_ms }) => {
                (SessionStatus::Completed, None, duration_ms)
            }
            Ok(RemoteOutcome::Stopped) | Err(EngineError::Stopped) => {
                (SessionStatus::Stopped, None, None)
            }
            Err(e) => {
                reporter.log(LogEntry::new(LogLevel::Error, e.to_string()));
                (SessionStatus::Failed, Some(e.to_string()), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::HandlerRegistry;
    use crate::local::handlers::AssignHandler;
    use crate::workflow::{Variable, WorkflowStep};
    use serde_json::json;
    use std::time::Duration;

    async fn controller() -> ExecutionController {
        crate::logger::init_test();
        let handlers = HandlerRegistry::new();
        handlers.register(Arc::new(AssignHandler)).await;
        let interpreter = LocalInterpreter::new(handlers, Duration::from_millis(1));
        ExecutionController::new(ActionRegistry::in_memory(), interpreter).with_system_variables(false)
    }

    #[tokio::test]
    async fn test_validation_blocks_start() {
        let ctl = controller().await;
        let mut rx = ctl.bus().subscribe();
        let wf = Workflow::new("wf", "Bad", vec![WorkflowStep::new("1", "navigate")]);

        let err = ctl.run(&wf, RunOptions::default()).await.unwrap_err();
        let EngineError::Validation(report) = err else {
            panic!("expected validation error");
        };
        assert_eq!(report.steps[0].step_index, 0);
        assert_eq!(report.steps[0].errors[0].field, "url");
        assert!(ctl.session().await.is_none());
        assert!(!ctl.is_running());

        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, ExecutionEvent::StatusChanged { .. } | ExecutionEvent::Summary(_)));
        }
    }

    #[tokio::test]
    async fn test_failed_validation_commits_nothing() {
        let ctl = controller().await.with_system_variables(true);
        let mut wf = Workflow::new(
            "wf",
            "Bad",
            vec![
                WorkflowStep::new("1", "Sincronizar Catálogo"),
                WorkflowStep::new("2", "navigate").with_param("url", json!("not a url")),
            ],
        );
        wf.variables.push(Variable::new("declared", json!("v")));

        let err = ctl.run(&wf, RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(ctl.variables().read().await.is_empty());
        assert!(!ctl.registry().action_exists("custom_sincronizar_catalogo").await);
    }

    #[tokio::test]
    async fn test_declared_variable_overrides_system_value() {
        let ctl = controller().await.with_system_variables(true);
        let mut wf = Workflow::new("wf", "Declared", vec![]);
        wf.variables.push(Variable::new("WorkflowName", json!("alias")));

        ctl.run(&wf, RunOptions::default()).await.unwrap();
        let store = ctl.variables();
        let store = store.read().await;
        assert_eq!(store.value("WorkflowName"), Some(&json!("alias")));
        assert!(store.contains("CurrentDate"));
    }

    #[tokio::test]
    async fn test_auto_without_backend_runs_locally() {
        let ctl = controller().await;
        let mut wf = Workflow::new(
            "wf",
            "Assign",
            vec![WorkflowStep::new("1", "assign")
                .with_param("variableName", json!("total"))
                .with_param("value", json!("${start}"))],
        );
        wf.variables.push(Variable::new("start", json!(7)));

        let report = ctl.run(&wf, RunOptions::default()).await.unwrap();
        assert_eq!(report.mode, ExecutionMode::Local);
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.progress_percent, 100);
        assert_eq!(ctl.variables().read().await.value("total"), Some(&json!(7)));
        assert!(ctl.session().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_required_without_backend() {
        let ctl = controller().await;
        let wf = Workflow::new("wf", "Empty", vec![]);
        let err = ctl
            .run(&wf, RunOptions::with_mode(ModePreference::Remote))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_unknown_action_becomes_custom_component() {
        let ctl = controller().await;
        let wf = Workflow::new(
            "wf",
            "Custom",
            vec![WorkflowStep::new("1", "Sincronizar Catálogo")],
        );

        let report = ctl.run(&wf, RunOptions::default()).await.unwrap();
        assert_eq!(report.status, SessionStatus::Completed);
        assert!(ctl.registry().action_exists("custom_sincronizar_catalogo").await);
        // The caller's tree is left as written.
        assert_eq!(wf.steps[0].action, "Sincronizar Catálogo");
    }

    #[tokio::test]
    async fn test_control_when_idle() {
        let ctl = controller().await;
        assert!(!ctl.stop().await);
        assert!(!ctl.pause().await);
        assert!(!ctl.resume().await);
    }

    #[tokio::test]
    async fn test_check_leaves_store_untouched() {
        let ctl = controller().await;
        let mut wf = Workflow::new(
            "wf",
            "Check",
            vec![WorkflowStep::new("1", "navigate").with_param("url", json!("${site}"))],
        );
        wf.variables.push(Variable::new("site", json!("https://example.com")));

        assert!(ctl.check(&wf).await.is_empty());
        assert!(ctl.variables().read().await.is_empty());
    }
}
