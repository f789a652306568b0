// Stepwright: Remote execution client (one command out, event stream back)

use super::protocol::{control_frame, BackendEvent, RunCommand, EV_PAUSE, EV_RESUME, EV_STOP};
use super::{BackendChannel, Frame, EV_DISCONNECT};
use crate::bus::LogEntry;
use crate::engine::session::{RunControl, RunReporter};
use crate::error::{EngineError, EngineResult, TransportError};
use crate::variables::VariableStore;
use crate::workflow::Workflow;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::sync::broadcast::error::RecvError;

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CONNECT_WAIT: Duration = Duration::from_millis(1500);

/// Abandoned execution ids remembered so their late events are dropped.
const RETIRED_CAPACITY: usize = 32;

/// How a remote run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    Completed { duration_ms: Option<u64> },
    Stopped,
}

/// Subscription to backend events for a single run. Dropping it detaches
/// the listener from the channel.
struct RunListener {
    rx: broadcast::Receiver<Frame>,
}

impl Drop for RunListener {
    fn drop(&mut self) {
        tracing::debug!("Detached remote run listener");
    }
}

pub struct RemoteClient {
    channel: Arc<dyn BackendChannel>,
    connect_wait: Duration,
    run_timeout: Duration,
    retired: Mutex<VecDeque<String>>,
}

impl RemoteClient {
    pub fn new(channel: Arc<dyn BackendChannel>) -> Self {
        Self {
            channel,
            connect_wait: DEFAULT_CONNECT_WAIT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            retired: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_timeouts(mut self, connect_wait: Duration, run_timeout: Duration) -> Self {
        self.connect_wait = connect_wait;
        self.run_timeout = run_timeout;
        self
    }

    pub fn channel(&self) -> &Arc<dyn BackendChannel> {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Make sure the channel is usable: when disconnected, make one connect
    /// attempt bounded by the connect wait.
    pub async fn ensure_ready(&self) -> bool {
        if self.channel.is_connected() {
            return true;
        }
        match tokio::time::timeout(self.connect_wait, self.channel.connect()).await {
            Ok(Ok(())) => self.channel.is_connected(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Automation backend unavailable");
                false
            }
            Err(_) => {
                tracing::warn!(wait = ?self.connect_wait, "Automation backend did not connect in time");
                false
            }
        }
    }

    /// Send `workflow` to the backend and follow its events until exactly
    /// one terminal event, a stop request, the run timeout, or connection
    /// loss. The listener is always detached before returning.
    ///
    /// Events that arrive before this run's `started`, and any event from a
    /// run this client abandoned, are ignored.
    pub async fn run(
        &self,
        workflow: &Workflow,
        variables: &VariableStore,
        reporter: &RunReporter,
        control: &RunControl,
    ) -> EngineResult<RemoteOutcome> {
        let mut listener = RunListener {
            rx: self.channel.subscribe(),
        };

        let command = RunCommand::build(workflow, variables);
        let mut total = command.workflow.actions.len();
        self.channel.send(command.into_frame()).await?;
        tracing::info!(workflow = %workflow.id, steps = total, "Workflow sent to automation backend");

        let deadline = tokio::time::sleep(self.run_timeout);
        tokio::pin!(deadline);
        let mut pause_rx = control.subscribe_pause();
        let mut started = false;
        let mut execution_id: Option<String> = None;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::error!(workflow = %workflow.id, timeout = ?self.run_timeout, "No terminal event from automation backend");
                    self.retire(execution_id).await;
                    return Err(TransportError::Timeout(self.run_timeout).into());
                }
                _ = control.stopped() => {
                    self.send_control(EV_STOP, execution_id.as_deref()).await;
                    self.retire(execution_id).await;
                    return Ok(RemoteOutcome::Stopped);
                }
                Ok(()) = pause_rx.changed() => {
                    let event = if *pause_rx.borrow_and_update() { EV_PAUSE } else { EV_RESUME };
                    self.send_control(event, execution_id.as_deref()).await;
                }
                received = listener.rx.recv() => {
                    let frame = match received {
                        Ok(frame) => frame,
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "Remote run listener lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => return Err(TransportError::ConnectionLost.into()),
                    };
                    if frame.event == EV_DISCONNECT {
                        return Err(TransportError::ConnectionLost.into());
                    }
                    let Some(event) = BackendEvent::from_frame(&frame) else {
                        continue;
                    };
                    if let Some(theirs) = event.execution_id() {
                        if self.is_retired(theirs).await {
                            tracing::debug!(execution = %theirs, "Ignoring event from an abandoned run");
                            continue;
                        }
                    }
                    if let (Some(ours), Some(theirs)) = (execution_id.as_deref(), event.execution_id()) {
                        if ours != theirs {
                            tracing::debug!(execution = %theirs, "Ignoring event from another run");
                            continue;
                        }
                    }
                    if !started && !matches!(event, BackendEvent::Started { .. }) {
                        tracing::debug!(event = %frame.event, "Ignoring event received before start");
                        continue;
                    }

                    match event {
                        BackendEvent::Started { execution_id: id, total_steps } => {
                            if started {
                                continue;
                            }
                            started = true;
                            execution_id = id;
                            if let Some(n) = total_steps {
                                total = n;
                            }
                            reporter.info(format!("Backend started '{}'", workflow.display_name()));
                        }
                        BackendEvent::Step { step, total_steps, action, label, .. } => {
                            if total_steps > 0 {
                                total = total_steps;
                            }
                            let index = step.saturating_sub(1);
                            reporter.step_started(index, total, &action, &label).await;
                            reporter.progress(index, total).await;
                        }
                        BackendEvent::Log { level, message, .. } => {
                            reporter.log(LogEntry::new(level, message));
                        }
                        BackendEvent::Completed { duration_ms, .. } => {
                            reporter.progress(total, total).await;
                            return Ok(RemoteOutcome::Completed { duration_ms });
                        }
                        BackendEvent::Error { message, .. } => {
                            return Err(EngineError::BackendExecution(message));
                        }
                        BackendEvent::Stopped { .. } => return Ok(RemoteOutcome::Stopped),
                    }
                }
            }
        }
    }

    async fn retire(&self, execution_id: Option<String>) {
        let Some(id) = execution_id else {
            return;
        };
        let mut retired = self.retired.lock().await;
        if retired.len() == RETIRED_CAPACITY {
            retired.pop_front();
        }
        retired.push_back(id);
    }

    async fn is_retired(&self, execution_id: &str) -> bool {
        self.retired.lock().await.iter().any(|id| id == execution_id)
    }

    async fn send_control(&self, event: &str, execution_id: Option<&str>) {
        if let Err(e) = self.channel.send(control_frame(event, execution_id)).await {
            tracing::warn!(event = %event, error = %e, "Failed to forward control event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, ExecutionEvent};
    use crate::remote::protocol::{EV_COMPLETED, EV_ERROR, EV_LOG, EV_STARTED, EV_STEP, EV_STOPPED};
    use crate::workflow::WorkflowStep;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Channel that replays a fixed event script after the run command.
    struct ScriptedChannel {
        connected: AtomicBool,
        events: broadcast::Sender<Frame>,
        /// One script per run command; the last one repeats.
        scripts: Mutex<VecDeque<Vec<Frame>>>,
        sent: Mutex<Vec<Frame>>,
    }

    impl ScriptedChannel {
        fn new(script: Vec<Frame>) -> Arc<Self> {
            Self::sequence(vec![script])
        }

        fn sequence(scripts: Vec<Vec<Frame>>) -> Arc<Self> {
            let (events, _) = broadcast::channel(64);
            Arc::new(Self {
                connected: AtomicBool::new(true),
                events,
                scripts: Mutex::new(scripts.into()),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BackendChannel for ScriptedChannel {
        async fn connect(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            let is_run = frame.event == "executor:run";
            self.sent.lock().await.push(frame);
            if is_run {
                let script = {
                    let mut scripts = self.scripts.lock().await;
                    if scripts.len() > 1 {
                        scripts.pop_front().unwrap_or_default()
                    } else {
                        scripts.front().cloned().unwrap_or_default()
                    }
                };
                for f in script {
                    let _ = self.events.send(f);
                }
            }
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<Frame> {
            self.events.subscribe()
        }

        fn listener_count(&self) -> usize {
            self.events.receiver_count()
        }
    }

    fn two_step_workflow() -> Workflow {
        Workflow::new(
            "wf",
            "Demo",
            vec![
                WorkflowStep::new("1", "navigate").with_param("url", json!("https://example.com")),
                WorkflowStep::new("2", "click").with_param("selector", json!("#ok")),
            ],
        )
    }

    fn frame(event: &str, data: serde_json::Value) -> Frame {
        Frame::new(event, data)
    }

    #[tokio::test]
    async fn test_completed_run_reports_progress() {
        let channel = ScriptedChannel::new(vec![
            frame(EV_STARTED, json!({"executionId": "exec_1", "totalSteps": 2})),
            frame(EV_STEP, json!({"executionId": "exec_1", "step": 1, "totalSteps": 2, "action": {"type": "navigate"}})),
            frame(EV_LOG, json!({"executionId": "exec_1", "log": {"type": "info", "message": "abriendo"}})),
            frame(EV_STEP, json!({"executionId": "exec_1", "step": 2, "totalSteps": 2, "action": {"type": "click"}})),
            frame(EV_COMPLETED, json!({"executionId": "exec_1", "duration": 1200})),
        ]);
        let client = RemoteClient::new(channel.clone());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let reporter = RunReporter::detached(bus);
        reporter.begin(2);

        let outcome = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap();

        assert_eq!(outcome, RemoteOutcome::Completed { duration_ms: Some(1200) });
        assert_eq!(channel.listener_count(), 0);

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::Progress { percent, .. } = event {
                progress.push(percent);
            }
        }
        assert_eq!(progress, vec![0, 50, 100]);
    }

    #[tokio::test]
    async fn test_backend_error_is_terminal() {
        let channel = ScriptedChannel::new(vec![
            frame(EV_STARTED, json!({"executionId": "exec_2"})),
            frame(EV_ERROR, json!({"executionId": "exec_2", "message": "selector not found"})),
            frame(EV_COMPLETED, json!({"executionId": "exec_2"})),
        ]);
        let client = RemoteClient::new(channel.clone());
        let reporter = RunReporter::detached(EventBus::new());

        let err = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::BackendExecution(ref m) if m == "selector not found"));
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_ignores_other_execution_ids() {
        let channel = ScriptedChannel::new(vec![
            frame(EV_STARTED, json!({"executionId": "mine"})),
            frame(EV_ERROR, json!({"executionId": "theirs", "message": "not ours"})),
            frame(EV_COMPLETED, json!({"executionId": "mine", "duration": 5})),
        ]);
        let client = RemoteClient::new(channel);
        let reporter = RunReporter::detached(EventBus::new());

        let outcome = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemoteOutcome::Completed { duration_ms: Some(5) });
    }

    #[tokio::test]
    async fn test_events_before_start_are_ignored() {
        let channel = ScriptedChannel::new(vec![
            frame(EV_STOPPED, json!({"executionId": "exec_old"})),
            frame(EV_COMPLETED, json!({})),
            frame(EV_STARTED, json!({"executionId": "exec_new", "totalSteps": 2})),
            frame(EV_STEP, json!({"executionId": "exec_new", "step": 1, "totalSteps": 2, "action": {"type": "navigate"}})),
            frame(EV_COMPLETED, json!({"executionId": "exec_new", "duration": 40})),
        ]);
        let client = RemoteClient::new(channel);
        let reporter = RunReporter::detached(EventBus::new());

        let outcome = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemoteOutcome::Completed { duration_ms: Some(40) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_cannot_end_the_next_one() {
        let channel = ScriptedChannel::sequence(vec![
            vec![frame(EV_STARTED, json!({"executionId": "exec_a"}))],
            vec![
                frame(EV_STARTED, json!({"executionId": "exec_a"})),
                frame(EV_STOPPED, json!({"executionId": "exec_a"})),
                frame(EV_STARTED, json!({"executionId": "exec_b"})),
                frame(EV_COMPLETED, json!({"executionId": "exec_b", "duration": 7})),
            ],
        ]);
        let client = RemoteClient::new(channel)
            .with_timeouts(DEFAULT_CONNECT_WAIT, Duration::from_secs(5));
        let reporter = RunReporter::detached(EventBus::new());

        let err = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::Timeout(_))));

        let outcome = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemoteOutcome::Completed { duration_ms: Some(7) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_terminal_event() {
        let channel = ScriptedChannel::new(vec![frame(EV_STARTED, json!({"executionId": "slow"}))]);
        let client = RemoteClient::new(channel.clone());
        let reporter = RunReporter::detached(EventBus::new());

        let err = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Transport(TransportError::Timeout(d)) if d == DEFAULT_RUN_TIMEOUT));
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_sends_stop_event() {
        let channel = ScriptedChannel::new(vec![frame(EV_STARTED, json!({"executionId": "exec_9"}))]);
        let client = RemoteClient::new(channel.clone());
        let reporter = RunReporter::detached(EventBus::new());
        let control = RunControl::new();

        let stopper = {
            let control = control.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                control.stop();
            })
        };

        let outcome = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &control)
            .await
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(outcome, RemoteOutcome::Stopped);
        assert_eq!(channel.listener_count(), 0);
        let sent = channel.sent.lock().await;
        assert_eq!(sent.last().unwrap().event, "executor:stop");
    }

    #[tokio::test]
    async fn test_disconnect_is_connection_lost() {
        let channel = ScriptedChannel::new(vec![frame(EV_DISCONNECT, serde_json::Value::Null)]);
        let client = RemoteClient::new(channel);
        let reporter = RunReporter::detached(EventBus::new());

        let err = client
            .run(&two_step_workflow(), &VariableStore::new(), &reporter, &RunControl::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::ConnectionLost)));
    }
}
