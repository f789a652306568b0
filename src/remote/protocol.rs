// Stepwright: Automation backend wire protocol (executor:* event envelope)

use crate::bus::LogLevel;
use crate::variables::VariableStore;
use crate::workflow::{flatten_with_depth, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EV_RUN: &str = "executor:run";
pub const EV_STOP: &str = "executor:stop";
pub const EV_PAUSE: &str = "executor:pause";
pub const EV_RESUME: &str = "executor:resume";

pub const EV_STARTED: &str = "executor:started";
pub const EV_STEP: &str = "executor:step";
pub const EV_LOG: &str = "executor:log";
pub const EV_COMPLETED: &str = "executor:completed";
pub const EV_ERROR: &str = "executor:error";
pub const EV_STOPPED: &str = "executor:stopped";

/// Socket-style envelope used in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub label: String,
    pub properties: Map<String, Value>,
    pub params: Map<String, Value>,
    pub id: String,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVariable {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub var_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteWorkflow {
    pub id: String,
    pub name: String,
    pub actions: Vec<RemoteAction>,
    pub variables: Vec<RemoteVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommand {
    pub workflow_id: String,
    pub workflow: RemoteWorkflow,
}

impl RunCommand {
    /// Build the one-shot command for `workflow`. Actions are the flattened
    /// tree; the backend owns control-flow semantics and rebuilds nesting
    /// from `depth`. Params go out unresolved so the backend sees the same
    /// variable references the author wrote.
    pub fn build(workflow: &Workflow, variables: &VariableStore) -> Self {
        let actions = flatten_with_depth(&workflow.steps)
            .into_iter()
            .map(|(depth, step)| RemoteAction {
                action_type: step.action.clone(),
                label: step.display_label().to_string(),
                properties: step.params.clone(),
                params: step.params.clone(),
                id: step.id.clone(),
                depth,
            })
            .collect();

        let variables = variables
            .iter()
            .map(|v| RemoteVariable {
                name: v.name.clone(),
                value: v.value.clone(),
                var_type: v.var_type.as_str().to_string(),
            })
            .collect();

        Self {
            workflow_id: workflow.id.clone(),
            workflow: RemoteWorkflow {
                id: workflow.id.clone(),
                name: workflow.display_name().to_string(),
                actions,
                variables,
            },
        }
    }

    pub fn into_frame(self) -> Frame {
        Frame::new(EV_RUN, serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// `executor:stop` / `executor:pause` / `executor:resume` for a run.
pub fn control_frame(event: &str, execution_id: Option<&str>) -> Frame {
    Frame::new(event, serde_json::json!({ "executionId": execution_id }))
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Started {
        execution_id: Option<String>,
        total_steps: Option<usize>,
    },
    Step {
        execution_id: Option<String>,
        step: usize,
        total_steps: usize,
        action: String,
        label: String,
    },
    Log {
        execution_id: Option<String>,
        level: LogLevel,
        message: String,
    },
    Completed {
        execution_id: Option<String>,
        duration_ms: Option<u64>,
    },
    Error {
        execution_id: Option<String>,
        message: String,
    },
    Stopped {
        execution_id: Option<String>,
    },
}

impl BackendEvent {
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            BackendEvent::Started { execution_id, .. }
            | BackendEvent::Step { execution_id, .. }
            | BackendEvent::Log { execution_id, .. }
            | BackendEvent::Completed { execution_id, .. }
            | BackendEvent::Error { execution_id, .. }
            | BackendEvent::Stopped { execution_id } => execution_id.as_deref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackendEvent::Completed { .. } | BackendEvent::Error { .. } | BackendEvent::Stopped { .. }
        )
    }

    /// Decode an inbound frame. Events this client does not track yield
    /// `None`.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let data = &frame.data;
        let execution_id = str_field(data, "executionId");

        let event = match frame.event.as_str() {
            EV_STARTED => BackendEvent::Started {
                execution_id,
                total_steps: usize_field(data, "totalSteps"),
            },
            EV_STEP => {
                // `action` is `{type, label}` in current backends, a bare id in
                // older ones.
                let (action, label) = match data.get("action") {
                    Some(Value::Object(a)) => {
                        let ty = a.get("type").and_then(Value::as_str).unwrap_or_default();
                        let label = a.get("label").and_then(Value::as_str).unwrap_or(ty);
                        (ty.to_string(), label.to_string())
                    }
                    Some(Value::String(s)) => (s.clone(), s.clone()),
                    _ => (String::new(), String::new()),
                };
                BackendEvent::Step {
                    execution_id,
                    step: usize_field(data, "step").unwrap_or(0),
                    total_steps: usize_field(data, "totalSteps").unwrap_or(0),
                    action,
                    label,
                }
            }
            EV_LOG => {
                let log = data.get("log").unwrap_or(data);
                BackendEvent::Log {
                    execution_id,
                    level: LogLevel::parse(log.get("type").and_then(Value::as_str).unwrap_or("info")),
                    message: str_field(log, "message").unwrap_or_default(),
                }
            }
            EV_COMPLETED => BackendEvent::Completed {
                execution_id,
                duration_ms: data.get("duration").and_then(Value::as_u64),
            },
            EV_ERROR => BackendEvent::Error {
                execution_id,
                message: str_field(data, "message").unwrap_or_else(|| "unknown backend error".into()),
            },
            EV_STOPPED => BackendEvent::Stopped { execution_id },
            _ => return None,
        };
        Some(event)
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn usize_field(data: &Value, key: &str) -> Option<usize> {
    data.get(key).and_then(Value::as_u64).map(|n| n as usize)
}
