// Stepwright: Built-in local action handlers

use super::prompt::Prompter;
use super::system::{SystemOperation, SystemService};
use super::{invalid, ActionHandler, HandlerRegistry, StepContext};
use crate::bus::LogLevel;
use crate::error::{EngineError, EngineResult};
use crate::variables::value_to_string;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Params that override a handler's default output variable.
const OUTPUT_KEYS: &[&str] = &["variable", "saveAs", "outputVariable"];

/// Register every built-in handler family on `registry`.
pub async fn register_defaults(
    registry: &HandlerRegistry,
    system: Arc<dyn SystemService>,
    prompter: Arc<dyn Prompter>,
    ack_timeout: Duration,
) {
    registry.register(Arc::new(AssignHandler)).await;
    registry.register(Arc::new(LogHandler)).await;
    registry.register(Arc::new(DelayHandler)).await;
    registry
        .register(Arc::new(MessageBoxHandler::new(prompter.clone(), ack_timeout)))
        .await;

    for spec in SYSTEM_ACTIONS {
        registry
            .register(Arc::new(SystemHandler::new(
                spec,
                system.clone(),
                prompter.clone(),
            )))
            .await;
    }
}

// ---------------------------------------------------------------------------
// Variable assignment
// ---------------------------------------------------------------------------

pub struct AssignHandler;

#[async_trait]
impl ActionHandler for AssignHandler {
    fn actions(&self) -> &[&'static str] {
        &["assign", "set_variable", "assign_variable"]
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> EngineResult<()> {
        let name = ctx
            .str_param(&["variableName", "name", "variable"])
            .ok_or_else(|| invalid(ctx, "missing variable name"))?;
        let value = ctx.params.get("value").cloned().unwrap_or(Value::Null);

        ctx.log(LogLevel::Info, format!("{} = {}", name, value_to_string(&value)));
        ctx.variables.write().await.assign(&name, value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

pub struct LogHandler;

impl LogHandler {
    fn level(action: &str, ctx: &StepContext<'_>) -> LogLevel {
        match action {
            "log_warning" => LogLevel::Warning,
            "log_error" => LogLevel::Error,
            "log_info" => LogLevel::Info,
            _ => ctx
                .str_param(&["level", "type"])
                .map(|l| LogLevel::parse(&l))
                .unwrap_or(LogLevel::Info),
        }
    }
}

#[async_trait]
impl ActionHandler for LogHandler {
    fn actions(&self) -> &[&'static str] {
        &["log", "log_message", "log_info", "log_warning", "log_error"]
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> EngineResult<()> {
        let message = ctx
            .params
            .get("message")
            .map(value_to_string)
            .unwrap_or_default();
        ctx.log(Self::level(&ctx.step.action, ctx), message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

pub struct DelayHandler;

#[async_trait]
impl ActionHandler for DelayHandler {
    fn actions(&self) -> &[&'static str] {
        &["wait", "delay", "wait_seconds", "pause"]
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> EngineResult<()> {
        let seconds = ctx.f64_param(&["seconds", "time"]).unwrap_or(1.0);
        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|_| invalid(ctx, format!("invalid wait of {} seconds", seconds)))?;

        ctx.log(LogLevel::Info, format!("Waiting {} s", seconds));
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = ctx.control.stopped() => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Acknowledgement dialogs
// ---------------------------------------------------------------------------

pub struct MessageBoxHandler {
    prompter: Arc<dyn Prompter>,
    timeout: Duration,
}

impl MessageBoxHandler {
    pub fn new(prompter: Arc<dyn Prompter>, timeout: Duration) -> Self {
        Self { prompter, timeout }
    }
}

#[async_trait]
impl ActionHandler for MessageBoxHandler {
    fn actions(&self) -> &[&'static str] {
        &["message_box", "show_message", "alert"]
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> EngineResult<()> {
        let title = ctx
            .str_param(&["title"])
            .unwrap_or_else(|| ctx.step.display_label().to_string());
        let message = ctx
            .params
            .get("message")
            .map(value_to_string)
            .unwrap_or_default();

        ctx.log(LogLevel::Info, format!("{}: {}", title, message));
        if tokio::time::timeout(self.timeout, self.prompter.acknowledge(&title, &message))
            .await
            .is_err()
        {
            ctx.log(
                LogLevel::Warning,
                format!("No acknowledgement after {:?}; continuing", self.timeout),
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// System-service actions
// ---------------------------------------------------------------------------

/// One family of system-service-backed actions.
pub struct SystemAction {
    pub actions: &'static [&'static str],
    pub operation: SystemOperation,
    /// Variable written with the result unless the step overrides it.
    pub output: Option<&'static str>,
    /// Whether a transport failure may fall back to manual entry.
    pub degradable: bool,
    pub prompt: &'static str,
}

pub const SYSTEM_ACTIONS: &[SystemAction] = &[
    SystemAction {
        actions: &["select_folder"],
        operation: SystemOperation::SelectFolder,
        output: Some("carpeta"),
        degradable: true,
        prompt: "Folder path",
    },
    SystemAction {
        actions: &["select_file"],
        operation: SystemOperation::SelectFile,
        output: Some("archivo"),
        degradable: true,
        prompt: "File path",
    },
    SystemAction {
        actions: &["list_files"],
        operation: SystemOperation::ListFiles,
        output: Some("archivos"),
        degradable: true,
        prompt: "File names (comma separated)",
    },
    SystemAction {
        actions: &["count_files"],
        operation: SystemOperation::CountFiles,
        output: Some("conteo"),
        degradable: true,
        prompt: "Number of files",
    },
    SystemAction {
        actions: &["file_read", "read_file"],
        operation: SystemOperation::ReadFile,
        output: Some("contenido"),
        degradable: true,
        prompt: "File content",
    },
    SystemAction {
        actions: &["run_powershell", "powershell_run", "run_shell"],
        operation: SystemOperation::PowerShell,
        output: Some("salida"),
        degradable: false,
        prompt: "",
    },
    SystemAction {
        actions: &["cmd_run"],
        operation: SystemOperation::Cmd,
        output: Some("salida"),
        degradable: false,
        prompt: "",
    },
    SystemAction {
        actions: &["file_write", "write_file"],
        operation: SystemOperation::WriteFile,
        output: None,
        degradable: false,
        prompt: "",
    },
    SystemAction {
        actions: &["file_copy", "copy_file"],
        operation: SystemOperation::CopyFile,
        output: None,
        degradable: false,
        prompt: "",
    },
    SystemAction {
        actions: &["file_delete", "delete_file"],
        operation: SystemOperation::DeleteFile,
        output: None,
        degradable: false,
        prompt: "",
    },
];

pub struct SystemHandler {
    spec: &'static SystemAction,
    service: Arc<dyn SystemService>,
    prompter: Arc<dyn Prompter>,
}

impl SystemHandler {
    pub fn new(
        spec: &'static SystemAction,
        service: Arc<dyn SystemService>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self {
            spec,
            service,
            prompter,
        }
    }

    fn output_variable(&self, ctx: &StepContext<'_>) -> Option<String> {
        ctx.str_param(OUTPUT_KEYS)
            .or_else(|| self.spec.output.map(str::to_string))
    }

    /// Interpret a manually typed value the way the service would have
    /// returned it.
    fn parse_manual(&self, input: &str) -> Value {
        match self.spec.operation {
            SystemOperation::CountFiles => input
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(input)),
            SystemOperation::ListFiles => Value::Array(
                input
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(Value::from)
                    .collect(),
            ),
            _ => Value::from(input),
        }
    }
}

#[async_trait]
impl ActionHandler for SystemHandler {
    fn actions(&self) -> &[&'static str] {
        self.spec.actions
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> EngineResult<()> {
        let action = ctx.step.action.as_str();
        let value = match self.service.call(self.spec.operation, ctx.params.clone()).await {
            Ok(response) => response.result(self.spec.operation),
            Err(e) if e.is_transport() && self.spec.degradable => {
                tracing::warn!(action = %action, error = %e, "System service unreachable, asking for manual entry");
                ctx.log(
                    LogLevel::Warning,
                    format!("System service unavailable ({}); manual entry", e),
                );
                let prompt = format!("{} for '{}'", self.spec.prompt, ctx.step.display_label());
                match self.prompter.manual_entry(&prompt).await {
                    Some(input) => self.parse_manual(&input),
                    None => return Err(EngineError::system(action, e)),
                }
            }
            Err(e) => return Err(EngineError::system(action, e)),
        };

        if let Some(name) = self.output_variable(ctx) {
            ctx.log(LogLevel::Success, format!("{} = {}", name, value_to_string(&value)));
            ctx.variables.write().await.assign(&name, value);
        } else {
            ctx.log(LogLevel::Success, format!("{} done", action));
        }
        Ok(())
    }
}
