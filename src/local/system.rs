// Stepwright: System-service collaborator (file, process and shell operations)

use crate::error::SystemServiceError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Operations exposed by the local system service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemOperation {
    SelectFolder,
    SelectFile,
    PowerShell,
    Cmd,
    ListFiles,
    CountFiles,
    ReadFile,
    WriteFile,
    CopyFile,
    DeleteFile,
}

impl SystemOperation {
    /// Path segment under `/api/system/`.
    pub fn endpoint(self) -> &'static str {
        match self {
            SystemOperation::SelectFolder => "select-folder",
            SystemOperation::SelectFile => "select-file",
            SystemOperation::PowerShell => "powershell",
            SystemOperation::Cmd => "cmd",
            SystemOperation::ListFiles => "list-files",
            SystemOperation::CountFiles => "count-files",
            SystemOperation::ReadFile => "read-file",
            SystemOperation::WriteFile => "write-file",
            SystemOperation::CopyFile => "copy",
            SystemOperation::DeleteFile => "delete",
        }
    }

    /// Response field carrying the operation's result, if it has one.
    pub fn result_key(self) -> Option<&'static str> {
        match self {
            SystemOperation::SelectFolder | SystemOperation::SelectFile => Some("path"),
            SystemOperation::PowerShell | SystemOperation::Cmd => Some("output"),
            SystemOperation::ListFiles => Some("files"),
            SystemOperation::CountFiles => Some("count"),
            SystemOperation::ReadFile => Some("content"),
            SystemOperation::WriteFile | SystemOperation::CopyFile | SystemOperation::DeleteFile => None,
        }
    }
}

/// A successful `{success: true, ...}` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemResponse {
    pub data: Map<String, Value>,
}

impl SystemResponse {
    pub fn result(&self, operation: SystemOperation) -> Value {
        operation
            .result_key()
            .and_then(|k| self.data.get(k).cloned())
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
pub trait SystemService: Send + Sync {
    async fn call(
        &self,
        operation: SystemOperation,
        payload: Map<String, Value>,
    ) -> Result<SystemResponse, SystemServiceError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// System service reached over HTTP: `POST {base}/api/system/{endpoint}`
/// with the step params as the JSON body.
pub struct HttpSystemService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSystemService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SystemServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SystemServiceError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SystemService for HttpSystemService {
    async fn call(
        &self,
        operation: SystemOperation,
        payload: Map<String, Value>,
    ) -> Result<SystemResponse, SystemServiceError> {
        let url = format!("{}/api/system/{}", self.base_url, operation.endpoint());
        tracing::debug!(url = %url, "System service call");

        let resp = self
            .client
            .post(&url)
            .json(&Value::Object(payload))
            .send()
            .await
            .map_err(|e| SystemServiceError::Transport(e.to_string()))?;

        let status = resp.status();
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) if !status.is_success() => {
                return Err(SystemServiceError::Failed(format!("HTTP {}", status)));
            }
            Err(e) => return Err(SystemServiceError::Transport(e.to_string())),
        };

        // The service answers business failures with `{success: false}`,
        // whatever the status code.
        let success = body.get("success").and_then(Value::as_bool).unwrap_or(status.is_success());
        if !success {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(SystemServiceError::Failed(message));
        }

        match body {
            Value::Object(data) => Ok(SystemResponse { data }),
            _ => Ok(SystemResponse::default()),
        }
    }
}
