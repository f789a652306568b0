// Stepwright: Engine error kinds

use crate::validate::ValidationReport;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the automation backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("automation backend is not connected")]
    NotConnected,
    #[error("failed to connect to automation backend: {0}")]
    Connect(String),
    #[error("failed to send to automation backend: {0}")]
    Send(String),
    #[error("connection to automation backend lost")]
    ConnectionLost,
    #[error("no terminal event from automation backend within {0:?}")]
    Timeout(Duration),
}

/// Failures from the local system-service collaborator. A transport failure
/// (service unreachable) is distinct from the service answering
/// `{success: false}`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SystemServiceError {
    #[error("system service unreachable: {0}")]
    Transport(String),
    #[error("system service reported failure: {0}")]
    Failed(String),
}

impl SystemServiceError {
    pub fn is_transport(&self) -> bool {
        matches!(self, SystemServiceError::Transport(_))
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("workflow failed validation: {0}")]
    Validation(ValidationReport),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("backend execution failed: {0}")]
    BackendExecution(String),
    #[error("{action}: {source}")]
    SystemService {
        action: String,
        #[source]
        source: SystemServiceError,
    },
    #[error("{action}: {message}")]
    InvalidParams { action: String, message: String },
    #[error("run stopped")]
    Stopped,
    #[error("workflow '{0}' already has an active run")]
    AlreadyRunning(String),
    #[error("action registry error: {0}")]
    Registry(String),
}

impl EngineError {
    pub fn invalid_params(action: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::InvalidParams {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn system(action: impl Into<String>, source: SystemServiceError) -> Self {
        EngineError::SystemService {
            action: action.into(),
            source,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts() {
        let err: EngineError = TransportError::Timeout(Duration::from_secs(300)).into();
        assert!(matches!(err, EngineError::Transport(TransportError::Timeout(_))));
        assert!(err.to_string().contains("300s"));
    }

    #[test]
    fn test_system_error_message() {
        let err = EngineError::system(
            "run_powershell",
            SystemServiceError::Transport("connection refused".into()),
        );
        assert_eq!(
            err.to_string(),
            "run_powershell: system service unreachable: connection refused"
        );
    }
}
