// Stepwright: Workflow step-execution engine for RPA automation
// License: Apache-2.0

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("home directory not found")]
    NoHomeDir,
    #[error("invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub system_service: SystemServiceConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

// ---------------------------------------------------------------------------
// Automation backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Budget for the single connect attempt made at run start.
    #[serde(default = "default_connect_wait_ms")]
    pub connect_wait_ms: u64,
    /// Remote runs without a terminal event fail after this long.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            enabled: true,
            connect_wait_ms: default_connect_wait_ms(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn connect_wait(&self) -> Duration {
        Duration::from_millis(self.connect_wait_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

fn default_backend_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_true() -> bool {
    true
}
fn default_connect_wait_ms() -> u64 {
    1500
}
fn default_run_timeout_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// System service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemServiceConfig {
    #[serde(default = "default_system_url")]
    pub url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SystemServiceConfig {
    fn default() -> Self {
        Self {
            url: default_system_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SystemServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_system_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Local interpreter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Acknowledgement dialogs dismiss themselves after this long.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Simulated latency for actions with no local implementation (max 2 s).
    #[serde(default = "default_unimplemented_latency_ms")]
    pub unimplemented_latency_ms: u64,
    #[serde(default = "default_true")]
    pub seed_system_variables: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            ack_timeout_secs: default_ack_timeout_secs(),
            unimplemented_latency_ms: default_unimplemented_latency_ms(),
            seed_system_variables: true,
        }
    }
}

impl InterpreterConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn unimplemented_latency(&self) -> Duration {
        Duration::from_millis(self.unimplemented_latency_ms.min(2000))
    }
}

fn default_ack_timeout_secs() -> u64 {
    60
}
fn default_unimplemented_latency_ms() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Registry and journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

fn default_registry_path() -> String {
    "~/.stepwright/actions.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_journal_path")]
    pub path: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_journal_path(),
        }
    }
}

fn default_journal_path() -> String {
    "~/.stepwright/runs.jsonl".to_string()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf, ConfigError> {
    if let Some(stripped) = path.strip_prefix('~') {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(path.strip_prefix("~/").unwrap_or(stripped)))
    } else {
        Ok(PathBuf::from(path))
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (prefix: STEPWRIGHT_)
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("STEPWRIGHT_BACKEND_URL") {
            self.backend.url = v;
        }
        if let Some(v) = var("STEPWRIGHT_BACKEND_ENABLED") {
            self.backend.enabled = v.parse().unwrap_or(true);
        }
        if let Some(v) = var("STEPWRIGHT_BACKEND_CONNECT_WAIT_MS") {
            if let Ok(n) = v.parse() {
                self.backend.connect_wait_ms = n;
            }
        }
        if let Some(v) = var("STEPWRIGHT_BACKEND_RUN_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.backend.run_timeout_secs = n;
            }
        }
        if let Some(v) = var("STEPWRIGHT_SYSTEM_SERVICE_URL") {
            self.system_service.url = v;
        }
        if let Some(v) = var("STEPWRIGHT_INTERPRETER_ACK_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.interpreter.ack_timeout_secs = n;
            }
        }
        if let Some(v) = var("STEPWRIGHT_REGISTRY_PATH") {
            self.registry.path = v;
        }
        if let Some(v) = var("STEPWRIGHT_JOURNAL_PATH") {
            self.journal.path = v;
        }
        if let Some(v) = var("STEPWRIGHT_JOURNAL_ENABLED") {
            self.journal.enabled = v.parse().unwrap_or(true);
        }
    }

    pub fn registry_path(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.registry.path)
    }

    pub fn journal_path(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.journal.path)
    }

    /// Get the default config file path: ~/.stepwright/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".stepwright").join("config.json"))
    }

    /// Validate configuration for basic correctness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("backend.url", &self.backend.url),
            ("system_service.url", &self.system_service.url),
        ] {
            match url::Url::parse(value) {
                Ok(u) if matches!(u.scheme(), "http" | "https" | "ws" | "wss") => {}
                _ => {
                    return Err(ConfigError::InvalidUrl {
                        field,
                        value: value.clone(),
                    })
                }
            }
        }

        if self.backend.run_timeout_secs == 0 {
            return Err(ConfigError::Other(
                "backend.run_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.interpreter.unimplemented_latency_ms > 2000 {
            tracing::warn!(
                latency_ms = self.interpreter.unimplemented_latency_ms,
                "interpreter.unimplemented_latency_ms is capped at 2000"
            );
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.backend.run_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.interpreter.ack_timeout(), Duration::from_secs(60));
        assert!(cfg.interpreter.seed_system_variables);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{"backend": {"url": "http://rpa-host:3001"}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.backend.url, "http://rpa-host:3001");
        assert!(cfg.backend.enabled);
        assert_eq!(cfg.journal.path, "~/.stepwright/runs.jsonl");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STEPWRIGHT_BACKEND_ENABLED", "false"),
            ("STEPWRIGHT_BACKEND_RUN_TIMEOUT_SECS", "30"),
            ("STEPWRIGHT_SYSTEM_SERVICE_URL", "http://10.0.0.5:4000"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert!(!cfg.backend.enabled);
        assert_eq!(cfg.backend.run_timeout_secs, 30);
        assert_eq!(cfg.system_service.url, "http://10.0.0.5:4000");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = Config::load(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(cfg.backend.connect_wait_ms, 1500);
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut cfg = Config::default();
        cfg.system_service.url = "localhost".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidUrl { field: "system_service.url", .. })
        ));
    }

    #[test]
    fn test_paths_expand_home() {
        let cfg = Config::default();
        let path = cfg.registry_path().unwrap();
        assert!(path.ends_with(".stepwright/actions.json"));
        assert!(!path.to_str().unwrap().starts_with('~'));
    }
}
