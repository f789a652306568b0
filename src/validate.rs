// Stepwright: Pre-run validation of step params against action descriptors

use crate::registry::{CatalogSnapshot, FieldFormat, FieldSpec};
use crate::variables::{contains_token, resolve_step_params, VariableStore};
use crate::workflow::{flatten, WorkflowStep};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Failures for one step, addressed by its flattened index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepValidation {
    pub step_index: usize,
    pub step_label: String,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub steps: Vec<StepValidation>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn field_error_count(&self) -> usize {
        self.steps.iter().map(|s| s.errors.len()).sum()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} field error(s) in {} step(s)",
            self.field_error_count(),
            self.len()
        )?;
        for step in &self.steps {
            for err in &step.errors {
                write!(
                    f,
                    "; step {} '{}': {}: {}",
                    step.step_index + 1,
                    step.step_label,
                    err.field,
                    err.message
                )?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn check_format(field: &FieldSpec, format: &FieldFormat, value: &Value) -> Option<FieldError> {
    // Still templated after resolution; the value is only known at runtime.
    if contains_token(value) {
        return None;
    }

    match format {
        FieldFormat::Url => {
            let text = value.as_str().unwrap_or_default();
            match url::Url::parse(text) {
                Ok(u) if u.scheme() == "http" || u.scheme() == "https" => None,
                Ok(u) => Some(FieldError::new(
                    &field.name,
                    format!("unsupported URL scheme '{}'", u.scheme()),
                )),
                Err(_) => Some(FieldError::new(&field.name, "must be a valid URL")),
            }
        }
        FieldFormat::Email => {
            let text = value.as_str().unwrap_or_default();
            if EMAIL.is_match(text.trim()) {
                None
            } else {
                Some(FieldError::new(&field.name, "must be a valid e-mail address"))
            }
        }
        FieldFormat::Number { min, max } => {
            let Some(n) = as_number(value) else {
                return Some(FieldError::new(&field.name, "must be a number"));
            };
            if let Some(min) = min {
                if n < *min {
                    return Some(FieldError::new(&field.name, format!("must be at least {}", min)));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Some(FieldError::new(&field.name, format!("must be at most {}", max)));
                }
            }
            None
        }
    }
}

fn validate_step(step: &WorkflowStep, catalog: &CatalogSnapshot, store: &VariableStore) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !step.children.is_empty() && !step.is_container {
        errors.push(FieldError::new("children", "only container steps may have children"));
    }

    let Some(descriptor) = catalog.get(&step.action) else {
        // Unknown ids are reconciled into custom components before validation
        // runs; anything still missing has no field rules to check.
        return errors;
    };

    let params = resolve_step_params(&step.params, store);
    for field in &descriptor.fields {
        let value = field
            .keys()
            .map(|key| params.get(key))
            .find(|value| is_present(*value))
            .flatten();
        if !is_present(value) {
            if field.required {
                errors.push(FieldError::new(&field.name, "is required"));
            }
            continue;
        }
        if let (Some(format), Some(value)) = (&field.format, value) {
            if let Some(err) = check_format(field, format, value) {
                errors.push(err);
            }
        }
    }

    errors
}

/// Check every step, in flattened order, against its descriptor's field
/// rules using params resolved against `store`. An empty report means the
/// workflow may start.
pub fn validate_workflow(
    steps: &[WorkflowStep],
    catalog: &CatalogSnapshot,
    store: &VariableStore,
) -> ValidationReport {
    let steps = flatten(steps)
        .into_iter()
        .enumerate()
        .filter_map(|(index, step)| {
            let errors = validate_step(step, catalog, store);
            if errors.is_empty() {
                None
            } else {
                Some(StepValidation {
                    step_index: index,
                    step_label: step.display_label().to_string(),
                    errors,
                })
            }
        })
        .collect();

    ValidationReport { steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActionRegistry;
    use crate::workflow::Variable;
    use serde_json::json;

    async fn catalog() -> CatalogSnapshot {
        ActionRegistry::in_memory().snapshot().await
    }

    #[tokio::test]
    async fn test_valid_workflow_yields_empty_report() {
        let steps = vec![
            WorkflowStep::new("1", "navigate").with_param("url", json!("https://example.com")),
            WorkflowStep::new("2", "wait").with_param("seconds", json!(2)),
            WorkflowStep::new("3", "assign")
                .with_param("variableName", json!("x"))
                .with_param("value", json!("42")),
        ];
        let report = validate_workflow(&steps, &catalog().await, &VariableStore::new());
        assert!(report.is_empty(), "{}", report);
    }

    #[tokio::test]
    async fn test_missing_required_field_reported() {
        let steps = vec![
            WorkflowStep::new("1", "log_info").with_param("message", json!("ok")),
            WorkflowStep::new("2", "group").with_children(vec![
                WorkflowStep::new("3", "run_powershell").with_label("Script"),
            ]),
        ];
        let report = validate_workflow(&steps, &catalog().await, &VariableStore::new());
        assert_eq!(report.len(), 1);
        assert_eq!(report.steps[0].step_index, 2);
        assert_eq!(report.steps[0].step_label, "Script");
        assert_eq!(report.steps[0].errors[0].field, "script");
    }

    #[tokio::test]
    async fn test_empty_string_counts_as_missing() {
        let steps = vec![WorkflowStep::new("1", "click").with_param("selector", json!("  "))];
        let report = validate_workflow(&steps, &catalog().await, &VariableStore::new());
        assert_eq!(report.field_error_count(), 1);
    }

    #[tokio::test]
    async fn test_format_checks() {
        let steps = vec![
            WorkflowStep::new("1", "navigate").with_param("url", json!("not a url")),
            WorkflowStep::new("2", "send_email")
                .with_param("to", json!("nobody"))
                .with_param("subject", json!("hi")),
            WorkflowStep::new("3", "wait").with_param("seconds", json!(-1)),
            WorkflowStep::new("4", "wait").with_param("seconds", json!("abc")),
        ];
        let report = validate_workflow(&steps, &catalog().await, &VariableStore::new());
        let indices: Vec<usize> = report.steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_resolves_before_checking() {
        let store = VariableStore::from_variables(vec![
            Variable::new("site", json!("https://intranet.local")),
            Variable::new("delay", json!(5)),
        ]);
        let steps = vec![
            WorkflowStep::new("1", "navigate").with_param("url", json!("${site}")),
            WorkflowStep::new("2", "wait").with_param("seconds", json!("${delay}")),
            // Unresolved tokens are deferred to runtime
            WorkflowStep::new("3", "navigate").with_param("url", json!("${later}")),
        ];
        let report = validate_workflow(&steps, &catalog().await, &store);
        assert!(report.is_empty(), "{}", report);
    }

    #[tokio::test]
    async fn test_alias_keys_satisfy_field() {
        let steps = vec![
            WorkflowStep::new("1", "set_variable").with_param("variableName", json!("x")),
            WorkflowStep::new("2", "assign").with_param("variable", json!("y")),
            WorkflowStep::new("3", "wait").with_param("time", json!(99999)),
        ];
        let report = validate_workflow(&steps, &catalog().await, &VariableStore::new());
        assert_eq!(report.len(), 1);
        assert_eq!(report.steps[0].step_index, 2);
        assert_eq!(report.steps[0].errors[0].field, "seconds");
    }

    #[test]
    fn test_report_display() {
        let report = ValidationReport {
            steps: vec![StepValidation {
                step_index: 0,
                step_label: "Navegar".into(),
                errors: vec![FieldError::new("url", "is required")],
            }],
        };
        assert_eq!(
            report.to_string(),
            "1 field error(s) in 1 step(s); step 1 'Navegar': url: is required"
        );
    }
}
