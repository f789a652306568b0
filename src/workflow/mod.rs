// Stepwright: Step tree model (workflow documents, steps, variables)

pub mod parser;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// Variable types offered by the workflow editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    String,
    Integer,
    Double,
    Boolean,
    Datetime,
    Date,
    Time,
    Json,
    Array,
    Dataframe,
    File,
    Credential,
    Browser,
    Element,
    Connection,
}

impl VariableType {
    /// Best-effort type for a value the engine is about to store.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => VariableType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => VariableType::Integer,
            Value::Number(_) => VariableType::Double,
            Value::Array(_) => VariableType::Array,
            Value::Object(_) => VariableType::Json,
            Value::String(_) | Value::Null => VariableType::String,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VariableType::String => "string",
            VariableType::Integer => "integer",
            VariableType::Double => "double",
            VariableType::Boolean => "boolean",
            VariableType::Datetime => "datetime",
            VariableType::Date => "date",
            VariableType::Time => "time",
            VariableType::Json => "json",
            VariableType::Array => "array",
            VariableType::Dataframe => "dataframe",
            VariableType::File => "file",
            VariableType::Credential => "credential",
            VariableType::Browser => "browser",
            VariableType::Element => "element",
            VariableType::Connection => "connection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub value: Value,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        let var_type = VariableType::infer(&value);
        Self {
            name: name.into(),
            var_type,
            value,
        }
    }

    pub fn typed(name: impl Into<String>, var_type: VariableType, value: Value) -> Self {
        Self {
            name: name.into(),
            var_type,
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One node of a workflow tree. `children` is only meaningful when
/// `is_container` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    #[serde(alias = "type")]
    pub action: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "properties")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<WorkflowStep>,
    #[serde(default)]
    pub is_container: bool,
    #[serde(default)]
    pub is_custom_action: bool,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            icon: String::new(),
            label: String::new(),
            params: Map::new(),
            children: Vec::new(),
            is_container: false,
            is_custom_action: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Turn this step into a container owning `children`.
    pub fn with_children(mut self, children: Vec<WorkflowStep>) -> Self {
        self.is_container = true;
        self.children = children;
        self
    }

    /// Label shown to users, falling back to the action id.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.action
        } else {
            &self.label
        }
    }

    /// Children that take part in execution and navigation.
    pub fn child_steps(&self) -> &[WorkflowStep] {
        if self.is_container {
            &self.children
        } else {
            &[]
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "actions", alias = "pasos")]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps,
            variables: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn step_count(&self) -> usize {
        flatten(&self.steps).len()
    }
}

// ---------------------------------------------------------------------------
// Flattening
// ---------------------------------------------------------------------------

/// Pre-order depth-first view of a step tree: every parent precedes its
/// children and sibling order is preserved.
pub fn flatten(steps: &[WorkflowStep]) -> Vec<&WorkflowStep> {
    flatten_with_depth(steps)
        .into_iter()
        .map(|(_, step)| step)
        .collect()
}

/// Same traversal as [`flatten`], paired with each step's nesting depth.
pub fn flatten_with_depth(steps: &[WorkflowStep]) -> Vec<(usize, &WorkflowStep)> {
    let mut out = Vec::new();
    let mut stack: Vec<(usize, &WorkflowStep)> = steps.iter().rev().map(|s| (0, s)).collect();

    while let Some((depth, step)) = stack.pop() {
        out.push((depth, step));
        for child in step.child_steps().iter().rev() {
            stack.push((depth + 1, child));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Vec<WorkflowStep> {
        vec![
            WorkflowStep::new("a", "log_info"),
            WorkflowStep::new("b", "if_condition").with_children(vec![
                WorkflowStep::new("b1", "assign"),
                WorkflowStep::new("b2", "for_loop")
                    .with_children(vec![WorkflowStep::new("b2a", "delay")]),
            ]),
            WorkflowStep::new("c", "message_box"),
        ]
    }

    #[test]
    fn test_flatten_is_preorder() {
        let steps = tree();
        let ids: Vec<&str> = flatten(&steps).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "b1", "b2", "b2a", "c"]);
    }

    #[test]
    fn test_flatten_depths() {
        let steps = tree();
        let depths: Vec<usize> = flatten_with_depth(&steps).iter().map(|(d, _)| *d).collect();
        assert_eq!(depths, vec![0, 0, 1, 1, 2, 0]);
    }

    #[test]
    fn test_flatten_ignores_children_of_non_container() {
        let mut step = WorkflowStep::new("x", "log_info");
        step.children.push(WorkflowStep::new("hidden", "log_info"));
        let steps = vec![step];
        assert_eq!(flatten(&steps).len(), 1);
    }

    #[test]
    fn test_parse_legacy_field_names() {
        let wf: Workflow = serde_json::from_value(json!({
            "id": "wf1",
            "nombre": "Legacy",
            "actions": [
                {"id": "s1", "type": "navigate", "properties": {"url": "https://example.com"}}
            ]
        }))
        .unwrap();

        assert_eq!(wf.name, "Legacy");
        assert_eq!(wf.steps[0].action, "navigate");
        assert_eq!(wf.steps[0].params["url"], "https://example.com");
    }

    #[test]
    fn test_params_keep_insertion_order() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "s1",
            "action": "file_copy",
            "params": {"zeta": 1, "alpha": 2, "mid": 3}
        }))
        .unwrap();
        let keys: Vec<&String> = step.params.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_variable_type_inference() {
        assert_eq!(Variable::new("n", json!(3)).var_type, VariableType::Integer);
        assert_eq!(Variable::new("f", json!(1.5)).var_type, VariableType::Double);
        assert_eq!(Variable::new("s", json!("x")).var_type, VariableType::String);
        assert_eq!(Variable::new("o", json!({"k": 1})).var_type, VariableType::Json);
    }

    #[test]
    fn test_step_count_matches_flatten() {
        let wf = Workflow::new("wf", "Tree", tree());
        assert_eq!(wf.step_count(), 6);
    }
}
