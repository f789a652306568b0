// Stepwright: Variable store and `${name}` resolution

use crate::workflow::{Variable, VariableType};
use chrono::Datelike;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("token pattern is valid")
});

/// Store shared between the engine (sole writer during a run) and readers
/// such as the CLI.
pub type SharedVariables = Arc<RwLock<VariableStore>>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Ordered list of variables with unique names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStore {
    vars: Vec<Variable>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a list; a later duplicate name overwrites the
    /// earlier value in place.
    pub fn from_variables(vars: impl IntoIterator<Item = Variable>) -> Self {
        let mut store = Self::new();
        for var in vars {
            store.upsert(var);
        }
        store
    }

    pub fn shared(self) -> SharedVariables {
        Arc::new(RwLock::new(self))
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|v| &v.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert-or-overwrite by name. An existing variable keeps its position
    /// and declared type; a new one infers its type from the value.
    pub fn assign(&mut self, name: &str, value: Value) {
        match self.vars.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.value = value,
            None => self.vars.push(Variable::new(name, value)),
        }
    }

    fn upsert(&mut self, var: Variable) {
        match self.vars.iter_mut().find(|v| v.name == var.name) {
            Some(existing) => *existing = var,
            None => self.vars.push(var),
        }
    }

    /// Add `var` only when no variable of that name exists.
    pub fn define(&mut self, var: Variable) -> bool {
        if self.contains(&var.name) {
            return false;
        }
        self.vars.push(var);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn to_vec(&self) -> Vec<Variable> {
        self.vars.clone()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Set the built-in system variables to their current values. Values
    /// left over from an earlier run are overwritten.
    pub fn seed_system_variables(&mut self, workflow_name: &str) {
        let now = chrono::Local::now();
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let machine = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_default();

        let system = [
            ("WorkflowName", VariableType::String, Value::from(workflow_name)),
            ("CurrentDate", VariableType::Date, Value::from(now.format("%Y-%m-%d").to_string())),
            ("CurrentTime", VariableType::Time, Value::from(now.format("%H:%M:%S").to_string())),
            ("CurrentDateTime", VariableType::Datetime, Value::from(now.to_rfc3339())),
            ("CurrentYear", VariableType::Integer, Value::from(now.year())),
            ("CurrentMonth", VariableType::Integer, Value::from(now.month())),
            ("CurrentDay", VariableType::Integer, Value::from(now.day())),
            ("UserName", VariableType::String, Value::from(user)),
            ("MachineName", VariableType::String, Value::from(machine)),
        ];

        for (name, var_type, value) in system {
            self.upsert(Variable::typed(name, var_type, value));
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Text used when a variable is spliced into a longer string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn contains_token(value: &Value) -> bool {
    match value {
        Value::String(s) => TOKEN.is_match(s),
        Value::Array(items) => items.iter().any(contains_token),
        Value::Object(map) => map.values().any(contains_token),
        _ => false,
    }
}

/// Substitute `${name}` tokens with variable values.
///
/// A string that is exactly one token yields the variable's value with its
/// JSON type intact. Tokens inside longer text are replaced with the value's
/// string form. Unknown names stay verbatim. Objects and arrays are resolved
/// recursively and other scalars are returned unchanged.
pub fn resolve(value: &Value, store: &VariableStore) -> Value {
    match value {
        Value::String(s) => resolve_str(s, store),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, store)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, store)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_str(s: &str, store: &VariableStore) -> Value {
    if let Some(caps) = TOKEN.captures(s) {
        let whole = caps.get(0).map(|m| m.as_str() == s).unwrap_or(false);
        if whole {
            return match store.value(&caps[1]) {
                Some(v) => v.clone(),
                None => Value::String(s.to_string()),
            };
        }
    } else {
        return Value::String(s.to_string());
    }

    let replaced = TOKEN.replace_all(s, |caps: &Captures| match store.value(&caps[1]) {
        Some(v) => value_to_string(v),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

/// Resolved copy of a step's params for one execution attempt.
pub fn resolve_step_params(params: &Map<String, Value>, store: &VariableStore) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve(v, store)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> VariableStore {
        VariableStore::from_variables(vec![
            Variable::new("x", json!("42")),
            Variable::new("n", json!(7)),
            Variable::new("cfg", json!({"host": "sap01"})),
        ])
    }

    #[test]
    fn test_no_token_is_noop() {
        let s = store();
        for v in [json!("plain text"), json!(3.5), json!(null), json!({"a": ["b", 1]}), json!("$x {x}")] {
            assert_eq!(resolve(&v, &s), v);
        }
    }

    #[test]
    fn test_whole_token_returns_value_verbatim() {
        let s = store();
        assert_eq!(resolve(&json!("${x}"), &s), json!("42"));
        assert_eq!(resolve(&json!("${n}"), &s), json!(7));
        assert_eq!(resolve(&json!("${cfg}"), &s), json!({"host": "sap01"}));
    }

    #[test]
    fn test_unknown_token_left_verbatim() {
        let s = store();
        assert_eq!(resolve(&json!("${missing}"), &s), json!("${missing}"));
        assert_eq!(
            resolve(&json!("a ${missing} b ${x}"), &s),
            json!("a ${missing} b 42")
        );
    }

    #[test]
    fn test_mixed_text_stringifies() {
        let s = store();
        assert_eq!(resolve(&json!("n=${n}; x=${x}"), &s), json!("n=7; x=42"));
        assert_eq!(
            resolve(&json!("cfg=${cfg}"), &s),
            json!(r#"cfg={"host":"sap01"}"#)
        );
    }

    #[test]
    fn test_recurses_structurally() {
        let s = store();
        let v = json!({"list": ["${x}", {"deep": "v${n}"}], "flag": true});
        assert_eq!(
            resolve(&v, &s),
            json!({"list": ["42", {"deep": "v7"}], "flag": true})
        );
    }

    #[test]
    fn test_resolve_step_params_does_not_touch_source() {
        let s = store();
        let mut params = Map::new();
        params.insert("path".into(), json!("C:/${x}/out"));
        let resolved = resolve_step_params(&params, &s);
        assert_eq!(resolved["path"], "C:/42/out");
        assert_eq!(params["path"], "C:/${x}/out");
    }

    #[test]
    fn test_assign_insert_or_overwrite() {
        let mut s = store();
        s.assign("x", json!("43"));
        s.assign("nuevo", json!(true));
        assert_eq!(s.value("x"), Some(&json!("43")));
        assert_eq!(s.len(), 4);
        assert_eq!(s.get("nuevo").unwrap().var_type, VariableType::Boolean);
        // Position preserved
        assert_eq!(s.iter().next().unwrap().name, "x");
    }

    #[test]
    fn test_seed_system_refreshes_stale_values() {
        let mut s = VariableStore::from_variables(vec![
            Variable::new("WorkflowName", json!("Anterior")),
            Variable::new("CurrentTime", json!("99:99:99")),
        ]);
        s.seed_system_variables("Facturas");
        assert_eq!(s.value("WorkflowName"), Some(&json!("Facturas")));
        assert_ne!(s.value("CurrentTime"), Some(&json!("99:99:99")));
        assert_eq!(s.get("CurrentTime").unwrap().var_type, VariableType::Time);
        assert!(s.contains("CurrentDate"));
        assert!(s.value("CurrentYear").unwrap().is_i64());
        // Refreshed in place
        assert_eq!(s.iter().next().unwrap().name, "WorkflowName");
    }
}
