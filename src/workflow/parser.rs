use crate::workflow::Workflow;
use anyhow::Context;
use std::path::Path;

/// Load a workflow document from disk. `.yaml`/`.yml` files are parsed as
/// YAML, everything else as JSON.
pub fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let mut workflow: Workflow = if is_yaml {
        serde_yaml::from_str(&content)
            .with_context(|| format!("invalid workflow YAML in {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("invalid workflow JSON in {}", path.display()))?
    };

    if workflow.id.is_empty() {
        workflow.id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "workflow".to_string());
    }

    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_json_workflow() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("facturas.json");
        std::fs::write(
            &path,
            r#"{"name": "Facturas", "steps": [{"id": "s1", "action": "log_info", "params": {"message": "hola"}}]}"#,
        )
        .unwrap();

        let wf = load_workflow(&path).unwrap();
        assert_eq!(wf.id, "facturas");
        assert_eq!(wf.name, "Facturas");
        assert_eq!(wf.steps.len(), 1);
    }

    #[test]
    fn test_load_yaml_workflow() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wf.yaml");
        std::fs::write(
            &path,
            "id: wf-1\nname: Nightly\nsteps:\n  - id: s1\n    action: assign\n    params:\n      variableName: x\n      value: \"42\"\nvariables:\n  - name: x\n    type: string\n    value: \"\"\n",
        )
        .unwrap();

        let wf = load_workflow(&path).unwrap();
        assert_eq!(wf.id, "wf-1");
        assert_eq!(wf.steps[0].params["variableName"], "x");
        assert_eq!(wf.variables[0].name, "x");
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = load_workflow(Path::new("/nonexistent/wf.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read workflow"));
    }
}
