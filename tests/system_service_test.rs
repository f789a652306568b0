use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use stepwright::engine::{ExecutionController, ModePreference, RunOptions, SessionStatus};
use stepwright::error::SystemServiceError;
use stepwright::local::{
    HttpSystemService, LocalInterpreter, NonInteractivePrompter, SystemOperation, SystemService,
};
use stepwright::registry::ActionRegistry;
use stepwright::workflow::{Workflow, WorkflowStep};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(server: &MockServer) -> HttpSystemService {
    HttpSystemService::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_select_folder_returns_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/system/select-folder"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "path": "D:\\Reports"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = service(&server)
        .call(SystemOperation::SelectFolder, Map::new())
        .await
        .unwrap();
    assert_eq!(response.result(SystemOperation::SelectFolder), json!("D:\\Reports"));
}

#[tokio::test]
async fn test_business_failure_is_not_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/system/powershell"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"success": false, "error": "execution policy"})),
        )
        .mount(&server)
        .await;

    let mut payload = Map::new();
    payload.insert("script".into(), json!("Get-Date"));
    let err = service(&server)
        .call(SystemOperation::PowerShell, payload)
        .await
        .unwrap_err();

    assert_eq!(err, SystemServiceError::Failed("execution policy".into()));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_local_run_against_http_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/system/count-files"))
        .and(body_partial_json(json!({"path": "C:\\Inbox", "pattern": "*.pdf"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "count": 12})))
        .mount(&server)
        .await;

    let interpreter = LocalInterpreter::with_defaults(
        Arc::new(service(&server)),
        Arc::new(NonInteractivePrompter),
        Duration::from_secs(1),
        Duration::from_millis(1),
    )
    .await;
    let ctl = ExecutionController::new(ActionRegistry::in_memory(), interpreter)
        .with_system_variables(false);

    let mut wf = Workflow::new(
        "count",
        "Count invoices",
        vec![WorkflowStep::new("1", "count_files")
            .with_param("path", json!("${inbox}"))
            .with_param("pattern", json!("*.pdf"))
            .with_param("saveAs", json!("pdfs"))],
    );
    wf.variables
        .push(stepwright::workflow::Variable::new("inbox", json!("C:\\Inbox")));

    let report = ctl
        .run(&wf, RunOptions::with_mode(ModePreference::Local))
        .await
        .unwrap();
    assert_eq!(report.status, SessionStatus::Completed);

    let store = ctl.variables();
    let store = store.read().await;
    assert_eq!(store.value("pdfs"), Some(&json!(12)));
    assert!(!store.contains("conteo"));
}
