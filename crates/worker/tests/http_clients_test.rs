use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{json, Value};
use taskworker_config::AuthConfig;
use taskworker_domain::{TaskResult, TaskStatus, WorkerLanguage};
use taskworker_errors::WorkerError;
use taskworker_worker::{
    AuthProvider, HttpRegistryClient, HttpTaskClient, PollRequest, ResultReporter, TaskApi,
    WorkerRegistry,
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ServerState {
    token: String,
    exchanges: AtomicUsize,
    updates: Mutex<Vec<Value>>,
    queries: Mutex<Vec<HashMap<String, String>>>,
}

impl ServerState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get("X-Authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == self.token)
    }
}

type Shared = Arc<ServerState>;

async fn poll_batch(
    State(state): State<Shared>,
    Path(task_type): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let count: usize = query.get("count").and_then(|c| c.parse().ok()).unwrap_or(1);
    state.queries.lock().unwrap().push(query);
    if task_type == "idle" {
        return StatusCode::NO_CONTENT.into_response();
    }
    let tasks: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "taskId": format!("t-{i}"),
                "workflowInstanceId": "wf-1",
                "taskType": task_type,
                "inputData": {"n": i},
                "referenceTaskName": "ref"
            })
        })
        .collect();
    Json(tasks).into_response()
}

async fn update_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let task_id = body["taskId"].as_str().unwrap_or_default().to_string();
    state.updates.lock().unwrap().push(body);
    task_id.into_response()
}

async fn worker_by_name(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match name.as_str() {
        "greet" => Json(json!({
            "id": "wc-1",
            "namespace": "default",
            "taskName": "greet",
            "language": "LUA",
            "code": "return nil",
            "version": 4,
            "description": "greets",
            "dependencies": []
        }))
        .into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "kaput").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn list_workers(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let namespace = query.get("namespace").cloned().unwrap_or_default();
    Json(json!([
        {"taskName": "greet", "language": "LUA", "version": 4, "namespace": namespace},
        {"taskName": "py_task", "language": "PYTHON", "version": 1, "namespace": namespace,
         "dependencies": ["requests"]}
    ]))
    .into_response()
}

async fn issue_token(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    if body["keyId"] != json!("key") || body["keySecret"] != json!("secret") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.exchanges.fetch_add(1, Ordering::SeqCst);
    Json(json!({"token": state.token})).into_response()
}

async fn start_server(token: &str) -> (String, Shared) {
    let state = Arc::new(ServerState {
        token: token.to_string(),
        ..Default::default()
    });
    let app = Router::new()
        .route("/api/tasks/poll/batch/{task_type}", get(poll_batch))
        .route("/api/tasks", post(update_task))
        .route("/api/worker-code", get(list_workers))
        .route("/api/worker-code/by-name/{name}", get(worker_by_name))
        .route("/api/token", post(issue_token))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api"), state)
}

fn jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"exp": exp}).to_string());
    format!("{header}.{payload}.sig")
}

fn static_auth(server: &str, token: &str) -> Arc<AuthProvider> {
    let config = AuthConfig {
        token: Some(token.to_string()),
        ..Default::default()
    };
    Arc::new(AuthProvider::new(server, config, TIMEOUT).unwrap())
}

fn poll_request(task_type: &str, count: usize) -> PollRequest {
    PollRequest {
        task_type: task_type.to_string(),
        count,
        worker_id: "worker-1".to_string(),
        domain: Some("staging".to_string()),
        timeout_ms: 100,
    }
}

#[tokio::test]
async fn test_batch_poll_sends_query_and_parses_tasks() {
    let (server, state) = start_server("token-1").await;
    let client = HttpTaskClient::new(&server, static_auth(&server, "token-1"), TIMEOUT).unwrap();

    let tasks = client.batch_poll(&poll_request("greet", 2)).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].task_id, "t-1");
    assert_eq!(tasks[1].input_data["n"], json!(1));
    assert_eq!(tasks[0].extra["referenceTaskName"], json!("ref"));

    let queries = state.queries.lock().unwrap().clone();
    assert_eq!(queries[0]["count"], "2");
    assert_eq!(queries[0]["timeout"], "100");
    assert_eq!(queries[0]["workerid"], "worker-1");
    assert_eq!(queries[0]["domain"], "staging");
}

#[tokio::test]
async fn test_batch_poll_no_content_is_empty() {
    let (server, _state) = start_server("token-1").await;
    let client = HttpTaskClient::new(&server, static_auth(&server, "token-1"), TIMEOUT).unwrap();

    let tasks = client.batch_poll(&poll_request("idle", 1)).await.unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn test_missing_credentials_surface_unauthorized() {
    let (server, _state) = start_server("token-1").await;
    let client = HttpTaskClient::new(&server, Arc::new(AuthProvider::anonymous(&server)), TIMEOUT)
        .unwrap();

    let err = client.batch_poll(&poll_request("greet", 1)).await.unwrap_err();
    assert!(err.is_auth_error());
}

#[tokio::test]
async fn test_reporter_posts_task_update() {
    let (server, state) = start_server("token-1").await;
    let client: Arc<dyn TaskApi> =
        Arc::new(HttpTaskClient::new(&server, static_auth(&server, "token-1"), TIMEOUT).unwrap());
    let reporter = ResultReporter::new(client.clone(), "worker-1");

    let task = client.batch_poll(&poll_request("greet", 1)).await.unwrap().remove(0);
    let result = TaskResult::failed(&task, "boom").with_logs(vec!["line".to_string()]);
    reporter.report(result).await.unwrap();

    let updates = state.updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    let update = &updates[0];
    assert_eq!(update["taskId"], json!("t-0"));
    assert_eq!(update["workflowInstanceId"], json!("wf-1"));
    assert_eq!(update["status"], json!(TaskStatus::Failed.as_str()));
    assert_eq!(update["reasonForIncompletion"], json!("boom"));
    assert_eq!(update["outputData"]["error"], json!("boom"));
    assert_eq!(update["workerId"], json!("worker-1"));
    assert_eq!(update["logs"][0]["log"], json!("line"));
    assert_eq!(update["logs"][0]["taskId"], json!("t-0"));
}

#[tokio::test]
async fn test_registry_get_and_list() {
    let (server, _state) = start_server("token-1").await;
    let registry =
        HttpRegistryClient::new(&server, static_auth(&server, "token-1"), TIMEOUT).unwrap();

    let code = registry.get_worker("greet").await.unwrap();
    assert_eq!(code.language, WorkerLanguage::Lua);
    assert_eq!(code.version, 4);
    assert_eq!(code.code, "return nil");

    let workers = registry.list_workers(Some("team-a")).await.unwrap();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0].namespace, "team-a");
    assert_eq!(workers[1].dependencies, vec!["requests".to_string()]);
}

#[tokio::test]
async fn test_registry_error_mapping() {
    let (server, _state) = start_server("token-1").await;
    let registry =
        HttpRegistryClient::new(&server, static_auth(&server, "token-1"), TIMEOUT).unwrap();

    let err = registry.get_worker("missing").await.unwrap_err();
    assert!(matches!(err, WorkerError::WorkerNotFound { ref task_name } if task_name == "missing"));

    let err = registry.get_worker("broken").await.unwrap_err();
    match err {
        WorkerError::Registry(message) => assert_eq!(message, "HTTP 500 - kaput"),
        other => panic!("unexpected error: {other}"),
    }

    let anonymous =
        HttpRegistryClient::new(&server, Arc::new(AuthProvider::anonymous(&server)), TIMEOUT)
            .unwrap();
    assert!(anonymous.get_worker("greet").await.unwrap_err().is_auth_error());
}

#[tokio::test]
async fn test_key_secret_exchange_is_memoised() {
    let token = jwt(chrono::Utc::now().timestamp() + 3600);
    let (server, state) = start_server(&token).await;
    let config = AuthConfig {
        key: Some("key".to_string()),
        secret: Some("secret".to_string()),
        ..Default::default()
    };
    let auth = Arc::new(AuthProvider::new(&server, config, TIMEOUT).unwrap());
    let client = HttpTaskClient::new(&server, auth.clone(), TIMEOUT).unwrap();

    client.batch_poll(&poll_request("greet", 1)).await.unwrap();
    client.batch_poll(&poll_request("greet", 1)).await.unwrap();
    assert_eq!(auth.resolve().await.unwrap(), Some(token));
    assert_eq!(state.exchanges.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_key_secret_is_unauthorized() {
    let (server, _state) = start_server("token-1").await;
    let config = AuthConfig {
        key: Some("key".to_string()),
        secret: Some("wrong".to_string()),
        ..Default::default()
    };
    let auth = AuthProvider::new(&server, config, TIMEOUT).unwrap();
    assert!(auth.resolve().await.unwrap_err().is_auth_error());
}
