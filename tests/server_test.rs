use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use uuid::Uuid;

use guardian::checks::mock::MockCheck;
use guardian::checks::{Check, CheckRegistry};
use guardian::models::{SendResponse, Verdict};
use guardian::pipeline::{Pipeline, PipelineConfig};
use guardian::server::{AppState, ErrorBody, serve_with_shutdown};
use guardian::tasks::sqlite::SqliteTaskStore;

struct TestServer {
    base: String,
    _shutdown: oneshot::Sender<()>,
}

async fn start(store: SqliteTaskStore, checks: Vec<Arc<dyn Check>>, timeout: Option<Duration>) -> TestServer {
    let registry: CheckRegistry = checks.into_iter().collect();
    let pipeline = Pipeline::new(
        Arc::new(registry),
        Arc::new(store),
        PipelineConfig {
            check_timeout: None,
            ..PipelineConfig::default()
        },
    );
    let state = AppState {
        processor: Arc::new(pipeline),
        request_timeout: timeout,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        serve_with_shutdown(listener, state, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        _shutdown: tx,
    }
}

fn content_type(resp: &reqwest::Response) -> &str {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn root_says_welcome() {
    let server = start(SqliteTaskStore::in_memory().unwrap(), vec![], Some(Duration::from_secs(5))).await;

    let resp = reqwest::get(&server.base).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(content_type(&resp), "application/json");
    let body: String = resp.json().await.unwrap();
    assert_eq!(body, "welcome");
}

#[tokio::test]
async fn unknown_route_is_json() {
    let server = start(SqliteTaskStore::in_memory().unwrap(), vec![], Some(Duration::from_secs(5))).await;

    let resp = reqwest::get(format!("{}/nope", server.base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(content_type(&resp), "application/json");
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "not found");
}

#[tokio::test]
async fn send_returns_benign() {
    let user = Uuid::new_v4();
    let store = SqliteTaskStore::in_memory().unwrap();
    store.assign(user, "external-api").unwrap();
    let server = start(
        store,
        vec![Arc::new(MockCheck::passing("external-api")) as Arc<dyn Check>],
        Some(Duration::from_secs(5)),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", server.base))
        .json(&json!({ "user_id": user, "prompt": "hello", "targets": [] }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: SendResponse = resp.json().await.unwrap();
    assert_eq!(body.status, Verdict::Benign);
}

#[tokio::test]
async fn send_returns_malicious_as_success() {
    let user = Uuid::new_v4();
    let store = SqliteTaskStore::in_memory().unwrap();
    store.assign(user, "keyword").unwrap();
    let server = start(
        store,
        vec![Arc::new(MockCheck::rejecting("keyword")) as Arc<dyn Check>],
        Some(Duration::from_secs(5)),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", server.base))
        .json(&json!({ "user_id": user, "prompt": "drop table users" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: SendResponse = resp.json().await.unwrap();
    assert_eq!(body.status, Verdict::Malicious);
}

#[tokio::test]
async fn empty_prompt_is_bad_request() {
    let server = start(SqliteTaskStore::in_memory().unwrap(), vec![], Some(Duration::from_secs(5))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", server.base))
        .json(&json!({ "user_id": Uuid::new_v4(), "prompt": "" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(content_type(&resp), "application/json");
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "empty prompt");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let server = start(SqliteTaskStore::in_memory().unwrap(), vec![], Some(Duration::from_secs(5))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", server.base))
        .json(&json!({ "prompt": "no user" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(content_type(&resp), "application/json");
    let body: ErrorBody = resp.json().await.unwrap();
    assert!(body.error.contains("user_id"), "{}", body.error);
}

#[tokio::test]
async fn non_json_body_is_bad_request() {
    let server = start(SqliteTaskStore::in_memory().unwrap(), vec![], Some(Duration::from_secs(5))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", server.base))
        .body("prompt=hello")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(content_type(&resp), "application/json");
    let body: ErrorBody = resp.json().await.unwrap();
    assert!(!body.error.is_empty());
}

#[tokio::test]
async fn slow_pipeline_times_out() {
    let user = Uuid::new_v4();
    let store = SqliteTaskStore::in_memory().unwrap();
    store.assign(user, "slow").unwrap();
    let server = start(
        store,
        vec![Arc::new(MockCheck::passing("slow").with_delay(Duration::from_secs(5))) as Arc<dyn Check>],
        Some(Duration::from_millis(50)),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", server.base))
        .json(&json!({ "user_id": user, "prompt": "hello" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
}

#[tokio::test]
async fn disabled_request_timeout_waits_for_checks() {
    let user = Uuid::new_v4();
    let store = SqliteTaskStore::in_memory().unwrap();
    store.assign(user, "slow").unwrap();
    let server = start(
        store,
        vec![Arc::new(MockCheck::passing("slow").with_delay(Duration::from_millis(100))) as Arc<dyn Check>],
        None,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", server.base))
        .json(&json!({ "user_id": user, "prompt": "hello" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: SendResponse = resp.json().await.unwrap();
    assert_eq!(body.status, Verdict::Benign);
}
