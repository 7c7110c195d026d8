//! JenkinsClient against an in-process fake Jenkins controller.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use autodeploy_ci::JenkinsClient;
use autodeploy_core::{
    BuildId, BuildState, CiAdapter, ErrorKind, JenkinsSettings, SecretKey, StaticCredentials,
};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

#[derive(Default)]
struct Recorded {
    queue_polls: u32,
    trigger_query: HashMap<String, String>,
    crumb_header: Option<String>,
    auth_header: Option<String>,
    stopped: Vec<u64>,
    cancelled_items: Vec<String>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn crumb() -> Json<serde_json::Value> {
    Json(json!({"crumbRequestField": "Jenkins-Crumb", "crumb": "abc123"}))
}

async fn parameterized_job() -> Json<serde_json::Value> {
    Json(json!({
        "name": "app-build",
        "property": [
            {"_class": "hudson.model.ParametersDefinitionProperty"}
        ]
    }))
}

async fn build_with_parameters(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut recorded = state.lock().unwrap();
    recorded.trigger_query = query;
    recorded.crumb_header = headers
        .get("Jenkins-Crumb")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    recorded.auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (
        StatusCode::CREATED,
        [(header::LOCATION, "http://jenkins.local/queue/item/5/")],
    )
}

async fn queue_item(State(state): State<Shared>) -> Json<serde_json::Value> {
    let mut recorded = state.lock().unwrap();
    recorded.queue_polls += 1;
    if recorded.queue_polls == 1 {
        Json(json!({"id": 5, "why": "Waiting for next available executor"}))
    } else {
        Json(json!({
            "id": 5,
            "executable": {"number": 12, "url": "http://jenkins.local/job/app-build/12/"}
        }))
    }
}

async fn build_info() -> Json<serde_json::Value> {
    Json(json!({
        "building": false,
        "result": "UNSTABLE",
        "url": "http://jenkins.local/job/app-build/12/"
    }))
}

async fn console_text() -> &'static str {
    "Started by remote host\nTests run: 10, Failures: 2\nFinished: UNSTABLE\n"
}

async fn stop(State(state): State<Shared>) -> StatusCode {
    state.lock().unwrap().stopped.push(12);
    StatusCode::OK
}

async fn cancel_item(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    if let Some(id) = query.get("id") {
        state.lock().unwrap().cancelled_items.push(id.clone());
    }
    StatusCode::NO_CONTENT
}

async fn forbidden() -> StatusCode {
    StatusCode::FORBIDDEN
}

async fn overloaded() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn spawn_jenkins() -> (SocketAddr, Shared) {
    let state: Shared = Arc::default();
    let app = Router::new()
        .route("/crumbIssuer/api/json", get(crumb))
        .route("/job/app-build/api/json", get(parameterized_job))
        .route(
            "/job/app-build/buildWithParameters",
            post(build_with_parameters),
        )
        .route("/queue/item/5/api/json", get(queue_item))
        .route("/queue/cancelItem", post(cancel_item))
        .route("/job/app-build/12/api/json", get(build_info))
        .route("/job/app-build/12/consoleText", get(console_text))
        .route("/job/app-build/12/stop", post(stop))
        .route("/job/locked/api/json", get(forbidden))
        .route("/job/busy/api/json", get(overloaded))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn client(addr: SocketAddr) -> JenkinsClient {
    let settings = JenkinsSettings {
        url: format!("http://{addr}"),
    };
    let creds = StaticCredentials::new()
        .with(SecretKey::JenkinsUser, "deployer")
        .with(SecretKey::JenkinsToken, "token-1");
    JenkinsClient::new(&settings, &creds).unwrap()
}

#[tokio::test]
async fn trigger_queues_parameterized_build_with_crumb() {
    let (addr, state) = spawn_jenkins().await;
    let jenkins = client(addr);

    let params = BTreeMap::from([
        ("BRANCH".to_string(), "auto-deploy/app-20240101000000".to_string()),
        ("ENV".to_string(), "staging".to_string()),
    ]);
    let id = jenkins
        .trigger("app-build", "auto-deploy/app-20240101000000", &params)
        .await
        .unwrap();
    assert_eq!(id.as_str(), "app-build#queue-5");

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.trigger_query.get("ENV").map(String::as_str), Some("staging"));
    assert_eq!(
        recorded.trigger_query.get("BRANCH").map(String::as_str),
        Some("auto-deploy/app-20240101000000")
    );
    assert_eq!(recorded.crumb_header.as_deref(), Some("abc123"));
    assert!(recorded
        .auth_header
        .as_deref()
        .is_some_and(|v| v.starts_with("Basic ")));
}

#[tokio::test]
async fn poll_follows_queue_item_to_build() {
    let (addr, _state) = spawn_jenkins().await;
    let jenkins = client(addr);
    let queued = BuildId::new("app-build#queue-5");

    let first = jenkins.poll(&queued).await.unwrap();
    assert_eq!(first.state, BuildState::Pending);
    assert_eq!(first.id, queued);

    let second = jenkins.poll(&queued).await.unwrap();
    assert_eq!(second.id.as_str(), "app-build#12");
    assert_eq!(second.state, BuildState::Running);
    assert_eq!(
        second.log_ref.as_deref(),
        Some("http://jenkins.local/job/app-build/12/console")
    );

    let finished = jenkins.poll(&second.id).await.unwrap();
    assert_eq!(finished.state, BuildState::Failed);
}

#[tokio::test]
async fn console_text_is_the_log_excerpt() {
    let (addr, _state) = spawn_jenkins().await;
    let jenkins = client(addr);

    let log = jenkins
        .log_excerpt(&BuildId::new("app-build#12"))
        .await
        .unwrap()
        .unwrap();
    assert!(log.contains("Failures: 2"));

    let queued = jenkins
        .log_excerpt(&BuildId::new("app-build#queue-5"))
        .await
        .unwrap();
    assert!(queued.is_none());
}

#[tokio::test]
async fn abort_stops_builds_and_cancels_queue_items() {
    let (addr, state) = spawn_jenkins().await;
    let jenkins = client(addr);

    jenkins.abort(&BuildId::new("app-build#12")).await.unwrap();
    jenkins
        .abort(&BuildId::new("app-build#queue-5"))
        .await
        .unwrap();

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.stopped, vec![12]);
    assert_eq!(recorded.cancelled_items, vec!["5".to_string()]);
}

#[tokio::test]
async fn http_failures_are_classified() {
    let (addr, _state) = spawn_jenkins().await;
    let jenkins = client(addr);
    let none = BTreeMap::new();

    let missing = jenkins.trigger("missing", "main", &none).await.unwrap_err();
    assert_eq!(missing.kind, ErrorKind::JobNotFound);

    let locked = jenkins.trigger("locked", "main", &none).await.unwrap_err();
    assert_eq!(locked.kind, ErrorKind::Unauthorized);

    let busy = jenkins.trigger("busy", "main", &none).await.unwrap_err();
    assert_eq!(busy.kind, ErrorKind::CiUnavailable);
    assert!(busy.is_retryable());
}

#[tokio::test]
async fn unreachable_controller_is_ci_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr)
        .poll(&BuildId::new("app-build#12"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CiUnavailable);
}
