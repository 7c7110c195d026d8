//! DifyAnalyzer against a fake completion endpoint.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use autodeploy_connectors::DifyAnalyzer;
use autodeploy_core::{Analyzer, DifySettings, ErrorKind, SecretKey, StaticCredentials};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

#[derive(Clone)]
struct Fake {
    status: StatusCode,
    reply: Value,
    seen: Seen,
}

async fn completion(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    fake.seen.lock().unwrap().push((auth, body));
    (fake.status, Json(fake.reply.clone())).into_response()
}

async fn serve(status: StatusCode, reply: Value) -> (SocketAddr, Seen) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/v1/completion-messages", post(completion))
        .with_state(Fake {
            status,
            reply,
            seen: seen.clone(),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

fn analyzer(addr: SocketAddr) -> DifyAnalyzer {
    let settings = DifySettings {
        api_url: format!("http://{addr}/v1"),
        ..DifySettings::default()
    };
    let creds = StaticCredentials::new().with(SecretKey::DifyApiKey, "app-key");
    DifyAnalyzer::new(&settings, &creds).unwrap()
}

#[tokio::test]
async fn blocking_completion_yields_plan() {
    let answer = "```json\n{\"changes\":[{\"target\":\"src/routes.rs\",\"intent\":\"add /health\"}]}\n```";
    let (addr, seen) = serve(StatusCode::OK, json!({"answer": answer})).await;

    let plan = analyzer(addr).analyze("add health endpoint").await.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.changes[0].intent, "add /health");

    let seen = seen.lock().unwrap();
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer app-key"));
    assert_eq!(body["response_mode"], "blocking");
    assert_eq!(body["user"], "auto-deploy-system");
    assert!(body["query"].as_str().unwrap().ends_with("add health endpoint"));
}

#[tokio::test]
async fn overload_is_retryable() {
    let (addr, _) = serve(StatusCode::SERVICE_UNAVAILABLE, json!({})).await;
    let err = analyzer(addr).analyze("doc").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AnalysisUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn refused_key_is_unauthorized() {
    let (addr, _) = serve(StatusCode::UNAUTHORIZED, json!({})).await;
    let err = analyzer(addr).analyze("doc").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unauthorized);
}

#[tokio::test]
async fn missing_answer_is_rejected() {
    let (addr, _) = serve(StatusCode::OK, json!({"message_id": "m1"})).await;
    let err = analyzer(addr).analyze("doc").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AnalysisRejected);
    assert!(!err.is_retryable());
}
