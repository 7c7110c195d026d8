//! McpMonitor against a fake session/stage/log service.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use autodeploy_connectors::McpMonitor;
use autodeploy_core::{
    McpSettings, MonitorEvent, MonitorPublisher, PipelineState, StageStatus, StaticCredentials,
    TerminalState,
};
use axum::extract::{Path, State};
use axum::http::Method;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

type Calls = Arc<Mutex<Vec<(Method, String, Value)>>>;

async fn open_session(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
    calls
        .lock()
        .unwrap()
        .push((Method::POST, "/sessions".to_string(), body));
    Json(json!({"session_id": "s-1"}))
}

async fn add_stage(
    State(calls): State<Calls>,
    Path(session): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut calls = calls.lock().unwrap();
    let n = calls.iter().filter(|(_, p, _)| p.ends_with("/stages")).count();
    calls.push((Method::POST, format!("/sessions/{session}/stages"), body));
    Json(json!({"stage_id": format!("st-{}", n + 1)}))
}

async fn update_stage(
    State(calls): State<Calls>,
    Path((session, stage)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    calls
        .lock()
        .unwrap()
        .push((Method::PUT, format!("/sessions/{session}/stages/{stage}"), body));
    Json(json!({}))
}

async fn add_log(
    State(calls): State<Calls>,
    Path(session): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    calls
        .lock()
        .unwrap()
        .push((Method::POST, format!("/sessions/{session}/logs"), body));
    Json(json!({}))
}

async fn close(
    State(calls): State<Calls>,
    Path(session): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    calls
        .lock()
        .unwrap()
        .push((Method::POST, format!("/sessions/{session}/close"), body));
    Json(json!({}))
}

async fn serve() -> (SocketAddr, Calls) {
    let calls = Calls::default();
    let app = Router::new()
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/:session/stages", post(add_stage))
        .route("/api/sessions/:session/stages/:stage", put(update_stage))
        .route("/api/sessions/:session/logs", post(add_log))
        .route("/api/sessions/:session/close", post(close))
        .with_state(calls.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls)
}

fn monitor(addr: SocketAddr) -> McpMonitor {
    let settings = McpSettings {
        api_url: format!("http://{addr}/api"),
        pipeline_name: "auto-deploy".to_string(),
    };
    McpMonitor::new(&settings, &StaticCredentials::new()).unwrap()
}

#[tokio::test]
async fn run_maps_to_one_session() {
    let (addr, calls) = serve().await;
    let monitor = monitor(addr);

    let events = [
        MonitorEvent::entered("r1", "app", PipelineState::Analyzing),
        MonitorEvent::finished("r1", "app", PipelineState::Analyzing, StageStatus::Succeeded, None),
        MonitorEvent::entered("r1", "app", PipelineState::CodeChanging),
        MonitorEvent::finished(
            "r1",
            "app",
            PipelineState::CodeChanging,
            StageStatus::Failed,
            Some("apply_conflict: no commit".to_string()),
        ),
        MonitorEvent::terminal("r1", "app", TerminalState::Failed),
    ];
    for event in &events {
        monitor.publish(event).await.unwrap();
    }

    let calls = calls.lock().unwrap();
    let paths: Vec<String> = calls
        .iter()
        .map(|(m, p, _)| format!("{m} {p}"))
        .collect();
    assert_eq!(
        paths,
        vec![
            "POST /sessions",
            "POST /sessions/s-1/stages",
            "PUT /sessions/s-1/stages/st-1",
            "POST /sessions/s-1/stages",
            "PUT /sessions/s-1/stages/st-2",
            "POST /sessions/s-1/logs",
            "POST /sessions/s-1/close",
        ]
    );
    assert_eq!(calls[0].2["project_name"], "app");
    assert_eq!(calls[1].2["name"], "analyzing");
    assert_eq!(calls[1].2["status"], "running");
    assert_eq!(calls[2].2["status"], "success");
    assert_eq!(calls[4].2["status"], "failed");
    assert_eq!(calls[5].2["level"], "error");
    assert_eq!(calls[5].2["stage_id"], "st-2");
    assert_eq!(calls[6].2["status"], "failed");
    assert_eq!(monitor.open_sessions(), 0);
}

#[tokio::test]
async fn unreachable_service_is_an_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = monitor(addr)
        .publish(&MonitorEvent::entered("r1", "app", PipelineState::Analyzing))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn abandoned_close_does_not_leak_the_session() {
    let calls = Calls::default();
    let app = Router::new()
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/:session/stages", post(add_stage))
        .route(
            "/api/sessions/:session/close",
            post(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Json(json!({}))
            }),
        )
        .with_state(calls);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let monitor = monitor(addr);

    monitor
        .publish(&MonitorEvent::entered("r1", "app", PipelineState::Analyzing))
        .await
        .unwrap();
    assert_eq!(monitor.open_sessions(), 1);

    let terminal = MonitorEvent::terminal("r1", "app", TerminalState::Succeeded);
    let timed_out = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        monitor.publish(&terminal),
    )
    .await;
    assert!(timed_out.is_err());
    assert_eq!(monitor.open_sessions(), 0);
}
