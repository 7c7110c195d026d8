//! Notification channels against fake webhooks, and email rendering.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use autodeploy_connectors::channels::{EmailChannel, EmailSettings};
use autodeploy_connectors::{build_notifier, ChatWebhook, ImWebhook};
use autodeploy_core::{
    AdapterError, BuildId, ChannelConfig, ChannelKind, ErrorKind, NotificationPayload,
    NotifyChannel, Secret, SecretKey, Stage, StageError, StaticCredentials, TerminalState,
};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

type Bodies = Arc<Mutex<Vec<Value>>>;

async fn record(State(bodies): State<Bodies>, Json(body): Json<Value>) -> Json<Value> {
    bodies.lock().unwrap().push(body);
    Json(json!({"errcode": 0, "errmsg": "ok"}))
}

async fn refuse(State(bodies): State<Bodies>, Json(body): Json<Value>) -> Json<Value> {
    bodies.lock().unwrap().push(body);
    Json(json!({"errcode": 93000, "errmsg": "invalid webhook url"}))
}

async fn serve() -> (SocketAddr, Bodies) {
    let bodies = Bodies::default();
    let app = Router::new()
        .route("/hook", post(record))
        .route("/refuse", post(refuse))
        .with_state(bodies.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, bodies)
}

fn payload(terminal: TerminalState) -> NotificationPayload {
    NotificationPayload {
        run_id: "r1".to_string(),
        project: "app".to_string(),
        environment: "staging".to_string(),
        terminal,
        branch: Some("auto-deploy/app-20240102030405".to_string()),
        build: Some(BuildId::new("app-build#12")),
        stages: Vec::new(),
        errors: vec![StageError::from_adapter(
            Stage::CiBuilding,
            1,
            &AdapterError::new(ErrorKind::BuildFailed, "<tests> failed"),
        )],
        duration_ms: 125_000,
        timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
    }
}

#[tokio::test]
async fn chat_webhook_posts_rendered_text() {
    let (addr, bodies) = serve().await;
    let chat = ChatWebhook::new("slack", format!("http://{addr}/hook"), None).unwrap();

    chat.send(&payload(TerminalState::Succeeded)).await.unwrap();

    let bodies = bodies.lock().unwrap();
    let text = bodies[0]["text"].as_str().unwrap();
    assert!(text.contains("*Project*: app"));
    assert!(text.contains("*Status*: success"));
    assert!(text.contains("auto-deploy/app-20240102030405"));
    assert!(text.contains("Duration: 2m 5s"));
}

#[tokio::test]
async fn custom_template_overrides_default() {
    let (addr, bodies) = serve().await;
    let chat = ChatWebhook::new(
        "ops",
        format!("http://{addr}/hook"),
        Some("${project_name} -> ${status} ${unknown}".to_string()),
    )
    .unwrap();

    chat.send(&payload(TerminalState::RolledBack)).await.unwrap();
    assert_eq!(
        bodies.lock().unwrap()[0]["text"],
        "app -> rolled_back ${unknown}"
    );
}

#[tokio::test]
async fn im_webhook_requires_errcode_zero() {
    let (addr, bodies) = serve().await;
    let ok = ImWebhook::new("wecom", format!("http://{addr}/hook"), None).unwrap();
    ok.send(&payload(TerminalState::Failed)).await.unwrap();
    {
        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies[0]["msgtype"], "text");
        let content = bodies[0]["text"]["content"].as_str().unwrap();
        assert!(content.contains("Status: failed"));
    }

    let refused = ImWebhook::new("wecom", format!("http://{addr}/refuse"), None).unwrap();
    let err = refused
        .send(&payload(TerminalState::Failed))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotificationFailed);
    assert!(err.message.contains("93000"));
}

#[tokio::test]
async fn unreachable_webhook_fails_delivery() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let chat = ChatWebhook::new("slack", format!("http://{addr}/hook"), None).unwrap();
    let err = chat
        .send(&payload(TerminalState::Succeeded))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotificationFailed);
}

fn email_settings() -> EmailSettings {
    EmailSettings {
        name: "email".to_string(),
        smtp_server: "smtp.example.com".to_string(),
        smtp_port: 587,
        username: "deploy@example.com".to_string(),
        from: None,
        recipients: vec!["ops@example.com".to_string(), "dev@example.com".to_string()],
        subject: None,
        template: None,
    }
}

#[test]
fn email_renders_html_with_escaped_details() {
    let channel = EmailChannel::new(email_settings(), Secret::new("pw")).unwrap();
    assert_eq!(channel.kind(), ChannelKind::Email);

    let message = channel.message(&payload(TerminalState::Failed)).unwrap();
    let raw = String::from_utf8(message.formatted()).unwrap();
    assert!(raw.contains("Subject: Deployment failed: app"));
    assert!(raw.contains("To: ops@example.com, dev@example.com"));
    assert!(raw.contains("text/html"));
    assert!(raw.contains("&lt;tests&gt; failed"));
}

#[test]
fn email_without_recipients_is_a_config_error() {
    let settings = EmailSettings {
        recipients: Vec::new(),
        ..email_settings()
    };
    assert!(EmailChannel::new(settings, Secret::new("pw")).is_err());

    let settings = EmailSettings {
        recipients: vec!["not an address".to_string()],
        ..email_settings()
    };
    assert!(EmailChannel::new(settings, Secret::new("pw")).is_err());
}

#[test]
fn notifier_is_built_in_config_order() {
    let configs = vec![
        ChannelConfig::Chat {
            name: "slack".to_string(),
            webhook_url: "http://127.0.0.1:9/hook".to_string(),
            template: None,
        },
        ChannelConfig::EnterpriseIm {
            name: "wecom".to_string(),
            webhook_url: "http://127.0.0.1:9/hook".to_string(),
            template: None,
        },
    ];
    let notifier = build_notifier(&configs, &StaticCredentials::new()).unwrap();
    assert_eq!(notifier.len(), 2);
}

#[test]
fn email_channel_needs_smtp_password() {
    let config = ChannelConfig::Email {
        name: "email".to_string(),
        smtp_server: "smtp.example.com".to_string(),
        smtp_port: 587,
        username: "deploy@example.com".to_string(),
        from: None,
        recipients: vec!["ops@example.com".to_string()],
        subject: None,
        template: None,
    };
    let err = build_notifier(std::slice::from_ref(&config), &StaticCredentials::new()).unwrap_err();
    assert!(err.to_string().contains("AUTODEPLOY_SMTP_PASSWORD"));

    let creds = StaticCredentials::new().with(SecretKey::SmtpPassword, "pw");
    assert_eq!(build_notifier(&[config], &creds).unwrap().len(), 1);
}
