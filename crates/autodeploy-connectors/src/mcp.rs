//! Monitor publisher for an MCP session/stage/log REST service.
//!
//! Each run maps to one MCP session, opened by the run's first event and
//! closed by its terminal event. Stage entry creates an MCP stage; stage exit
//! updates it, and failure details are forwarded as error log lines.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use autodeploy_core::{
    AdapterError, AdapterResult, CredentialProvider, DeployError, ErrorKind, EventOutcome,
    McpSettings, MonitorEvent, MonitorPublisher, PipelineState, Secret, SecretKey,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::http;

#[derive(Debug, Clone, Default)]
struct Session {
    id: String,
    started: i64,
    stages: HashMap<PipelineState, String>,
}

pub struct McpMonitor {
    http: reqwest::Client,
    base: String,
    pipeline_name: String,
    api_key: Option<Secret>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl std::fmt::Debug for McpMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpMonitor")
            .field("base", &self.base)
            .field("pipeline_name", &self.pipeline_name)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct StageCreated {
    stage_id: String,
}

fn stage_status(outcome: EventOutcome) -> &'static str {
    match outcome {
        EventOutcome::Entered => "running",
        EventOutcome::Succeeded => "success",
        EventOutcome::Partial => "warning",
        EventOutcome::Failed => "failed",
    }
}

impl McpMonitor {
    pub fn new(
        settings: &McpSettings,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self, DeployError> {
        Ok(Self {
            http: http::client("mcp")?,
            base: settings.api_url.trim_end_matches('/').to_string(),
            pipeline_name: settings.pipeline_name.clone(),
            api_key: credentials.get(SecretKey::McpApiKey),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Number of runs with an open session.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Value,
    ) -> AdapterResult<Value> {
        let url = format!("{}{path}", self.base);
        let mut request = self.http.request(method, &url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose());
        }
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::internal(format!("mcp {path}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(http::status_error(
                status,
                &format!("mcp {path}"),
                ErrorKind::Internal,
                ErrorKind::Internal,
            ));
        }
        // Some endpoints answer with an empty body.
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::internal(format!("mcp {path}: {e}")))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| AdapterError::internal(format!("mcp {path}: malformed reply: {e}")))
    }

    fn session(&self, run_id: &str) -> AdapterResult<Option<Session>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| AdapterError::internal("mcp session table poisoned"))?;
        Ok(sessions.get(run_id).cloned())
    }

    fn store(&self, run_id: &str, session: Session) -> AdapterResult<()> {
        self.sessions
            .lock()
            .map_err(|_| AdapterError::internal("mcp session table poisoned"))?
            .insert(run_id.to_string(), session);
        Ok(())
    }

    fn forget(&self, run_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(run_id);
        }
    }

    async fn open(&self, event: &MonitorEvent) -> AdapterResult<Session> {
        if let Some(session) = self.session(&event.run_id)? {
            return Ok(session);
        }
        let started = event.timestamp.timestamp();
        let reply = self
            .call(
                reqwest::Method::POST,
                "/sessions",
                json!({
                    "project_name": event.project,
                    "pipeline_name": self.pipeline_name,
                    "description": format!("run {}", event.run_id),
                    "start_time": started,
                }),
            )
            .await?;
        let created: SessionCreated = serde_json::from_value(reply)
            .map_err(|e| AdapterError::internal(format!("mcp session reply: {e}")))?;
        info!(event = "mcp.session_opened", run_id = %event.run_id, session = %created.session_id);
        let session = Session {
            id: created.session_id,
            started,
            stages: HashMap::new(),
        };
        self.store(&event.run_id, session.clone())?;
        Ok(session)
    }

    async fn add_stage(
        &self,
        session: &mut Session,
        event: &MonitorEvent,
        status: &str,
    ) -> AdapterResult<String> {
        let reply = self
            .call(
                reqwest::Method::POST,
                &format!("/sessions/{}/stages", session.id),
                json!({
                    "name": event.state.to_string(),
                    "status": status,
                    "description": event.detail.clone().unwrap_or_default(),
                    "start_time": event.timestamp.timestamp(),
                }),
            )
            .await?;
        let created: StageCreated = serde_json::from_value(reply)
            .map_err(|e| AdapterError::internal(format!("mcp stage reply: {e}")))?;
        session.stages.insert(event.state, created.stage_id.clone());
        Ok(created.stage_id)
    }

    async fn finish_stage(
        &self,
        session: &mut Session,
        event: &MonitorEvent,
    ) -> AdapterResult<()> {
        let status = stage_status(event.outcome);
        let stage_id = match session.stages.get(&event.state) {
            Some(id) => id.clone(),
            // Entry was never recorded; create the stage in its final status.
            None => return self.add_stage(session, event, status).await.map(|_| ()),
        };
        self.call(
            reqwest::Method::PUT,
            &format!("/sessions/{}/stages/{stage_id}", session.id),
            json!({
                "status": status,
                "message": event.detail.clone().unwrap_or_default(),
                "end_time": event.timestamp.timestamp(),
            }),
        )
        .await?;

        if event.outcome == EventOutcome::Failed {
            if let Some(detail) = &event.detail {
                self.call(
                    reqwest::Method::POST,
                    &format!("/sessions/{}/logs", session.id),
                    json!({
                        "message": detail,
                        "level": "error",
                        "stage_id": stage_id,
                        "timestamp": event.timestamp.timestamp(),
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn close(&self, session: &Session, event: &MonitorEvent) -> AdapterResult<()> {
        let end = event.timestamp.timestamp().max(session.started);
        let status = if event.state == PipelineState::Succeeded {
            "success"
        } else {
            "failed"
        };
        self.call(
            reqwest::Method::POST,
            &format!("/sessions/{}/close", session.id),
            json!({
                "status": status,
                "summary": format!("run {} ended {}", event.run_id, event.state),
                "end_time": end,
                "duration": end - session.started,
            }),
        )
        .await?;
        info!(event = "mcp.session_closed", run_id = %event.run_id, session = %session.id);
        Ok(())
    }
}

#[async_trait]
impl MonitorPublisher for McpMonitor {
    async fn publish(&self, event: &MonitorEvent) -> AdapterResult<()> {
        let mut session = self.open(event).await?;

        if event.is_terminal() {
            // Forget first: the caller may drop this future mid-request.
            self.forget(&event.run_id);
            return self.close(&session, event).await;
        }

        debug!(run_id = %event.run_id, state = %event.state, outcome = ?event.outcome, "mcp event");
        let result = match event.outcome {
            EventOutcome::Entered => self
                .add_stage(&mut session, event, stage_status(event.outcome))
                .await
                .map(|_| ()),
            _ => self.finish_stage(&mut session, event).await,
        };
        self.store(&event.run_id, session)?;
        result
    }
}
