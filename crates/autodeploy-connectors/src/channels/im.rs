//! WeCom-style group robot webhook. Delivery requires `errcode == 0`.

use async_trait::async_trait;
use autodeploy_core::{
    AdapterError, AdapterResult, ChannelKind, DeployError, ErrorKind, NotificationPayload,
    NotifyChannel,
};
use serde::Deserialize;
use serde_json::json;

use crate::http;
use crate::template::{render, IM_TEMPLATE};

#[derive(Debug)]
pub struct ImWebhook {
    name: String,
    webhook_url: String,
    template: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RobotReply {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl ImWebhook {
    pub fn new(
        name: impl Into<String>,
        webhook_url: impl Into<String>,
        template: Option<String>,
    ) -> Result<Self, DeployError> {
        Ok(Self {
            name: name.into(),
            webhook_url: webhook_url.into(),
            template: template.unwrap_or_else(|| IM_TEMPLATE.to_string()),
            http: http::client("im webhook")?,
        })
    }

    fn failed(&self, message: impl std::fmt::Display) -> AdapterError {
        AdapterError::new(
            ErrorKind::NotificationFailed,
            format!("{}: {message}", self.name),
        )
    }
}

#[async_trait]
impl NotifyChannel for ImWebhook {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::EnterpriseIm
    }

    async fn send(&self, payload: &NotificationPayload) -> AdapterResult<()> {
        let body = json!({
            "msgtype": "text",
            "text": { "content": render(&self.template, &payload.template_vars()) },
        });
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failed(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(http::status_error(
                status,
                &self.name,
                ErrorKind::NotificationFailed,
                ErrorKind::NotificationFailed,
            ));
        }
        let reply: RobotReply = response
            .json()
            .await
            .map_err(|e| self.failed(format!("malformed reply: {e}")))?;
        if reply.errcode != 0 {
            return Err(self.failed(format!("errcode {} {}", reply.errcode, reply.errmsg)));
        }
        Ok(())
    }
}
