//! Slack-style incoming webhook.

use async_trait::async_trait;
use autodeploy_core::{
    AdapterError, AdapterResult, ChannelKind, DeployError, ErrorKind, NotificationPayload,
    NotifyChannel,
};
use serde_json::json;

use crate::http;
use crate::template::{render, CHAT_TEMPLATE};

#[derive(Debug)]
pub struct ChatWebhook {
    name: String,
    webhook_url: String,
    template: String,
    http: reqwest::Client,
}

impl ChatWebhook {
    pub fn new(
        name: impl Into<String>,
        webhook_url: impl Into<String>,
        template: Option<String>,
    ) -> Result<Self, DeployError> {
        Ok(Self {
            name: name.into(),
            webhook_url: webhook_url.into(),
            template: template.unwrap_or_else(|| CHAT_TEMPLATE.to_string()),
            http: http::client("chat webhook")?,
        })
    }

    pub fn message(&self, payload: &NotificationPayload) -> String {
        render(&self.template, &payload.template_vars())
    }
}

#[async_trait]
impl NotifyChannel for ChatWebhook {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Chat
    }

    async fn send(&self, payload: &NotificationPayload) -> AdapterResult<()> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&json!({ "text": self.message(payload) }))
            .send()
            .await
            .map_err(|e| {
                AdapterError::new(ErrorKind::NotificationFailed, format!("{}: {e}", self.name))
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(http::status_error(
                status,
                &self.name,
                ErrorKind::NotificationFailed,
                ErrorKind::NotificationFailed,
            ));
        }
        Ok(())
    }
}
