//! SMTP email with STARTTLS and an HTML body.

use async_trait::async_trait;
use autodeploy_core::{
    AdapterError, AdapterResult, ChannelKind, DeployError, ErrorKind, NotificationPayload,
    NotifyChannel, Secret,
};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::template::{html_escaped, render, EMAIL_SUBJECT, EMAIL_TEMPLATE};

/// Connection and addressing for one email channel.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub name: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub from: Option<String>,
    pub recipients: Vec<String>,
    pub subject: Option<String>,
    pub template: Option<String>,
}

pub struct EmailChannel {
    name: String,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    subject: String,
    template: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for EmailChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailChannel")
            .field("name", &self.name)
            .field("from", &self.from.to_string())
            .field("recipients", &self.recipients.len())
            .finish()
    }
}

fn mailbox(raw: &str) -> Result<Mailbox, DeployError> {
    raw.parse()
        .map_err(|e| DeployError::Config(format!("invalid email address {raw:?}: {e}")))
}

impl EmailChannel {
    pub fn new(settings: EmailSettings, password: Secret) -> Result<Self, DeployError> {
        if settings.recipients.is_empty() {
            return Err(DeployError::Config(format!(
                "email channel {} has no recipients",
                settings.name
            )));
        }
        let from = mailbox(settings.from.as_deref().unwrap_or(&settings.username))?;
        let recipients = settings
            .recipients
            .iter()
            .map(|r| mailbox(r))
            .collect::<Result<Vec<_>, _>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)
            .map_err(|e| DeployError::Adapter(format!("smtp {}: {e}", settings.smtp_server)))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.username.clone(),
                password.expose().to_string(),
            ))
            .build();

        Ok(Self {
            name: settings.name,
            from,
            recipients,
            subject: settings.subject.unwrap_or_else(|| EMAIL_SUBJECT.to_string()),
            template: settings
                .template
                .unwrap_or_else(|| EMAIL_TEMPLATE.to_string()),
            transport,
        })
    }

    fn failed(&self, message: impl std::fmt::Display) -> AdapterError {
        AdapterError::new(
            ErrorKind::NotificationFailed,
            format!("{}: {message}", self.name),
        )
    }

    /// The message that `send` would deliver.
    pub fn message(&self, payload: &NotificationPayload) -> AdapterResult<Message> {
        let vars = payload.template_vars();
        let subject = render(&self.subject, &vars);
        let body = render(&self.template, &html_escaped(&vars));

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        builder.body(body).map_err(|e| self.failed(e))
    }
}

#[async_trait]
impl NotifyChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, payload: &NotificationPayload) -> AdapterResult<()> {
        let message = self.message(payload)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| self.failed(e))?;
        debug!(channel = %self.name, code = %response.code(), "smtp accepted message");
        Ok(())
    }
}
