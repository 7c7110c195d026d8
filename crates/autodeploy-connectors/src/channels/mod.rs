//! Notification channel implementations and their construction from config.

mod chat;
mod email;
mod im;

use std::sync::Arc;

use autodeploy_core::{
    ChannelConfig, CredentialProvider, DeployError, Notifier, NotifyChannel, SecretKey,
};
use tracing::info;

pub use chat::ChatWebhook;
pub use email::{EmailChannel, EmailSettings};
pub use im::ImWebhook;

/// Build one channel from its configuration. Email needs the SMTP password.
pub fn build_channel(
    config: &ChannelConfig,
    credentials: &dyn CredentialProvider,
) -> Result<Arc<dyn NotifyChannel>, DeployError> {
    let channel: Arc<dyn NotifyChannel> = match config {
        ChannelConfig::Chat {
            name,
            webhook_url,
            template,
        } => Arc::new(ChatWebhook::new(name, webhook_url, template.clone())?),
        ChannelConfig::EnterpriseIm {
            name,
            webhook_url,
            template,
        } => Arc::new(ImWebhook::new(name, webhook_url, template.clone())?),
        ChannelConfig::Email {
            name,
            smtp_server,
            smtp_port,
            username,
            from,
            recipients,
            subject,
            template,
        } => {
            let password = credentials.require(SecretKey::SmtpPassword)?;
            let settings = EmailSettings {
                name: name.clone(),
                smtp_server: smtp_server.clone(),
                smtp_port: *smtp_port,
                username: username.clone(),
                from: from.clone(),
                recipients: recipients.clone(),
                subject: subject.clone(),
                template: template.clone(),
            };
            Arc::new(EmailChannel::new(settings, password)?)
        }
    };
    Ok(channel)
}

/// Notifier over every configured channel, in configuration order.
pub fn build_notifier(
    configs: &[ChannelConfig],
    credentials: &dyn CredentialProvider,
) -> Result<Notifier, DeployError> {
    let channels = configs
        .iter()
        .map(|config| build_channel(config, credentials))
        .collect::<Result<Vec<_>, _>>()?;
    info!(channels = channels.len(), "notification channels ready");
    Ok(Notifier::new(channels))
}
