//! End-of-run notification fan-out.
//!
//! The [`Notifier`] sends one [`NotificationPayload`] to every configured
//! channel concurrently, each under its own timeout, and reports per-channel
//! delivery. A slow or failing channel never delays or suppresses another.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapters::NotifyChannel;
use crate::domain::{
    BuildId, ChannelDelivery, NotificationReport, StageError, StageOutcome, StageStatus,
    TerminalState,
};

/// Everything a channel needs to render a message about a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub run_id: String,
    pub project: String,
    pub environment: String,
    pub terminal: TerminalState,
    pub branch: Option<String>,
    pub build: Option<BuildId>,
    pub stages: Vec<StageOutcome>,
    pub errors: Vec<StageError>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn status_label(&self) -> &'static str {
        match self.terminal {
            TerminalState::Succeeded => "success",
            TerminalState::Failed => "failed",
            TerminalState::RolledBack => "rolled_back",
        }
    }

    /// Plain-text body: duration, per-stage lines, then the last error.
    pub fn details(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mut lines = vec![format!("Duration: {}m {}s", secs / 60, secs % 60)];
        for outcome in &self.stages {
            let status = match outcome.status {
                StageStatus::Succeeded => "ok",
                StageStatus::Partial => "partial",
                StageStatus::Failed => "failed",
            };
            lines.push(format!(
                "- {}: {} ({} attempt{})",
                outcome.stage,
                status,
                outcome.attempts,
                if outcome.attempts == 1 { "" } else { "s" }
            ));
        }
        if let Some(build) = &self.build {
            lines.push(format!("Build: {build}"));
        }
        if let Some(err) = self.errors.last() {
            lines.push(format!("Error: {err}"));
        }
        lines.join("\n")
    }

    /// Values available to `${name}` message templates.
    pub fn template_vars(&self) -> BTreeMap<&'static str, String> {
        let mut vars = BTreeMap::new();
        vars.insert("project_name", self.project.clone());
        vars.insert("environment", self.environment.clone());
        vars.insert("status", self.status_label().to_string());
        vars.insert(
            "version",
            self.branch.clone().unwrap_or_else(|| "unknown".to_string()),
        );
        vars.insert(
            "timestamp",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        );
        vars.insert("details", self.details());
        vars
    }
}

/// Sends a payload to all channels.
#[derive(Clone)]
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { channels }
    }

    /// A notifier with no channels; every notification trivially succeeds.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Attempt every channel exactly once. Deliveries are reported in
    /// channel order.
    pub async fn notify(
        &self,
        payload: &NotificationPayload,
        timeout: Duration,
    ) -> NotificationReport {
        let sends = self.channels.iter().map(|channel| async move {
            let result = tokio::time::timeout(timeout, channel.send(payload)).await;
            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {}ms", timeout.as_millis())),
            };
            match &error {
                None => info!(
                    event = "notify.delivered",
                    run_id = %payload.run_id,
                    channel = %channel.name(),
                ),
                Some(e) => warn!(
                    event = "notify.failed",
                    run_id = %payload.run_id,
                    channel = %channel.name(),
                    error = %e,
                ),
            }
            ChannelDelivery {
                channel: channel.name().to_string(),
                kind: channel.kind(),
                delivered: error.is_none(),
                error,
            }
        });

        NotificationReport {
            deliveries: join_all(sends).await,
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.channels.iter().map(|c| c.name()).collect();
        f.debug_struct("Notifier").field("channels", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelKind, Stage};
    use crate::fakes::FakeChannel;

    fn payload(terminal: TerminalState) -> NotificationPayload {
        NotificationPayload {
            run_id: "run-1".to_string(),
            project: "app".to_string(),
            environment: "staging".to_string(),
            terminal,
            branch: Some("auto-deploy/app-20260101000000".to_string()),
            build: None,
            stages: vec![StageOutcome {
                stage: Stage::Analyzing,
                status: StageStatus::Succeeded,
                attempts: 1,
                duration_ms: 10,
                error: None,
            }],
            errors: Vec::new(),
            duration_ms: 125_000,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn template_vars_cover_all_names() {
        let vars = payload(TerminalState::Succeeded).template_vars();
        for name in [
            "project_name",
            "environment",
            "status",
            "version",
            "timestamp",
            "details",
        ] {
            assert!(vars.contains_key(name), "missing {name}");
        }
        assert_eq!(vars["status"], "success");
        assert_eq!(vars["version"], "auto-deploy/app-20260101000000");
    }

    #[test]
    fn details_summarise_duration_and_stages() {
        let details = payload(TerminalState::Failed).details();
        assert!(details.starts_with("Duration: 2m 5s"));
        assert!(details.contains("- analyzing: ok (1 attempt)"));
    }

    #[test]
    fn missing_branch_is_unknown_version() {
        let mut p = payload(TerminalState::Failed);
        p.branch = None;
        assert_eq!(p.template_vars()["version"], "unknown");
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let ok = Arc::new(FakeChannel::new("slack", ChannelKind::Chat));
        let bad = Arc::new(FakeChannel::failing("email", ChannelKind::Email));
        let notifier = Notifier::new(vec![ok.clone() as Arc<dyn NotifyChannel>, bad.clone()]);

        let report = notifier
            .notify(&payload(TerminalState::Succeeded), Duration::from_secs(1))
            .await;

        assert_eq!(report.deliveries.len(), 2);
        assert!(report.deliveries[0].delivered);
        assert!(!report.deliveries[1].delivered);
        assert_eq!(report.status(), StageStatus::Partial);
        assert_eq!(ok.sent(), 1);
        assert_eq!(bad.sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_channel_times_out() {
        let slow = Arc::new(
            FakeChannel::new("wecom", ChannelKind::EnterpriseIm).with_delay(Duration::from_secs(60)),
        );
        let notifier = Notifier::new(vec![slow as Arc<dyn NotifyChannel>]);
        let report = notifier
            .notify(&payload(TerminalState::Failed), Duration::from_secs(5))
            .await;
        assert_eq!(report.status(), StageStatus::Failed);
        assert!(report.deliveries[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn empty_notifier_reports_success() {
        let report = Notifier::empty()
            .notify(&payload(TerminalState::Succeeded), Duration::from_secs(1))
            .await;
        assert!(report.deliveries.is_empty());
        assert_eq!(report.status(), StageStatus::Succeeded);
    }
}
