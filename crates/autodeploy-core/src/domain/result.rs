//! Final, serializable record of a pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::build::BuildId;
use crate::domain::error::StageError;
use crate::domain::stage::{Stage, StageOutcome, StageStatus, TerminalState};

/// Notification channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Chat,
    Email,
    EnterpriseIm,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Email => "email",
            ChannelKind::EnterpriseIm => "enterprise_im",
        };
        f.write_str(name)
    }
}

/// Delivery result of one notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: String,
    pub kind: ChannelKind,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Outcome of the single end-of-run notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationReport {
    pub deliveries: Vec<ChannelDelivery>,
}

impl NotificationReport {
    pub fn delivered_count(&self) -> usize {
        self.deliveries.iter().filter(|d| d.delivered).count()
    }

    pub fn failed_count(&self) -> usize {
        self.deliveries.len() - self.delivered_count()
    }

    /// Stage status implied by this report. No channels counts as success.
    pub fn status(&self) -> StageStatus {
        let delivered = self.delivered_count();
        if delivered == self.deliveries.len() {
            StageStatus::Succeeded
        } else if delivered > 0 {
            StageStatus::Partial
        } else {
            StageStatus::Failed
        }
    }
}

/// Result of one deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub project: String,
    pub terminal: TerminalState,
    /// Outcomes in canonical stage order.
    pub stages: Vec<StageOutcome>,
    /// Every error observed during the run, including retried ones.
    pub errors: Vec<StageError>,
    pub notification: NotificationReport,
    pub branch: Option<String>,
    pub build: Option<BuildId>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn succeeded(&self) -> bool {
        self.terminal.is_success()
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|o| o.stage == stage)
    }

    /// Stages in recorded order.
    pub fn stage_names(&self) -> Vec<Stage> {
        self.stages.iter().map(|o| o.stage).collect()
    }

    /// First stage that did not succeed, if any.
    pub fn failed_stage(&self) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|o| o.status == StageStatus::Failed && o.stage != Stage::Notifying)
    }
}
