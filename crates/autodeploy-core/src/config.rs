//! Configuration for the pipeline and its adapters.
//!
//! Loaded once from a TOML file (every field has a default), then overridden
//! from the environment for endpoints. The resulting [`DeployConfig`] is
//! read-only: adapters receive their section at construction time and the
//! orchestrator receives a [`PipelineConfig`] derived from it.
//!
//! Credentials are deliberately absent; see [`crate::credentials`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DeployError, Result, Stage};
use crate::retry::{Backoff, RetryPolicy, StagePolicy};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub pipeline: PipelineSettings,
    pub stages: StagesSettings,
    pub ci: PollSettings,
    pub dify: DifySettings,
    pub llm: LlmSettings,
    pub git: GitSettings,
    pub jenkins: JenkinsSettings,
    pub mcp: McpSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub auto_rollback: bool,
    /// Environment label used in notifications.
    pub environment: String,
    /// Where finished runs are archived; `None` disables archiving.
    pub archive_dir: Option<PathBuf>,
    /// Upper bound for a single monitor publish.
    pub monitor_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            auto_rollback: true,
            environment: "development".to_string(),
            archive_dir: None,
            monitor_timeout_secs: 10,
        }
    }
}

/// Timeout and retry settings of one stage, as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl StageSettings {
    fn with(timeout_secs: u64, max_attempts: u32) -> Self {
        Self {
            timeout_secs,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn to_policy(&self) -> StagePolicy {
        StagePolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff: self.backoff,
                base_delay: Duration::from_millis(self.base_delay_ms),
                multiplier: self.multiplier,
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
        }
    }

    fn validate(&self, stage: &str) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(DeployError::Config(format!(
                "stages.{stage}.timeout_secs must be greater than zero"
            )));
        }
        if self.max_attempts == 0 {
            return Err(DeployError::Config(format!(
                "stages.{stage}.max_attempts must be at least 1"
            )));
        }
        if !(self.multiplier >= 1.0) {
            return Err(DeployError::Config(format!(
                "stages.{stage}.multiplier must be >= 1.0"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesSettings {
    pub analysis: StageSettings,
    pub code_change: StageSettings,
    /// Covers one trigger call; a failed build re-triggers up to `max_attempts`.
    pub ci: StageSettings,
    pub monitoring: StageSettings,
    pub rollback: StageSettings,
    pub notify: StageSettings,
}

impl Default for StagesSettings {
    fn default() -> Self {
        Self {
            analysis: StageSettings::with(120, 3),
            code_change: StageSettings::with(600, 2),
            ci: StageSettings::with(60, 2),
            monitoring: StageSettings::with(30, 1),
            rollback: StageSettings::with(120, 1),
            notify: StageSettings::with(30, 1),
        }
    }
}

/// CI poll loop budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub poll_interval_secs: u64,
    pub max_poll_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_poll_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DifySettings {
    pub api_url: String,
    pub user: String,
}

impl Default for DifySettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.dify.ai/v1".to_string(),
            user: "auto-deploy-system".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Cap on repository file content sent as context per change.
    pub max_context_bytes: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 2000,
            temperature: 0.2,
            max_context_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub default_branch: String,
    pub branch_prefix: String,
    /// Parent directory for working copies; defaults to the system temp dir.
    pub workspace_root: Option<PathBuf>,
    pub author_name: String,
    pub author_email: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            branch_prefix: "auto-deploy".to_string(),
            workspace_root: None,
            author_name: "autodeploy".to_string(),
            author_email: "autodeploy@localhost".to_string(),
        }
    }
}

impl GitSettings {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("autodeploy"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsSettings {
    pub url: String,
}

impl Default for JenkinsSettings {
    fn default() -> Self {
        Self {
            url: "https://jenkins.example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    pub api_url: String,
    pub pipeline_name: String,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            api_url: "https://mcp.example.com/api".to_string(),
            pipeline_name: "auto-deploy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub channels: Vec<ChannelConfig>,
}

/// One configured notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Chat {
        #[serde(default = "default_chat_name")]
        name: String,
        webhook_url: String,
        #[serde(default)]
        template: Option<String>,
    },
    Email {
        #[serde(default = "default_email_name")]
        name: String,
        smtp_server: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        username: String,
        #[serde(default)]
        from: Option<String>,
        recipients: Vec<String>,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        template: Option<String>,
    },
    EnterpriseIm {
        #[serde(default = "default_im_name")]
        name: String,
        webhook_url: String,
        #[serde(default)]
        template: Option<String>,
    },
}

fn default_chat_name() -> String {
    "slack".to_string()
}

fn default_email_name() -> String {
    "email".to_string()
}

fn default_im_name() -> String {
    "wecom".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

impl ChannelConfig {
    pub fn name(&self) -> &str {
        match self {
            ChannelConfig::Chat { name, .. }
            | ChannelConfig::Email { name, .. }
            | ChannelConfig::EnterpriseIm { name, .. } => name,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            ChannelConfig::Chat { webhook_url, .. }
            | ChannelConfig::EnterpriseIm { webhook_url, .. } => {
                if webhook_url.trim().is_empty() {
                    return Err(DeployError::Config(format!(
                        "channel '{}' has an empty webhook_url",
                        self.name()
                    )));
                }
            }
            ChannelConfig::Email {
                smtp_server,
                username,
                recipients,
                ..
            } => {
                if smtp_server.trim().is_empty() || username.trim().is_empty() {
                    return Err(DeployError::Config(format!(
                        "channel '{}' needs smtp_server and username",
                        self.name()
                    )));
                }
                if recipients.is_empty() {
                    return Err(DeployError::Config(format!(
                        "channel '{}' has no recipients",
                        self.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl DeployConfig {
    /// Load from `path` (defaults when `None`), apply environment overrides
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    DeployError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DeployError::Config(e.to_string()))
    }

    /// Override endpoints from `lookup` (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AUTODEPLOY_DIFY_URL") {
            self.dify.api_url = v;
        }
        if let Some(v) = lookup("AUTODEPLOY_LLM_URL") {
            self.llm.api_url = v;
        }
        if let Some(v) = lookup("AUTODEPLOY_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("AUTODEPLOY_JENKINS_URL") {
            self.jenkins.url = v;
        }
        if let Some(v) = lookup("AUTODEPLOY_MCP_URL") {
            self.mcp.api_url = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.stages;
        s.analysis.validate("analysis")?;
        s.code_change.validate("code_change")?;
        s.ci.validate("ci")?;
        s.monitoring.validate("monitoring")?;
        s.rollback.validate("rollback")?;
        s.notify.validate("notify")?;
        if self.pipeline.monitor_timeout_secs == 0 {
            return Err(DeployError::Config(
                "pipeline.monitor_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.pipeline_config().validate()?;
        for channel in &self.notify.channels {
            channel.validate()?;
        }
        Ok(())
    }

    /// Orchestrator view of this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let s = &self.stages;
        PipelineConfig {
            auto_rollback: self.pipeline.auto_rollback,
            environment: self.pipeline.environment.clone(),
            archive_dir: self.pipeline.archive_dir.clone(),
            analysis: s.analysis.to_policy(),
            code_change: s.code_change.to_policy(),
            ci: s.ci.to_policy(),
            monitoring: s.monitoring.to_policy(),
            rollback: s.rollback.to_policy(),
            notify: s.notify.to_policy(),
            poll_interval: Duration::from_secs(self.ci.poll_interval_secs),
            max_poll_duration: Duration::from_secs(self.ci.max_poll_secs),
            monitor_timeout: Duration::from_secs(self.pipeline.monitor_timeout_secs),
        }
    }
}

/// Settings the orchestrator needs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub auto_rollback: bool,
    pub environment: String,
    pub archive_dir: Option<PathBuf>,
    pub analysis: StagePolicy,
    pub code_change: StagePolicy,
    pub ci: StagePolicy,
    pub monitoring: StagePolicy,
    pub rollback: StagePolicy,
    pub notify: StagePolicy,
    pub poll_interval: Duration,
    pub max_poll_duration: Duration,
    pub monitor_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        DeployConfig::default().pipeline_config()
    }
}

impl PipelineConfig {
    /// Zero-delay policies with `max_attempts` each and short timeouts.
    pub fn immediate(max_attempts: u32) -> Self {
        let policy = StagePolicy::new(Duration::from_secs(5), RetryPolicy::immediate(max_attempts));
        Self {
            auto_rollback: true,
            environment: "test".to_string(),
            archive_dir: None,
            analysis: policy.clone(),
            code_change: policy.clone(),
            ci: policy.clone(),
            monitoring: StagePolicy::new(Duration::from_secs(5), RetryPolicy::no_retry()),
            rollback: StagePolicy::new(Duration::from_secs(5), RetryPolicy::no_retry()),
            notify: StagePolicy::new(Duration::from_secs(5), RetryPolicy::no_retry()),
            poll_interval: Duration::from_millis(1),
            max_poll_duration: Duration::from_secs(5),
            monitor_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback = enabled;
        self
    }

    pub fn policy(&self, stage: Stage) -> &StagePolicy {
        match stage {
            Stage::Analyzing => &self.analysis,
            Stage::CodeChanging => &self.code_change,
            Stage::CiBuilding => &self.ci,
            Stage::Monitoring => &self.monitoring,
            Stage::Rollback => &self.rollback,
            Stage::Notifying => &self.notify,
        }
    }

    /// Every adapter call must be bounded.
    pub fn validate(&self) -> Result<()> {
        let stages = [
            Stage::Analyzing,
            Stage::CodeChanging,
            Stage::CiBuilding,
            Stage::Monitoring,
            Stage::Rollback,
            Stage::Notifying,
        ];
        for stage in stages {
            let policy = self.policy(stage);
            if policy.timeout.is_zero() {
                return Err(DeployError::Config(format!(
                    "stage {stage} has no timeout"
                )));
            }
            if policy.retry.max_attempts == 0 {
                return Err(DeployError::Config(format!(
                    "stage {stage} allows zero attempts"
                )));
            }
        }
        if self.poll_interval.is_zero() || self.max_poll_duration.is_zero() {
            return Err(DeployError::Config(
                "CI poll interval and max poll duration must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval > self.max_poll_duration {
            return Err(DeployError::Config(
                "CI poll interval exceeds max poll duration".to_string(),
            ));
        }
        if self.monitor_timeout.is_zero() {
            return Err(DeployError::Config(
                "monitor publish timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
