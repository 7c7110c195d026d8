//! Capability traits for the external collaborators of a run.
//!
//! Every adapter is shared across concurrent runs behind an `Arc`, so all
//! implementations must be `Send + Sync` and keep no per-run state that
//! another run could observe. Adapters report failures as [`AdapterError`];
//! retry and rollback decisions belong to the orchestrator.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{
    AdapterError, BuildId, BuildStatus, ChangePlan, ChangeTarget, ChannelKind, CodeChangeResult,
};
use crate::monitor::MonitorEvent;
use crate::notify::NotificationPayload;

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Turns a requirement document into a change plan.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// An empty plan must be reported as `AnalysisRejected`.
    async fn analyze(&self, document: &str) -> AdapterResult<ChangePlan>;
}

/// Applies a plan to a repository and can undo a pushed result.
#[async_trait]
pub trait CodeChanger: Send + Sync {
    async fn apply(
        &self,
        plan: &ChangePlan,
        target: &ChangeTarget,
    ) -> AdapterResult<CodeChangeResult>;

    /// Remove the effect of `result` from the remote. Reverting something
    /// that is already gone succeeds.
    async fn revert(&self, result: &CodeChangeResult, target: &ChangeTarget)
        -> AdapterResult<()>;

    /// Drop local state kept for `target` across retries. Called once when
    /// the code-change stage is over, whatever its outcome.
    async fn release(&self, _target: &ChangeTarget) -> AdapterResult<()> {
        Ok(())
    }
}

/// Triggers and inspects CI builds. Stateless between calls.
#[async_trait]
pub trait CiAdapter: Send + Sync {
    async fn trigger(
        &self,
        job: &str,
        git_ref: &str,
        params: &BTreeMap<String, String>,
    ) -> AdapterResult<BuildId>;

    async fn poll(&self, id: &BuildId) -> AdapterResult<BuildStatus>;

    /// Tail of the build log, if the CI system exposes one.
    async fn log_excerpt(&self, _id: &BuildId) -> AdapterResult<Option<String>> {
        Ok(None)
    }

    /// Best-effort stop of a running build.
    async fn abort(&self, _id: &BuildId) -> AdapterResult<()> {
        Ok(())
    }
}

/// Receives progress events. Failures never affect the run.
#[async_trait]
pub trait MonitorPublisher: Send + Sync {
    async fn publish(&self, event: &MonitorEvent) -> AdapterResult<()>;
}

/// One notification transport.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ChannelKind;

    async fn send(&self, payload: &NotificationPayload) -> AdapterResult<()>;
}

/// Body of a model reply with an optional Markdown code fence removed.
///
/// Handles ```` ```json ```` and bare ```` ``` ```` fences; text without a
/// fence is returned trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
