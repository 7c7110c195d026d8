//! Pipeline orchestrator.
//!
//! [`Orchestrator::run`] drives one [`DeploymentRequest`] through
//! analysis, code change, CI build, build report and notification. It owns
//! every retry, rollback and abort decision; adapters only report
//! [`AdapterError`]s.
//!
//! All per-run state lives in a private `PipelineRun`, so one orchestrator
//! can serve any number of concurrent runs.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{AdapterResult, Analyzer, CiAdapter, CodeChanger, MonitorPublisher};
use crate::archive::write_run_archive;
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::domain::{
    AdapterError, BuildId, BuildState, ChangePlan, ChangeTarget, CodeChangeResult, DeployError,
    DeploymentRequest, ErrorKind, NotificationReport, PipelineResult, PipelineState, PushStatus,
    Result, Stage, StageError, StageOutcome, StageStatus, TerminalState,
};
use crate::metrics::METRICS;
use crate::monitor::MonitorEvent;
use crate::notify::{NotificationPayload, Notifier};
use crate::obs;

/// Characters of build log attached to a `BuildFailed` error.
const LOG_TAIL_CHARS: usize = 1000;

/// Drives deployment requests through the pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    config: PipelineConfig,
    analyzer: Arc<dyn Analyzer>,
    code_changer: Arc<dyn CodeChanger>,
    ci: Option<Arc<dyn CiAdapter>>,
    monitor: Option<Arc<dyn MonitorPublisher>>,
    notifier: Notifier,
}

impl Orchestrator {
    /// Fails when `config` leaves any adapter call unbounded.
    pub fn new(
        config: PipelineConfig,
        analyzer: Arc<dyn Analyzer>,
        code_changer: Arc<dyn CodeChanger>,
        notifier: Notifier,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            analyzer,
            code_changer,
            ci: None,
            monitor: None,
            notifier,
        })
    }

    pub fn with_ci(mut self, ci: Arc<dyn CiAdapter>) -> Self {
        self.ci = Some(ci);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MonitorPublisher>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `request` to a terminal state.
    ///
    /// Returns `Err` only for input the pipeline cannot start with
    /// ([`DeployError::InvalidRequest`]) or an internal state machine
    /// violation. Every other failure is reported inside the result.
    pub async fn run(&self, request: &DeploymentRequest) -> Result<PipelineResult> {
        self.run_with_cancel(request, &CancelToken::new()).await
    }

    /// Like [`run`](Self::run), observing `cancel` between stages and poll
    /// ticks.
    pub async fn run_with_cancel(
        &self,
        request: &DeploymentRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineResult> {
        request.validate()?;
        if request.ci_job.is_some() && self.ci.is_none() {
            return Err(DeployError::InvalidRequest(
                "a CI job was requested but no CI adapter is configured".to_string(),
            ));
        }

        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        let mut run = PipelineRun::new(self, request, cancel, run_id);

        async move {
            METRICS.inc_runs_started();
            obs::emit_run_started(&run.run_id, &request.project, request.ci_job.as_deref());

            let terminal = run.drive().await?;
            run.notify(terminal).await?;
            let result = run.into_result(terminal);

            METRICS.record_terminal(terminal);
            obs::emit_run_finished(
                &result.run_id,
                terminal,
                result.duration_ms,
                result.errors.len(),
            );
            if let Some(dir) = &self.config.archive_dir {
                match write_run_archive(&result, dir) {
                    Ok(path) => info!(event = "run.archived", path = %path.display()),
                    Err(e) => warn!(event = "run.archive_failed", error = %e),
                }
            }
            Ok::<_, DeployError>(result)
        }
        .instrument(span)
        .await
    }
}

/// Mutable state of one run.
struct PipelineRun<'a> {
    orch: &'a Orchestrator,
    request: &'a DeploymentRequest,
    cancel: &'a CancelToken,
    run_id: String,
    state: PipelineState,
    started_at: DateTime<Utc>,
    clock: Instant,
    outcomes: Vec<StageOutcome>,
    errors: Vec<StageError>,
    notification: NotificationReport,
    branch: Option<String>,
    build: Option<BuildId>,
}

impl<'a> PipelineRun<'a> {
    fn new(
        orch: &'a Orchestrator,
        request: &'a DeploymentRequest,
        cancel: &'a CancelToken,
        run_id: String,
    ) -> Self {
        Self {
            orch,
            request,
            cancel,
            run_id,
            state: PipelineState::Created,
            started_at: Utc::now(),
            clock: Instant::now(),
            outcomes: Vec::new(),
            errors: Vec::new(),
            notification: NotificationReport::default(),
            branch: None,
            build: None,
        }
    }

    /// Run every stage up to (not including) notification and decide the
    /// terminal state.
    async fn drive(&mut self) -> Result<TerminalState> {
        let orch = self.orch;
        let request = self.request;

        let analyzer = orch.analyzer.as_ref();
        let document = request.document.as_str();
        let plan = match self
            .execute(
                Stage::Analyzing,
                true,
                move |_| analyzer.analyze(document),
                |plan: &ChangePlan| Some(format!("{} change(s): {}", plan.len(), plan.summary)),
            )
            .await?
        {
            Ok(plan) => plan,
            Err(_) => return Ok(TerminalState::Failed),
        };

        let target = ChangeTarget {
            project: request.project.clone(),
            repo_url: request.repo_url.clone(),
            started_at: self.started_at,
        };
        let changer = orch.code_changer.as_ref();
        let (plan_ref, target_ref) = (&plan, &target);
        let change = self
            .execute(
                Stage::CodeChanging,
                true,
                move |_| changer.apply(plan_ref, target_ref),
                |change: &CodeChangeResult| {
                    Some(format!(
                        "{} commit(s) on {}",
                        change.commits.len(),
                        change.branch
                    ))
                },
            )
            .await?;
        self.release_working_copy(&target).await;
        let change = match change {
            Ok(change) => change,
            Err(_) => return Ok(TerminalState::Failed),
        };
        self.branch = Some(change.branch.clone());

        let (Some(job), Some(ci)) = (request.ci_job.as_deref(), orch.ci.as_deref()) else {
            return Ok(TerminalState::Succeeded);
        };

        let mut params = plan.ci_parameters.clone();
        params
            .entry("BRANCH".to_string())
            .or_insert_with(|| change.branch.clone());
        let run_id = self.run_id.clone();
        let last_build = Mutex::new(None);
        let ctx = BuildContext {
            run_id: &run_id,
            job,
            git_ref: &change.branch,
            params: &params,
            call_timeout: orch.config.ci.timeout,
            poll_interval: orch.config.poll_interval,
            max_poll: orch.config.max_poll_duration,
            cancel: self.cancel,
            last_build: &last_build,
        };
        let ctx_ref = &ctx;
        let built = self
            .execute(
                Stage::CiBuilding,
                false,
                move |_| run_build(ci, ctx_ref),
                |id: &BuildId| Some(format!("build {id} succeeded")),
            )
            .await?;
        drop(ctx);
        self.build = last_build
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        let build_id = match built {
            Ok(id) => id,
            Err(err) if err.kind == ErrorKind::BuildFailed => {
                return self.rollback(&change, &target).await
            }
            Err(_) => return Ok(TerminalState::Failed),
        };

        if !request.monitoring {
            return Ok(TerminalState::Succeeded);
        }

        let call_timeout = orch.config.ci.timeout;
        let id_ref = &build_id;
        let confirmed = self
            .execute(
                Stage::Monitoring,
                true,
                move |_| confirm_build(ci, id_ref, call_timeout),
                |report: &String| Some(report.clone()),
            )
            .await?;
        match confirmed {
            Ok(_) => Ok(TerminalState::Succeeded),
            Err(err) if err.kind == ErrorKind::BuildFailed => self.rollback(&change, &target).await,
            Err(_) => Ok(TerminalState::Failed),
        }
    }

    /// Run one stage with its timeout and retry policy and record the
    /// outcome. The outer `Result` only carries state machine violations.
    async fn execute<T, F, Fut, D>(
        &mut self,
        stage: Stage,
        bounded: bool,
        mut op: F,
        describe: D,
    ) -> Result<std::result::Result<T, StageError>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
        D: Fn(&T) -> Option<String>,
    {
        if let Some(err) = self.cancelled(stage, 0) {
            return Ok(Err(err));
        }
        self.enter_stage(stage).await?;

        let policy = self.orch.config.policy(stage).clone();
        let started = Instant::now();
        let mut attempt = 0;
        let mut failed_kinds: Vec<ErrorKind> = Vec::new();
        let outcome = loop {
            attempt += 1;
            obs::emit_stage_entered(&self.run_id, stage, attempt);

            let result = if bounded {
                match tokio::time::timeout(policy.timeout, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::new(
                        ErrorKind::Timeout,
                        format!("{stage} did not finish within {:?}", policy.timeout),
                    )),
                }
            } else {
                op(attempt).await
            };

            match result {
                Ok(value) => break Ok(value),
                Err(e) => {
                    let err = StageError::from_adapter(stage, attempt, &e);
                    self.errors.push(err.clone());
                    failed_kinds.push(e.kind);
                    let same_kind = failed_kinds.iter().filter(|k| **k == e.kind).count() as u32;
                    if !policy.retry.should_retry(e.kind, attempt, same_kind) {
                        break Err(err);
                    }
                    if let Some(cancelled) = self.cancelled(stage, attempt) {
                        break Err(cancelled);
                    }
                    let delay = policy.retry.delay_after(attempt);
                    METRICS.inc_stage_retries();
                    obs::emit_retry_scheduled(&self.run_id, &err, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match outcome {
            Ok(value) => {
                let detail = describe(&value);
                self.finish_stage(stage, StageStatus::Succeeded, attempt, started, None, detail)
                    .await;
                Ok(Ok(value))
            }
            Err(err) => {
                self.finish_stage(
                    stage,
                    StageStatus::Failed,
                    attempt,
                    started,
                    Some(err.clone()),
                    None,
                )
                .await;
                Ok(Err(err))
            }
        }
    }

    /// Best-effort cleanup of the code changer's local state for this run.
    async fn release_working_copy(&self, target: &ChangeTarget) {
        let timeout = self.orch.config.code_change.timeout;
        let changer = self.orch.code_changer.as_ref();
        match tokio::time::timeout(timeout, changer.release(target)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(event = "vcs.release_failed", run_id = %self.run_id, error = %e),
            Err(_) => warn!(
                event = "vcs.release_failed",
                run_id = %self.run_id,
                error = "release timed out",
            ),
        }
    }

    /// Revert the pushed change once. No retry.
    async fn rollback(
        &mut self,
        change: &CodeChangeResult,
        target: &ChangeTarget,
    ) -> Result<TerminalState> {
        if !self.orch.config.auto_rollback || change.push != PushStatus::Pushed {
            return Ok(TerminalState::Failed);
        }

        self.enter_stage(Stage::Rollback).await?;
        obs::emit_stage_entered(&self.run_id, Stage::Rollback, 1);
        let started = Instant::now();
        let timeout = self.orch.config.rollback.timeout;
        let changer = self.orch.code_changer.as_ref();
        let result = match tokio::time::timeout(timeout, changer.revert(change, target)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::new(
                ErrorKind::Timeout,
                format!("revert did not finish within {timeout:?}"),
            )),
        };

        match result {
            Ok(()) => {
                info!(event = "rollback.completed", branch = %change.branch);
                self.finish_stage(
                    Stage::Rollback,
                    StageStatus::Succeeded,
                    1,
                    started,
                    None,
                    Some(format!("reverted {}", change.branch)),
                )
                .await;
                Ok(TerminalState::RolledBack)
            }
            Err(e) => {
                let err = StageError {
                    stage: Stage::Rollback,
                    kind: ErrorKind::RollbackFailed,
                    message: format!("reverting {} failed: {e}", change.branch),
                    attempt: 1,
                };
                self.errors.push(err.clone());
                self.finish_stage(Stage::Rollback, StageStatus::Failed, 1, started, Some(err), None)
                    .await;
                Ok(TerminalState::Failed)
            }
        }
    }

    /// Send the single end-of-run notification, then enter `terminal`.
    async fn notify(&mut self, terminal: TerminalState) -> Result<()> {
        self.enter_stage(Stage::Notifying).await?;
        obs::emit_stage_entered(&self.run_id, Stage::Notifying, 1);
        let started = Instant::now();

        let payload = NotificationPayload {
            run_id: self.run_id.clone(),
            project: self.request.project.clone(),
            environment: self.orch.config.environment.clone(),
            terminal,
            branch: self.branch.clone(),
            build: self.build.clone(),
            stages: self.outcomes.clone(),
            errors: self.errors.clone(),
            duration_ms: self.clock.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };
        let report = self
            .orch
            .notifier
            .notify(&payload, self.orch.config.notify.timeout)
            .await;

        let status = report.status();
        let error = (status == StageStatus::Failed).then(|| StageError {
            stage: Stage::Notifying,
            kind: ErrorKind::NotificationFailed,
            message: format!("none of {} channel(s) delivered", report.deliveries.len()),
            attempt: 1,
        });
        if let Some(err) = &error {
            self.errors.push(err.clone());
        }
        let detail = Some(format!(
            "{}/{} channel(s) delivered",
            report.delivered_count(),
            report.deliveries.len()
        ));
        self.notification = report;
        self.finish_stage(Stage::Notifying, status, 1, started, error, detail)
            .await;

        self.transition(terminal.state())?;
        self.publish(MonitorEvent::terminal(
            &self.run_id,
            &self.request.project,
            terminal,
        ))
        .await;
        Ok(())
    }

    fn into_result(self, terminal: TerminalState) -> PipelineResult {
        PipelineResult {
            run_id: self.run_id,
            project: self.request.project.clone(),
            terminal,
            stages: self.outcomes,
            errors: self.errors,
            notification: self.notification,
            branch: self.branch,
            build: self.build,
            started_at: self.started_at,
            duration_ms: self.clock.elapsed().as_millis() as u64,
        }
    }

    fn transition(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    /// Record a `Cancelled` error if the token has fired.
    fn cancelled(&mut self, stage: Stage, attempt: u32) -> Option<StageError> {
        if !self.cancel.is_cancelled() {
            return None;
        }
        let err = StageError {
            stage,
            kind: ErrorKind::Cancelled,
            message: format!("run cancelled at {stage}"),
            attempt,
        };
        warn!(event = "run.cancelled", stage = %stage);
        self.errors.push(err.clone());
        Some(err)
    }

    async fn enter_stage(&mut self, stage: Stage) -> Result<()> {
        self.transition(stage.state())?;
        self.publish(MonitorEvent::entered(
            &self.run_id,
            &self.request.project,
            stage.state(),
        ))
        .await;
        Ok(())
    }

    async fn finish_stage(
        &mut self,
        stage: Stage,
        status: StageStatus,
        attempts: u32,
        started: Instant,
        error: Option<StageError>,
        detail: Option<String>,
    ) {
        obs::emit_stage_finished(&self.run_id, stage, status, attempts);
        let detail = error.as_ref().map(ToString::to_string).or(detail);
        self.outcomes.push(StageOutcome {
            stage,
            status,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        });
        self.publish(MonitorEvent::finished(
            &self.run_id,
            &self.request.project,
            stage.state(),
            status,
            detail,
        ))
        .await;
    }

    /// Best-effort, bounded delivery of a monitor event.
    async fn publish(&self, event: MonitorEvent) {
        if !self.request.monitoring {
            return;
        }
        let Some(monitor) = &self.orch.monitor else {
            return;
        };
        match tokio::time::timeout(self.orch.config.monitor_timeout, monitor.publish(&event)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                METRICS.inc_monitor_dropped();
                obs::emit_monitor_dropped(&self.run_id, &e);
            }
            Err(_) => {
                METRICS.inc_monitor_dropped();
                obs::emit_monitor_dropped(&self.run_id, &"publish timed out");
            }
        }
    }
}

/// Inputs of one CI attempt.
struct BuildContext<'a> {
    run_id: &'a str,
    job: &'a str,
    git_ref: &'a str,
    params: &'a BTreeMap<String, String>,
    call_timeout: Duration,
    poll_interval: Duration,
    max_poll: Duration,
    cancel: &'a CancelToken,
    last_build: &'a Mutex<Option<BuildId>>,
}

impl BuildContext<'_> {
    fn record(&self, id: &BuildId) {
        if let Ok(mut slot) = self.last_build.lock() {
            *slot = Some(id.clone());
        }
    }
}

/// Trigger a build and poll it to a terminal state within the poll budget.
async fn run_build(ci: &dyn CiAdapter, ctx: &BuildContext<'_>) -> AdapterResult<BuildId> {
    let mut id = match tokio::time::timeout(
        ctx.call_timeout,
        ci.trigger(ctx.job, ctx.git_ref, ctx.params),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(AdapterError::new(
                ErrorKind::Timeout,
                format!(
                    "triggering {} did not finish within {:?}",
                    ctx.job, ctx.call_timeout
                ),
            ))
        }
    };
    ctx.record(&id);
    info!(event = "ci.triggered", run_id = %ctx.run_id, job = %ctx.job, build = %id);

    let deadline = Instant::now() + ctx.max_poll;
    loop {
        if ctx.cancel.is_cancelled() {
            abort_build(ci, &id, ctx.call_timeout).await;
            return Err(AdapterError::new(
                ErrorKind::Cancelled,
                format!("run cancelled while waiting for build {id}"),
            ));
        }
        if Instant::now() >= deadline {
            abort_build(ci, &id, ctx.call_timeout).await;
            return Err(AdapterError::new(
                ErrorKind::BuildTimedOut,
                format!("build {id} not finished after {:?}", ctx.max_poll),
            ));
        }

        match tokio::time::timeout(ctx.call_timeout, ci.poll(&id)).await {
            Ok(Ok(status)) => {
                if status.id != id {
                    id = status.id.clone();
                    ctx.record(&id);
                }
                match status.state {
                    BuildState::Success => return Ok(id),
                    BuildState::Failed => {
                        return Err(build_failure(ci, &id, ctx.call_timeout).await)
                    }
                    state => debug!(build = %id, state = ?state, "build not finished"),
                }
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!(event = "ci.poll_error", run_id = %ctx.run_id, build = %id, error = %e)
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => warn!(
                event = "ci.poll_error",
                run_id = %ctx.run_id,
                build = %id,
                error = "poll timed out",
            ),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(ctx.poll_interval.min(remaining)).await;
    }
}

/// Re-read the finished build for the build report.
async fn confirm_build(
    ci: &dyn CiAdapter,
    id: &BuildId,
    call_timeout: Duration,
) -> AdapterResult<String> {
    let status = ci.poll(id).await?;
    match status.state {
        BuildState::Success => {
            let mut report = format!("build {} confirmed successful", status.id);
            if let Some(log_ref) = &status.log_ref {
                report.push_str(&format!(", log at {log_ref}"));
            }
            Ok(report)
        }
        BuildState::Failed => Err(build_failure(ci, &status.id, call_timeout).await),
        state => Err(AdapterError::ci_unavailable(format!(
            "build {} reports {state:?} after completion",
            status.id
        ))),
    }
}

/// `BuildFailed` error carrying the tail of the build log when available.
async fn build_failure(ci: &dyn CiAdapter, id: &BuildId, call_timeout: Duration) -> AdapterError {
    let mut message = format!("build {id} failed");
    match tokio::time::timeout(call_timeout, ci.log_excerpt(id)).await {
        Ok(Ok(Some(log))) => {
            message.push('\n');
            message.push_str(tail_chars(&log, LOG_TAIL_CHARS));
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => warn!(build = %id, error = %e, "could not fetch build log"),
        Err(_) => warn!(build = %id, "fetching build log timed out"),
    }
    AdapterError::new(ErrorKind::BuildFailed, message)
}

async fn abort_build(ci: &dyn CiAdapter, id: &BuildId, call_timeout: Duration) {
    match tokio::time::timeout(call_timeout, ci.abort(id)).await {
        Ok(Ok(())) => info!(event = "ci.aborted", build = %id),
        Ok(Err(e)) => warn!(build = %id, error = %e, "abort failed"),
        Err(_) => warn!(build = %id, "abort timed out"),
    }
}

/// Last `max` characters of `s`.
fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_characters() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("ééé", 2), "éé");
    }
}
