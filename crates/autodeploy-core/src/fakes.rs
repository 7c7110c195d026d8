//! Scripted in-memory adapters (testing only).
//!
//! Each fake counts its calls and can be scripted to fail a number of times
//! before succeeding, or to fail forever. Shared freely across concurrent
//! runs; all state sits behind a `Mutex`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::{
    AdapterResult, Analyzer, CiAdapter, CodeChanger, MonitorPublisher, NotifyChannel,
};
use crate::cancel::CancelToken;
use crate::domain::{
    AdapterError, BuildId, BuildState, BuildStatus, ChangeItem, ChangePlan, ChangeTarget,
    ChannelKind, CodeChangeResult, PushStatus,
};
use crate::monitor::MonitorEvent;
use crate::notify::NotificationPayload;

// ---------------------------------------------------------------------------
// Failure script
// ---------------------------------------------------------------------------

/// Errors to return before (or instead of) succeeding.
#[derive(Debug, Default)]
struct Failures {
    queued: VecDeque<AdapterError>,
    always: Option<AdapterError>,
}

impl Failures {
    fn next(&mut self) -> Option<AdapterError> {
        self.queued.pop_front().or_else(|| self.always.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeAnalyzer
// ---------------------------------------------------------------------------

/// Analyzer returning a fixed plan.
#[derive(Debug)]
pub struct FakeAnalyzer {
    plan: ChangePlan,
    failures: Mutex<Failures>,
    delay: Duration,
    cancel_on_call: Option<CancelToken>,
    calls: AtomicU32,
}

impl FakeAnalyzer {
    pub fn new(plan: ChangePlan) -> Self {
        Self {
            plan,
            failures: Mutex::new(Failures::default()),
            delay: Duration::ZERO,
            cancel_on_call: None,
            calls: AtomicU32::new(0),
        }
    }

    /// One-change plan touching `src/main.rs`.
    pub fn single_change(intent: &str) -> Self {
        Self::new(
            ChangePlan::new(vec![ChangeItem::new("src/main.rs", intent)]).with_summary(intent),
        )
    }

    /// Fail the next `times` calls with `err`, then succeed.
    pub fn fail_first(self, times: usize, err: AdapterError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .queued
            .extend(std::iter::repeat(err).take(times));
        self
    }

    pub fn always_fail(self, err: AdapterError) -> Self {
        self.failures.lock().unwrap().always = Some(err);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel `token` while the call is in flight.
    pub fn cancel_on_call(mut self, token: CancelToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, _document: &str) -> AdapterResult<ChangePlan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().next() {
            return Err(err);
        }
        Ok(self.plan.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeCodeChanger
// ---------------------------------------------------------------------------

/// Code changer that "pushes" one commit per plan item.
#[derive(Debug, Default)]
pub struct FakeCodeChanger {
    apply_failures: Mutex<Failures>,
    revert_failures: Mutex<Failures>,
    reverted: Mutex<Vec<CodeChangeResult>>,
    apply_calls: AtomicU32,
    revert_calls: AtomicU32,
    release_calls: AtomicU32,
}

impl FakeCodeChanger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_first(self, times: usize, err: AdapterError) -> Self {
        self.apply_failures
            .lock()
            .unwrap()
            .queued
            .extend(std::iter::repeat(err).take(times));
        self
    }

    pub fn always_fail(self, err: AdapterError) -> Self {
        self.apply_failures.lock().unwrap().always = Some(err);
        self
    }

    pub fn failing_revert(self, err: AdapterError) -> Self {
        self.revert_failures.lock().unwrap().always = Some(err);
        self
    }

    pub fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn revert_calls(&self) -> u32 {
        self.revert_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> u32 {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn reverted(&self) -> Vec<CodeChangeResult> {
        self.reverted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeChanger for FakeCodeChanger {
    async fn apply(
        &self,
        plan: &ChangePlan,
        target: &ChangeTarget,
    ) -> AdapterResult<CodeChangeResult> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.apply_failures.lock().unwrap().next() {
            return Err(err);
        }
        Ok(CodeChangeResult {
            branch: format!(
                "auto-deploy/{}-{}",
                target.project,
                target.started_at.format("%Y%m%d%H%M%S")
            ),
            base_branch: "main".to_string(),
            commits: (1..=plan.len()).map(|i| format!("commit-{i}")).collect(),
            push: PushStatus::Pushed,
        })
    }

    async fn revert(
        &self,
        result: &CodeChangeResult,
        _target: &ChangeTarget,
    ) -> AdapterResult<()> {
        self.revert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.revert_failures.lock().unwrap().next() {
            return Err(err);
        }
        self.reverted.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn release(&self, _target: &ChangeTarget) -> AdapterResult<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeCi
// ---------------------------------------------------------------------------

/// A recorded `trigger` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCall {
    pub job: String,
    pub git_ref: String,
    pub params: BTreeMap<String, String>,
}

/// CI fake. Polls consume a shared script of states; once it is empty
/// every poll reports the final state (`Success` unless changed).
#[derive(Debug)]
pub struct FakeCi {
    trigger_failures: Mutex<Failures>,
    poll_script: Mutex<VecDeque<AdapterResult<BuildState>>>,
    final_state: BuildState,
    cancel_after_polls: Option<(u32, CancelToken)>,
    triggers: Mutex<Vec<TriggerCall>>,
    polls: AtomicU32,
    aborts: AtomicU32,
}

impl Default for FakeCi {
    fn default() -> Self {
        Self {
            trigger_failures: Mutex::new(Failures::default()),
            poll_script: Mutex::new(VecDeque::new()),
            final_state: BuildState::Success,
            cancel_after_polls: None,
            triggers: Mutex::new(Vec::new()),
            polls: AtomicU32::new(0),
            aborts: AtomicU32::new(0),
        }
    }
}

impl FakeCi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every build ends in `state` once the script is exhausted.
    pub fn finishing(mut self, state: BuildState) -> Self {
        self.final_state = state;
        self
    }

    pub fn then_poll(self, step: AdapterResult<BuildState>) -> Self {
        self.poll_script.lock().unwrap().push_back(step);
        self
    }

    pub fn failing_trigger(self, err: AdapterError) -> Self {
        self.trigger_failures.lock().unwrap().always = Some(err);
        self
    }

    pub fn fail_first_triggers(self, times: usize, err: AdapterError) -> Self {
        self.trigger_failures
            .lock()
            .unwrap()
            .queued
            .extend(std::iter::repeat(err).take(times));
        self
    }

    /// Cancel `token` on the `n`th poll.
    pub fn cancel_after_polls(mut self, n: u32, token: CancelToken) -> Self {
        self.cancel_after_polls = Some((n, token));
        self
    }

    pub fn triggers(&self) -> Vec<TriggerCall> {
        self.triggers.lock().unwrap().clone()
    }

    pub fn trigger_calls(&self) -> u32 {
        self.triggers.lock().unwrap().len() as u32
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CiAdapter for FakeCi {
    async fn trigger(
        &self,
        job: &str,
        git_ref: &str,
        params: &BTreeMap<String, String>,
    ) -> AdapterResult<BuildId> {
        let mut triggers = self.triggers.lock().unwrap();
        triggers.push(TriggerCall {
            job: job.to_string(),
            git_ref: git_ref.to_string(),
            params: params.clone(),
        });
        if let Some(err) = self.trigger_failures.lock().unwrap().next() {
            return Err(err);
        }
        Ok(BuildId::new(format!("{job}#{}", triggers.len())))
    }

    async fn poll(&self, id: &BuildId) -> AdapterResult<BuildStatus> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = &self.cancel_after_polls {
            if n >= *at {
                token.cancel();
            }
        }
        let step = self
            .poll_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.final_state));
        step.map(|state| BuildStatus::new(id.clone(), state))
    }

    async fn log_excerpt(&self, id: &BuildId) -> AdapterResult<Option<String>> {
        Ok(Some(format!("console output of {id}\nERROR: tests failed")))
    }

    async fn abort(&self, _id: &BuildId) -> AdapterResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingMonitor
// ---------------------------------------------------------------------------

/// Monitor publisher that records every event it is offered.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
    failing: bool,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events but report every publish as failed.
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MonitorPublisher for RecordingMonitor {
    async fn publish(&self, event: &MonitorEvent) -> AdapterResult<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.failing {
            return Err(AdapterError::internal("monitor unavailable"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeChannel
// ---------------------------------------------------------------------------

/// Notification channel that records payloads.
#[derive(Debug)]
pub struct FakeChannel {
    name: String,
    kind: ChannelKind,
    failing: bool,
    delay: Duration,
    payloads: Mutex<Vec<NotificationPayload>>,
}

impl FakeChannel {
    pub fn new(name: &str, kind: ChannelKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            failing: false,
            delay: Duration::ZERO,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str, kind: ChannelKind) -> Self {
        Self {
            failing: true,
            ..Self::new(name, kind)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of send attempts, failed ones included.
    pub fn sent(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<NotificationPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifyChannel for FakeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, payload: &NotificationPayload) -> AdapterResult<()> {
        self.payloads.lock().unwrap().push(payload.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing {
            return Err(AdapterError::new(
                crate::domain::ErrorKind::NotificationFailed,
                format!("{} rejected the message", self.name),
            ));
        }
        Ok(())
    }
}
