//! Structured tracing hooks for the run lifecycle.
//!
//! Each run executes inside a [`RunSpan`]; the `emit_*` functions log one
//! `event = "..."` record per lifecycle step so log pipelines can follow a
//! run without parsing messages.

use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{Stage, StageError, StageStatus, TerminalState};

/// RAII guard holding the run-scoped span.
///
/// ```ignore
/// let _span = RunSpan::enter("6f1c...");
/// // every event below carries run_id = "6f1c..."
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("autodeploy.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Span to attach to a future with `Instrument`; `RunSpan` cannot be held
/// across `.await` in a `Send` future.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("autodeploy.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, project: &str, ci_job: Option<&str>) {
    info!(
        event = "run.started",
        run_id = %run_id,
        project = %project,
        ci_job = ci_job.unwrap_or("-"),
    );
}

pub fn emit_stage_entered(run_id: &str, stage: Stage, attempt: u32) {
    info!(
        event = "stage.entered",
        run_id = %run_id,
        stage = %stage,
        attempt = attempt,
    );
}

pub fn emit_stage_finished(run_id: &str, stage: Stage, status: StageStatus, attempts: u32) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        status = ?status,
        attempts = attempts,
    );
}

/// A failed attempt that will be retried after `delay`.
pub fn emit_retry_scheduled(run_id: &str, error: &StageError, delay: Duration) {
    warn!(
        event = "stage.retry_scheduled",
        run_id = %run_id,
        stage = %error.stage,
        kind = %error.kind,
        attempt = error.attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error.message,
    );
}

pub fn emit_run_finished(run_id: &str, terminal: TerminalState, duration_ms: u64, errors: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        terminal = %terminal,
        duration_ms = duration_ms,
        errors = errors,
        success = terminal.is_success(),
    );
}

/// A monitor event that could not be delivered.
pub fn emit_monitor_dropped(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "monitor.dropped", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdapterError, ErrorKind};
    use tracing_test::traced_test;

    #[test]
    fn run_span_enters() {
        let _span = RunSpan::enter("test-run-id");
    }

    #[traced_test]
    #[test]
    fn lifecycle_events_are_structured() {
        emit_run_started("run-1", "app", Some("app-build"));
        emit_stage_finished("run-1", Stage::CiBuilding, StageStatus::Succeeded, 2);
        emit_run_finished("run-1", TerminalState::Succeeded, 1200, 0);

        assert!(logs_contain("run.started"));
        assert!(logs_contain("ci_job=\"app-build\""));
        assert!(logs_contain("stage.finished"));
        assert!(logs_contain("run.finished"));
    }

    #[traced_test]
    #[test]
    fn retry_is_logged_with_kind_and_delay() {
        let err = StageError::from_adapter(
            Stage::Analyzing,
            1,
            &AdapterError::new(ErrorKind::AnalysisUnavailable, "503"),
        );
        emit_retry_scheduled("run-2", &err, Duration::from_millis(250));
        assert!(logs_contain("stage.retry_scheduled"));
        assert!(logs_contain("analysis_unavailable"));
        assert!(logs_contain("delay_ms=250"));
    }
}
