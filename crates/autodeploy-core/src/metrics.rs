//! Global atomic counters for deployment runs.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits all of them
//! as one `tracing::info!` event, typically when the CLI exits.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::TerminalState;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    runs_rolled_back: AtomicU64,
    stage_retries: AtomicU64,
    monitor_events_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_rolled_back: AtomicU64::new(0),
            stage_retries: AtomicU64::new(0),
            monitor_events_dropped: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    /// Count a finished run under its terminal state.
    pub fn record_terminal(&self, terminal: TerminalState) {
        let (counter, name) = match terminal {
            TerminalState::Succeeded => (&self.runs_succeeded, "runs_succeeded"),
            TerminalState::Failed => (&self.runs_failed, "runs_failed"),
            TerminalState::RolledBack => (&self.runs_rolled_back, "runs_rolled_back"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_stage_retries(&self) {
        self.stage_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_retries", "counter incremented");
    }

    pub fn inc_monitor_dropped(&self) {
        self.monitor_events_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "monitor_events_dropped", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_succeeded = self.runs_succeeded(),
            runs_failed = self.runs_failed(),
            runs_rolled_back = self.runs_rolled_back(),
            stage_retries = self.stage_retries(),
            monitor_events_dropped = self.monitor_events_dropped(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn runs_rolled_back(&self) -> u64 {
        self.runs_rolled_back.load(Ordering::Relaxed)
    }

    pub fn stage_retries(&self) -> u64 {
        self.stage_retries.load(Ordering::Relaxed)
    }

    pub fn monitor_events_dropped(&self) -> u64 {
        self.monitor_events_dropped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_succeeded.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.runs_rolled_back.store(0, Ordering::Relaxed);
        self.stage_retries.store(0, Ordering::Relaxed);
        self.monitor_events_dropped.store(0, Ordering::Relaxed);
    }
}
