//! Per-stage retry and timeout policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ErrorKind;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Attempt budget and spacing for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `max_attempts` attempts with no delay between them.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
                let millis = self.base_delay.as_millis() as f64 * factor;
                Duration::from_millis(millis.min(u64::MAX as f64) as u64)
            }
        };
        delay.min(self.max_delay.max(self.base_delay))
    }

    /// Whether a failure of `kind` on attempt `attempt` earns another attempt.
    ///
    /// `kind_failures` counts the failures of this same kind so far in the
    /// stage, including this one; per-kind caps apply to it.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32, kind_failures: u32) -> bool {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return false;
        }
        match kind.retry_cap() {
            Some(cap) => kind_failures <= cap,
            None => true,
        }
    }
}

/// Timeout and retry settings for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Upper bound for a single adapter call.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl StagePolicy {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}
