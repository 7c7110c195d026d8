//! Error taxonomy for the deployment pipeline.
//!
//! Adapters report failures as [`AdapterError`], tagged with an [`ErrorKind`].
//! The orchestrator is the only place that reads the kind to decide between
//! retry, abort and rollback.

use serde::{Deserialize, Serialize};

use crate::domain::stage::{PipelineState, Stage};

/// Classification of every failure the pipeline can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input to `run`; never retried.
    InvalidRequest,
    /// Analysis platform unreachable or overloaded.
    AnalysisUnavailable,
    /// Analysis platform refused the document or returned an unusable plan.
    AnalysisRejected,
    /// Remote repository could not be reached.
    RepositoryUnreachable,
    /// A change could not be mechanically applied.
    ApplyConflict,
    /// Remote refused the push (stale ref, protected branch race).
    PushRejected,
    /// CI job does not exist.
    JobNotFound,
    /// CI server unreachable or overloaded.
    CiUnavailable,
    /// Build reached a terminal non-success state.
    BuildFailed,
    /// Build did not reach a terminal state within the poll budget.
    BuildTimedOut,
    /// Credentials were refused by an external service.
    Unauthorized,
    /// An adapter call exceeded its stage timeout.
    Timeout,
    /// No notification channel delivered.
    NotificationFailed,
    /// Reverting the pushed changes failed.
    RollbackFailed,
    /// The run was cancelled between stages.
    Cancelled,
    /// Unexpected local failure (I/O, malformed response, bug).
    Internal,
}

impl ErrorKind {
    /// Whether the orchestrator may re-attempt the stage after this failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::AnalysisUnavailable
                | ErrorKind::RepositoryUnreachable
                | ErrorKind::PushRejected
                | ErrorKind::CiUnavailable
                | ErrorKind::BuildFailed
                | ErrorKind::BuildTimedOut
                | ErrorKind::Timeout
        )
    }

    /// Upper bound on retries for this kind, independent of the stage policy.
    pub fn retry_cap(self) -> Option<u32> {
        match self {
            ErrorKind::PushRejected => Some(1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::AnalysisUnavailable => "analysis_unavailable",
            ErrorKind::AnalysisRejected => "analysis_rejected",
            ErrorKind::RepositoryUnreachable => "repository_unreachable",
            ErrorKind::ApplyConflict => "apply_conflict",
            ErrorKind::PushRejected => "push_rejected",
            ErrorKind::JobNotFound => "job_not_found",
            ErrorKind::CiUnavailable => "ci_unavailable",
            ErrorKind::BuildFailed => "build_failed",
            ErrorKind::BuildTimedOut => "build_timed_out",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotificationFailed => "notification_failed",
            ErrorKind::RollbackFailed => "rollback_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an adapter call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn analysis_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AnalysisUnavailable, message)
    }

    pub fn analysis_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AnalysisRejected, message)
    }

    pub fn repository_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RepositoryUnreachable, message)
    }

    pub fn apply_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApplyConflict, message)
    }

    pub fn push_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PushRejected, message)
    }

    pub fn job_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::JobNotFound, message)
    }

    pub fn ci_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CiUnavailable, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Failure attached to a stage outcome in the final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    /// Attempt number (1-based) that produced this error.
    pub attempt: u32,
}

impl StageError {
    pub fn from_adapter(stage: Stage, attempt: u32, err: &AdapterError) -> Self {
        Self {
            stage,
            kind: err.kind,
            message: err.message.clone(),
            attempt,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed ({}, attempt {}): {}",
            self.stage, self.kind, self.attempt, self.message
        )
    }
}

/// Errors surfaced by the orchestrator, configuration loading and archives.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("illegal state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("adapter construction failed: {0}")]
    Adapter(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_taxonomy() {
        assert!(ErrorKind::AnalysisUnavailable.is_retryable());
        assert!(ErrorKind::RepositoryUnreachable.is_retryable());
        assert!(ErrorKind::CiUnavailable.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());

        assert!(!ErrorKind::AnalysisRejected.is_retryable());
        assert!(!ErrorKind::ApplyConflict.is_retryable());
        assert!(!ErrorKind::JobNotFound.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(!ErrorKind::RollbackFailed.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn push_rejected_is_capped_at_one_retry() {
        assert!(ErrorKind::PushRejected.is_retryable());
        assert_eq!(ErrorKind::PushRejected.retry_cap(), Some(1));
        assert_eq!(ErrorKind::CiUnavailable.retry_cap(), None);
    }

    #[test]
    fn adapter_error_display_includes_kind() {
        let err = AdapterError::job_not_found("no job named app-build");
        assert_eq!(err.to_string(), "job_not_found: no job named app-build");
    }

    #[test]
    fn stage_error_display_names_stage_and_attempt() {
        let err = StageError::from_adapter(
            Stage::CodeChanging,
            2,
            &AdapterError::push_rejected("stale info"),
        );
        let msg = err.to_string();
        assert!(msg.contains("code_changing"));
        assert!(msg.contains("attempt 2"));
        assert!(msg.contains("stale info"));
    }

    #[test]
    fn digest_mismatch_error() {
        let err = DeployError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }
}
