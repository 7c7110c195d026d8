//! CI build identity and status snapshots.

use serde::{Deserialize, Serialize};

/// Opaque build handle issued by a CI adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub String);

impl BuildId {
    pub fn new(id: impl Into<String>) -> Self {
        BuildId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    Running,
    Success,
    /// Any terminal non-success result, including partial success.
    Failed,
    Unknown,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Success | BuildState::Failed)
    }
}

/// Point-in-time build snapshot returned by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Id to use for the next poll; may refine the id that was polled.
    pub id: BuildId,
    pub state: BuildState,
    pub log_ref: Option<String>,
}

impl BuildStatus {
    pub fn new(id: BuildId, state: BuildState) -> Self {
        Self {
            id,
            state,
            log_ref: None,
        }
    }

    pub fn with_log_ref(mut self, log_ref: impl Into<String>) -> Self {
        self.log_ref = Some(log_ref.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_and_failed_are_terminal() {
        assert!(BuildState::Success.is_terminal());
        assert!(BuildState::Failed.is_terminal());
        assert!(!BuildState::Pending.is_terminal());
        assert!(!BuildState::Running.is_terminal());
        assert!(!BuildState::Unknown.is_terminal());
    }
}
