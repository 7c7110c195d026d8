//! Progress events sent to the monitor publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PipelineState, StageStatus, TerminalState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Entered,
    Succeeded,
    Partial,
    Failed,
}

impl From<StageStatus> for EventOutcome {
    fn from(status: StageStatus) -> Self {
        match status {
            StageStatus::Succeeded => EventOutcome::Succeeded,
            StageStatus::Partial => EventOutcome::Partial,
            StageStatus::Failed => EventOutcome::Failed,
        }
    }
}

/// One state transition of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub run_id: String,
    pub project: String,
    pub state: PipelineState,
    pub outcome: EventOutcome,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
}

impl MonitorEvent {
    pub fn entered(run_id: &str, project: &str, state: PipelineState) -> Self {
        Self {
            run_id: run_id.to_string(),
            project: project.to_string(),
            state,
            outcome: EventOutcome::Entered,
            timestamp: Utc::now(),
            detail: None,
        }
    }

    pub fn finished(
        run_id: &str,
        project: &str,
        state: PipelineState,
        status: StageStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            project: project.to_string(),
            state,
            outcome: status.into(),
            timestamp: Utc::now(),
            detail,
        }
    }

    /// Last event of a run; publishers release per-run resources on it.
    pub fn terminal(run_id: &str, project: &str, terminal: TerminalState) -> Self {
        let outcome = if terminal.is_success() {
            EventOutcome::Succeeded
        } else {
            EventOutcome::Failed
        };
        Self {
            run_id: run_id.to_string(),
            project: project.to_string(),
            state: terminal.state(),
            outcome,
            timestamp: Utc::now(),
            detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_event_maps_outcome() {
        let ok = MonitorEvent::terminal("r1", "app", TerminalState::Succeeded);
        assert!(ok.is_terminal());
        assert_eq!(ok.outcome, EventOutcome::Succeeded);

        let rolled = MonitorEvent::terminal("r1", "app", TerminalState::RolledBack);
        assert_eq!(rolled.state, PipelineState::RolledBack);
        assert_eq!(rolled.outcome, EventOutcome::Failed);
    }

    #[test]
    fn stage_events_are_not_terminal() {
        let event = MonitorEvent::entered("r1", "app", PipelineState::CiBuilding);
        assert!(!event.is_terminal());
        assert_eq!(event.outcome, EventOutcome::Entered);
    }
}
