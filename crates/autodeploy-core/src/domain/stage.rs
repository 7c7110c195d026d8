//! Pipeline state machine and per-stage outcome records.

use serde::{Deserialize, Serialize};

use crate::domain::error::StageError;

/// Position of a run in the deployment state machine.
///
/// Forward moves may skip states (a skipped CI stage, or a failure jumping
/// straight to `Notifying`). The only edge that leaves the linear order is
/// `CiBuilding | Monitoring -> RollingBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    Analyzing,
    CodeChanging,
    CiBuilding,
    Monitoring,
    RollingBack,
    Notifying,
    Succeeded,
    Failed,
    RolledBack,
}

impl PipelineState {
    fn rank(self) -> u8 {
        match self {
            PipelineState::Created => 0,
            PipelineState::Analyzing => 1,
            PipelineState::CodeChanging => 2,
            PipelineState::CiBuilding => 3,
            PipelineState::Monitoring => 4,
            PipelineState::RollingBack => 5,
            PipelineState::Notifying => 6,
            PipelineState::Succeeded | PipelineState::Failed | PipelineState::RolledBack => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded | PipelineState::Failed | PipelineState::RolledBack
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (Notifying, n) => n.is_terminal(),
            (_, n) if n.is_terminal() => false,
            (RollingBack, n) => n == Notifying,
            (CiBuilding | Monitoring, RollingBack) => true,
            (_, RollingBack) => false,
            (s, n) => n.rank() > s.rank(),
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Created => "created",
            PipelineState::Analyzing => "analyzing",
            PipelineState::CodeChanging => "code_changing",
            PipelineState::CiBuilding => "ci_building",
            PipelineState::Monitoring => "monitoring",
            PipelineState::RollingBack => "rolling_back",
            PipelineState::Notifying => "notifying",
            PipelineState::Succeeded => "succeeded",
            PipelineState::Failed => "failed",
            PipelineState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// A stage whose outcome is recorded in the pipeline result.
///
/// Variants are declared in canonical execution order; the derived `Ord`
/// is that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyzing,
    CodeChanging,
    CiBuilding,
    Monitoring,
    Rollback,
    Notifying,
}

impl Stage {
    /// The state a run is in while executing this stage.
    pub fn state(self) -> PipelineState {
        match self {
            Stage::Analyzing => PipelineState::Analyzing,
            Stage::CodeChanging => PipelineState::CodeChanging,
            Stage::CiBuilding => PipelineState::CiBuilding,
            Stage::Monitoring => PipelineState::Monitoring,
            Stage::Rollback => PipelineState::RollingBack,
            Stage::Notifying => PipelineState::Notifying,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Analyzing => "analyzing",
            Stage::CodeChanging => "code_changing",
            Stage::CiBuilding => "ci_building",
            Stage::Monitoring => "monitoring",
            Stage::Rollback => "rollback",
            Stage::Notifying => "notifying",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Some but not all of the stage's independent targets succeeded.
    Partial,
    Failed,
}

/// Recorded result of one stage, across all of its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<StageError>,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Succeeded,
    Failed,
    RolledBack,
}

impl TerminalState {
    pub fn state(self) -> PipelineState {
        match self {
            TerminalState::Succeeded => PipelineState::Succeeded,
            TerminalState::Failed => PipelineState::Failed,
            TerminalState::RolledBack => PipelineState::RolledBack,
        }
    }

    pub fn is_success(self) -> bool {
        self == TerminalState::Succeeded
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.state().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn happy_path_is_linear() {
        let path = [
            Created,
            Analyzing,
            CodeChanging,
            CiBuilding,
            Monitoring,
            Notifying,
            Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn forward_skips_are_allowed() {
        assert!(CodeChanging.can_transition_to(Notifying));
        assert!(Analyzing.can_transition_to(Notifying));
        assert!(CiBuilding.can_transition_to(Notifying));
    }

    #[test]
    fn backward_moves_are_rejected() {
        assert!(!CiBuilding.can_transition_to(CodeChanging));
        assert!(!Notifying.can_transition_to(Analyzing));
        assert!(!Monitoring.can_transition_to(CiBuilding));
    }

    #[test]
    fn rollback_only_from_build_window() {
        assert!(CiBuilding.can_transition_to(RollingBack));
        assert!(Monitoring.can_transition_to(RollingBack));
        assert!(!CodeChanging.can_transition_to(RollingBack));
        assert!(!Analyzing.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(Notifying));
        assert!(!RollingBack.can_transition_to(Monitoring));
    }

    #[test]
    fn terminal_states_are_reached_only_from_notifying() {
        assert!(Notifying.can_transition_to(Succeeded));
        assert!(Notifying.can_transition_to(RolledBack));
        assert!(!CiBuilding.can_transition_to(Failed));
        assert!(!Succeeded.can_transition_to(Notifying));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn stage_order_is_canonical() {
        let mut stages = vec![
            Stage::Notifying,
            Stage::Rollback,
            Stage::Analyzing,
            Stage::CiBuilding,
        ];
        stages.sort();
        assert_eq!(
            stages,
            vec![
                Stage::Analyzing,
                Stage::CiBuilding,
                Stage::Rollback,
                Stage::Notifying
            ]
        );
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::CiBuilding).unwrap();
        assert_eq!(json, "\"ci_building\"");
    }
}
