//! Domain model for deployment runs.

pub mod build;
pub mod error;
pub mod plan;
pub mod request;
pub mod result;
pub mod stage;

pub use build::{BuildId, BuildState, BuildStatus};
pub use error::{AdapterError, DeployError, ErrorKind, Result, StageError};
pub use plan::{ChangeItem, ChangePlan, ChangeTarget, CodeChangeResult, PushStatus};
pub use request::DeploymentRequest;
pub use result::{ChannelDelivery, ChannelKind, NotificationReport, PipelineResult};
pub use stage::{PipelineState, Stage, StageOutcome, StageStatus, TerminalState};
