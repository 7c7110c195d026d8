//! autodeploy core library
//!
//! Domain model, configuration and the pipeline orchestrator that turns a
//! requirement document into a pushed branch, a CI build and a notification.
//! Concrete adapters live in the `autodeploy-connectors`, `autodeploy-vcs`
//! and `autodeploy-ci` crates.

pub mod adapters;
pub mod archive;
pub mod cancel;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod fakes;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod obs;
pub mod orchestrator;
pub mod retry;
pub mod telemetry;

pub use adapters::{
    strip_code_fence, AdapterResult, Analyzer, CiAdapter, CodeChanger, MonitorPublisher,
    NotifyChannel,
};
pub use archive::{read_run_archive, write_run_archive};
pub use cancel::CancelToken;
pub use config::{
    ChannelConfig, DeployConfig, DifySettings, GitSettings, JenkinsSettings, LlmSettings,
    McpSettings, PipelineConfig, StageSettings,
};
pub use credentials::{CredentialProvider, EnvCredentials, Secret, SecretKey, StaticCredentials};
pub use domain::{
    AdapterError, BuildId, BuildState, BuildStatus, ChangeItem, ChangePlan, ChangeTarget,
    ChannelDelivery, ChannelKind, CodeChangeResult, DeployError, DeploymentRequest, ErrorKind,
    NotificationReport, PipelineResult, PipelineState, PushStatus, Result, Stage, StageError,
    StageOutcome, StageStatus, TerminalState,
};
pub use metrics::METRICS;
pub use monitor::{EventOutcome, MonitorEvent};
pub use notify::{NotificationPayload, Notifier};
pub use orchestrator::Orchestrator;
pub use retry::{Backoff, RetryPolicy, StagePolicy};
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
