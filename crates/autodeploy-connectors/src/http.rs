//! Shared HTTP client construction and status classification.

use std::time::Duration;

use autodeploy_core::{AdapterError, DeployError, ErrorKind};
use reqwest::StatusCode;

pub(crate) fn client(component: &str) -> Result<reqwest::Client, DeployError> {
    reqwest::Client::builder()
        .user_agent(concat!("autodeploy/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| DeployError::Adapter(format!("{component} http client: {e}")))
}

/// `unavailable` for network-level trouble (429, 5xx), `rejected` for any
/// other non-success status. 401 and 403 are always `Unauthorized`.
pub(crate) fn status_error(
    status: StatusCode,
    what: &str,
    unavailable: ErrorKind,
    rejected: ErrorKind,
) -> AdapterError {
    let message = format!("{what} answered {status}");
    let kind = match status.as_u16() {
        401 | 403 => ErrorKind::Unauthorized,
        429 | 500..=599 => unavailable,
        _ => rejected,
    };
    AdapterError::new(kind, message)
}
