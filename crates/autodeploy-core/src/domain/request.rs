//! Deployment request: the immutable input of one pipeline run.

use serde::{Deserialize, Serialize};

use crate::domain::error::{DeployError, Result};

/// Input of a single pipeline run. Never mutated once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub project: String,
    pub repo_url: String,
    /// CI job to trigger; `None` skips the CI stage.
    pub ci_job: Option<String>,
    /// Natural-language requirement document.
    pub document: String,
    pub monitoring: bool,
}

impl DeploymentRequest {
    pub fn new(
        project: impl Into<String>,
        repo_url: impl Into<String>,
        document: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            repo_url: repo_url.into(),
            ci_job: None,
            document: document.into(),
            monitoring: true,
        }
    }

    pub fn with_ci_job(mut self, job: impl Into<String>) -> Self {
        self.ci_job = Some(job.into());
        self
    }

    pub fn without_monitoring(mut self) -> Self {
        self.monitoring = false;
        self
    }

    /// Reject requests that no adapter could act on.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(DeployError::InvalidRequest(
                "project name must not be empty".to_string(),
            ));
        }
        if self.repo_url.trim().is_empty() {
            return Err(DeployError::InvalidRequest(
                "repository URL must not be empty".to_string(),
            ));
        }
        if let Some(job) = &self.ci_job {
            if job.trim().is_empty() {
                return Err(DeployError::InvalidRequest(
                    "CI job name must not be blank when given".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_request_passes() {
        let req = DeploymentRequest::new("app", "https://example/app.git", "add health endpoint")
            .with_ci_job("app-build");
        assert!(req.validate().is_ok());
        assert!(req.monitoring);
    }

    #[test]
    fn empty_project_is_rejected() {
        let req = DeploymentRequest::new("  ", "https://example/app.git", "doc");
        let err = req.validate().unwrap_err();
        assert!(matches!(err, DeployError::InvalidRequest(_)));
        assert!(err.to_string().contains("project"));
    }

    #[test]
    fn empty_repo_is_rejected() {
        let req = DeploymentRequest::new("app", "", "doc");
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("repository URL"));
    }

    #[test]
    fn blank_job_is_rejected() {
        let req = DeploymentRequest::new("app", "https://example/app.git", "doc").with_ci_job(" ");
        assert!(req.validate().is_err());
    }
}
