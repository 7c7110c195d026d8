//! Change plans produced by requirement analysis, and the branch that applying
//! them produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One atomic change the analysis asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItem {
    /// File path or glob pattern, relative to the repository root.
    pub target: String,
    pub intent: String,
    #[serde(default)]
    pub rationale: String,
}

impl ChangeItem {
    pub fn new(target: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            intent: intent.into(),
            rationale: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// Structured, ordered description of the code changes for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePlan {
    #[serde(default)]
    pub summary: String,
    pub changes: Vec<ChangeItem>,
    /// Build parameters suggested by the analysis (forwarded to CI).
    #[serde(default)]
    pub ci_parameters: BTreeMap<String, String>,
}

impl ChangePlan {
    pub fn new(changes: Vec<ChangeItem>) -> Self {
        Self {
            summary: String::new(),
            changes,
            ci_parameters: BTreeMap::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Where and when a plan gets applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTarget {
    pub project: String,
    pub repo_url: String,
    /// Run start time; branch names derive from it so retries reuse the name.
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    Pushed,
    NotPushed,
}

/// Branch and commits produced by applying a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChangeResult {
    pub branch: String,
    pub base_branch: String,
    /// Commit ids, oldest first.
    pub commits: Vec<String>,
    pub push: PushStatus,
}

impl CodeChangeResult {
    pub fn head(&self) -> Option<&str> {
        self.commits.last().map(String::as_str)
    }
}
