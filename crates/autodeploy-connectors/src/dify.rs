//! Requirement analysis through a Dify completion app.

use std::collections::BTreeMap;

use async_trait::async_trait;
use autodeploy_core::{
    strip_code_fence, AdapterError, AdapterResult, Analyzer, ChangeItem, ChangePlan,
    CredentialProvider, DeployError, DifySettings, ErrorKind, Secret, SecretKey,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::http;

const PROMPT: &str = "Turn the requirement document below into a code change plan.\n\
Reply with JSON only, in this shape:\n\
{\"summary\":\"one line\",\
\"changes\":[{\"target\":\"path or glob\",\"intent\":\"what to change\",\"rationale\":\"why\"}],\
\"ci_parameters\":{\"NAME\":\"value\"}}\n\
List changes in the order they should be applied.\n\n\
Requirement document:\n";

pub struct DifyAnalyzer {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    api_key: Option<Secret>,
}

impl std::fmt::Debug for DifyAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifyAnalyzer")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .finish()
    }
}

impl DifyAnalyzer {
    pub fn new(
        settings: &DifySettings,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self, DeployError> {
        let api_key = credentials.get(SecretKey::DifyApiKey);
        if api_key.is_none() {
            warn!("no Dify API key configured");
        }
        Ok(Self {
            http: http::client("dify")?,
            endpoint: format!(
                "{}/completion-messages",
                settings.api_url.trim_end_matches('/')
            ),
            user: settings.user.clone(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    answer: Option<String>,
}

/// Older reply shape: a file list with per-file change text and Jenkins
/// parameters.
#[derive(Debug, Deserialize)]
struct FileListPlan {
    files_to_modify: Vec<String>,
    #[serde(default)]
    file_changes: BTreeMap<String, String>,
    #[serde(default)]
    git_strategy: String,
    #[serde(default)]
    jenkins_params: BTreeMap<String, serde_json::Value>,
}

impl From<FileListPlan> for ChangePlan {
    fn from(legacy: FileListPlan) -> Self {
        let changes = legacy
            .files_to_modify
            .iter()
            .map(|path| {
                let intent = legacy
                    .file_changes
                    .get(path)
                    .cloned()
                    .unwrap_or_else(|| format!("update {path}"));
                ChangeItem::new(path.clone(), intent)
            })
            .collect();
        let ci_parameters = legacy
            .jenkins_params
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        ChangePlan {
            summary: legacy.git_strategy,
            changes,
            ci_parameters,
        }
    }
}

/// Parse the plan out of a Dify answer. Empty or unreadable plans are
/// rejected.
pub fn parse_plan(answer: &str) -> AdapterResult<ChangePlan> {
    let body = strip_code_fence(answer);
    let plan = match serde_json::from_str::<ChangePlan>(body) {
        Ok(plan) => plan,
        Err(err) => match serde_json::from_str::<FileListPlan>(body) {
            Ok(legacy) => legacy.into(),
            Err(_) => {
                return Err(AdapterError::analysis_rejected(format!(
                    "analysis answer is not a change plan: {err}"
                )))
            }
        },
    };
    if plan.is_empty() {
        return Err(AdapterError::analysis_rejected(
            "analysis produced an empty plan",
        ));
    }
    if let Some(blank) = plan.changes.iter().position(|c| c.target.trim().is_empty()) {
        return Err(AdapterError::analysis_rejected(format!(
            "change {} has no target",
            blank + 1
        )));
    }
    Ok(plan)
}

#[async_trait]
impl Analyzer for DifyAnalyzer {
    async fn analyze(&self, document: &str) -> AdapterResult<ChangePlan> {
        let body = json!({
            "inputs": {},
            "query": format!("{PROMPT}{document}"),
            "response_mode": "blocking",
            "user": self.user,
        });
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::analysis_unavailable(format!("dify: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(http::status_error(
                status,
                "dify",
                ErrorKind::AnalysisUnavailable,
                ErrorKind::AnalysisRejected,
            ));
        }

        let message: CompletionMessage = response
            .json()
            .await
            .map_err(|e| AdapterError::analysis_rejected(format!("malformed dify reply: {e}")))?;
        let answer = message
            .answer
            .ok_or_else(|| AdapterError::analysis_rejected("dify reply has no answer"))?;
        debug!(answer_len = answer.len(), "dify answered");

        let plan = parse_plan(&answer)?;
        info!(
            event = "analysis.plan",
            changes = plan.len(),
            ci_parameters = plan.ci_parameters.len(),
        );
        Ok(plan)
    }
}
