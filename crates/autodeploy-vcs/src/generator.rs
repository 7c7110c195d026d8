//! Code generation: turning one change intent into whole-file edits.

use std::path::{Component, Path};

use async_trait::async_trait;
use autodeploy_core::{
    strip_code_fence, AdapterError, AdapterResult, CredentialProvider, DeployError, LlmSettings,
    Secret, SecretKey,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// Current content of a file the change targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// Everything the generator sees for one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub intent: String,
    pub rationale: String,
    /// Path or glob from the plan.
    pub target: String,
    pub files: Vec<SourceFile>,
}

/// Whole-file replacement. `content: None` deletes the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub content: Option<String>,
}

impl FileEdit {
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    /// Rejects paths that escape the working copy or touch `.git`.
    pub fn check_path(&self) -> AdapterResult<()> {
        check_repo_path(&self.path, "edit path")
    }
}

/// Rejects empty or absolute paths, `..` components and anything under
/// `.git`. `what` names the path in the error.
pub fn check_repo_path(raw: &str, what: &str) -> AdapterResult<()> {
    let unsafe_path = || AdapterError::apply_conflict(format!("unsafe {what} {raw:?}"));
    let path = Path::new(raw);
    if raw.trim().is_empty() || path.is_absolute() {
        return Err(unsafe_path());
    }
    let mut normal = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normal.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path())
            }
        }
    }
    match normal.first() {
        None => Err(unsafe_path()),
        Some(first) if first.to_str() == Some(".git") => Err(unsafe_path()),
        Some(_) => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
struct EditReply {
    edits: Vec<FileEdit>,
}

/// Produces file edits for a change.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> AdapterResult<Vec<FileEdit>>;
}

/// Parse a model reply of the form `{"edits":[{"path","content"}]}`.
pub fn parse_edits(reply: &str) -> AdapterResult<Vec<FileEdit>> {
    let body = strip_code_fence(reply);
    let parsed: EditReply = serde_json::from_str(body).map_err(|e| {
        AdapterError::apply_conflict(format!("generator reply is not an edit list: {e}"))
    })?;
    for edit in &parsed.edits {
        edit.check_path()?;
    }
    Ok(parsed.edits)
}

/// Fixed prompt for one change.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::new();
    prompt.push_str("You modify a software repository. Apply the change below.\n\n");
    prompt.push_str(&format!("Change: {}\n", request.intent));
    if !request.rationale.is_empty() {
        prompt.push_str(&format!("Reason: {}\n", request.rationale));
    }
    prompt.push_str(&format!("Target: {}\n\n", request.target));

    if request.files.is_empty() {
        prompt.push_str("No existing file matches the target; create what is needed.\n\n");
    }
    for file in &request.files {
        prompt.push_str(&format!("--- {} ---\n{}\n", file.path, file.content));
        if !file.content.ends_with('\n') {
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "Reply with JSON only, no prose:\n\
         {\"edits\":[{\"path\":\"relative/path\",\"content\":\"full new file content\"}]}\n\
         Use \"content\": null to delete a file. Paths are relative to the repository root.\n",
    );
    prompt
}

/// OpenAI-style completion client.
#[derive(Clone)]
pub struct LlmCodeGenerator {
    http: reqwest::Client,
    endpoint: String,
    settings: LlmSettings,
    api_key: Option<Secret>,
}

impl std::fmt::Debug for LlmCodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCodeGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl LlmCodeGenerator {
    pub fn new(
        settings: &LlmSettings,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self, DeployError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("autodeploy-vcs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeployError::Adapter(format!("llm http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/completions", settings.api_url.trim_end_matches('/')),
            settings: settings.clone(),
            api_key: credentials.get(SecretKey::LlmApiKey),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

/// 429 and 5xx map to the retryable model-service kind, named as the code
/// generator in the message.
fn status_error(status: reqwest::StatusCode) -> AdapterError {
    match status.as_u16() {
        401 | 403 => AdapterError::unauthorized(format!("code generator answered {status}")),
        429 | 500..=599 => AdapterError::analysis_unavailable(format!(
            "code generator unavailable: answered {status}"
        )),
        _ => AdapterError::apply_conflict(format!("code generator answered {status}")),
    }
}

#[async_trait]
impl CodeGenerator for LlmCodeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> AdapterResult<Vec<FileEdit>> {
        let body = json!({
            "model": self.settings.model,
            "prompt": build_prompt(request),
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "stream": false,
        });
        let mut call = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key.expose());
        }

        let response = call.send().await.map_err(|e| {
            AdapterError::analysis_unavailable(format!("code generator unavailable: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| AdapterError::apply_conflict(format!("malformed completion: {e}")))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| AdapterError::apply_conflict("completion has no choices"))?;
        debug!(target_pattern = %request.target, reply_len = text.len(), "completion received");

        let edits = parse_edits(&text)?;
        info!(
            event = "codegen.edits",
            target_pattern = %request.target,
            edits = edits.len(),
        );
        Ok(edits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodeploy_core::ErrorKind;

    #[test]
    fn edits_parse_from_fenced_reply() {
        let reply = "```json\n{\"edits\":[{\"path\":\"src/health.rs\",\"content\":\"ok\"},{\"path\":\"old.rs\",\"content\":null}]}\n```";
        let edits = parse_edits(reply).unwrap();
        assert_eq!(
            edits,
            vec![FileEdit::write("src/health.rs", "ok"), FileEdit::delete("old.rs")]
        );
    }

    #[test]
    fn generator_statuses_are_classified() {
        let busy = status_error(reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(busy.is_retryable());
        assert!(busy.message.starts_with("code generator unavailable"));
        assert_eq!(
            status_error(reqwest::StatusCode::TOO_MANY_REQUESTS).kind,
            ErrorKind::AnalysisUnavailable
        );
        assert_eq!(
            status_error(reqwest::StatusCode::FORBIDDEN).kind,
            ErrorKind::Unauthorized
        );
        assert_eq!(
            status_error(reqwest::StatusCode::BAD_REQUEST).kind,
            ErrorKind::ApplyConflict
        );
    }

    #[test]
    fn prose_reply_is_a_conflict() {
        let err = parse_edits("Sure! Here is the code you asked for.").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ApplyConflict);
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for path in ["../etc/passwd", "/etc/passwd", ".git/config", "./.git/HEAD", "src/../../x", ""] {
            let err = FileEdit::write(path, "x").check_path().unwrap_err();
            assert_eq!(err.kind, ErrorKind::ApplyConflict, "{path}");
        }
        FileEdit::write("src/.gitignore-like/ok.rs", "x")
            .check_path()
            .unwrap();
        FileEdit::write("./README.md", "x").check_path().unwrap();
    }

    #[test]
    fn prompt_carries_intent_and_files() {
        let prompt = build_prompt(&GenerationRequest {
            intent: "add /health".to_string(),
            rationale: "probes".to_string(),
            target: "src/*.rs".to_string(),
            files: vec![SourceFile {
                path: "src/main.rs".to_string(),
                content: "fn main() {}".to_string(),
            }],
        });
        assert!(prompt.contains("Change: add /health"));
        assert!(prompt.contains("Reason: probes"));
        assert!(prompt.contains("--- src/main.rs ---\nfn main() {}\n"));
        assert!(prompt.contains("\"edits\""));
    }
}
