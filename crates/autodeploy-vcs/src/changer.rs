//! [`CodeChanger`] backed by the `git` CLI and a [`CodeGenerator`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use autodeploy_core::{
    AdapterError, AdapterResult, ChangeItem, ChangePlan, ChangeTarget, CodeChangeResult,
    CodeChanger, CredentialProvider, GitSettings, LlmSettings, PushStatus, SecretKey,
};
use tracing::{info, warn};

use crate::generator::{CodeGenerator, GenerationRequest};
use crate::git::{authenticated_url, Git};
use crate::workspace::{apply_edits, branch_name, matching_files, read_context, working_copy};

pub struct GitCodeChanger {
    git: Git,
    generator: Arc<dyn CodeGenerator>,
    settings: GitSettings,
    root: PathBuf,
    username: Option<String>,
    token: Option<String>,
    max_context_bytes: usize,
}

impl std::fmt::Debug for GitCodeChanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCodeChanger")
            .field("root", &self.root)
            .field("base_branch", &self.settings.default_branch)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GitCodeChanger {
    pub fn new(
        settings: &GitSettings,
        llm: &LlmSettings,
        generator: Arc<dyn CodeGenerator>,
        credentials: &dyn CredentialProvider,
    ) -> Self {
        let username = credentials
            .get(SecretKey::GitUsername)
            .map(|s| s.expose().to_string());
        let token = credentials
            .get(SecretKey::GitToken)
            .map(|s| s.expose().to_string());
        let git = match &token {
            Some(token) => Git::new().redacting(token.clone()),
            None => Git::new(),
        };
        Self {
            git,
            generator,
            settings: settings.clone(),
            root: settings.workspace_root(),
            username,
            token,
            max_context_bytes: llm.max_context_bytes,
        }
    }

    fn remote_url(&self, repo_url: &str) -> String {
        authenticated_url(repo_url, self.username.as_deref(), self.token.as_deref())
    }

    /// Clone into `dir`, or refresh an existing clone from a previous attempt.
    async fn prepare(&self, dir: &Path, repo_url: &str) -> AdapterResult<()> {
        let base = self.settings.default_branch.as_str();
        if dir.join(".git").is_dir() {
            info!(event = "vcs.reuse", dir = %dir.display());
            self.git
                .run(dir, &["fetch", "--prune", "origin"])
                .await
                .map_err(|f| f.into_adapter(true))?;
            self.git
                .run(dir, &["reset", "--hard"])
                .await
                .map_err(|f| f.into_adapter(false))?;
            self.git
                .run(dir, &["clean", "-fdq"])
                .await
                .map_err(|f| f.into_adapter(false))?;
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AdapterError::internal(format!("creating {}: {e}", self.root.display())))?;
        let dir_str = dir.to_string_lossy();
        let remote = self.remote_url(repo_url);
        info!(event = "vcs.clone", repo = %repo_url, base, dir = %dir.display());
        if let Err(failure) = self
            .git
            .run(
                &self.root,
                &["clone", "--branch", base, remote.as_str(), dir_str.as_ref()],
            )
            .await
        {
            // A half-written clone would be mistaken for a reusable one.
            let _ = tokio::fs::remove_dir_all(dir).await;
            return Err(failure.into_adapter(true));
        }
        Ok(())
    }

    /// Generate, write and commit one change. `None` when nothing changed.
    async fn apply_change(
        &self,
        dir: &Path,
        change: &ChangeItem,
    ) -> AdapterResult<Option<String>> {
        let files = matching_files(dir, &change.target)?;
        let context = read_context(dir, &files, self.max_context_bytes).await?;
        let request = GenerationRequest {
            intent: change.intent.clone(),
            rationale: change.rationale.clone(),
            target: change.target.clone(),
            files: context,
        };
        let edits = self.generator.generate(&request).await?;
        apply_edits(dir, &edits).await?;

        self.git
            .run(dir, &["add", "-A"])
            .await
            .map_err(|f| f.into_adapter(false))?;
        let status = self
            .git
            .run(dir, &["status", "--porcelain"])
            .await
            .map_err(|f| f.into_adapter(false))?;
        if status.is_empty() {
            warn!(target_pattern = %change.target, "change produced no diff");
            return Ok(None);
        }

        let message = format!("auto-deploy: {}", change.intent);
        let name = format!("user.name={}", self.settings.author_name);
        let email = format!("user.email={}", self.settings.author_email);
        self.git
            .run(dir, &["-c", &name, "-c", &email, "commit", "-q", "-m", &message])
            .await
            .map_err(|f| f.into_adapter(false))?;
        let sha = self
            .git
            .run(dir, &["rev-parse", "HEAD"])
            .await
            .map_err(|f| f.into_adapter(false))?;
        info!(event = "vcs.committed", commit = %sha, intent = %change.intent);
        Ok(Some(sha))
    }

    async fn scratch_repo(&self, target: &ChangeTarget) -> AdapterResult<PathBuf> {
        let dir = working_copy(&self.root, target).with_extension("revert");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AdapterError::internal(format!("creating {}: {e}", dir.display())))?;
        self.git
            .run(&dir, &["init", "-q"])
            .await
            .map_err(|f| f.into_adapter(false))?;
        Ok(dir)
    }
}

#[async_trait]
impl CodeChanger for GitCodeChanger {
    async fn apply(
        &self,
        plan: &ChangePlan,
        target: &ChangeTarget,
    ) -> AdapterResult<CodeChangeResult> {
        let dir = working_copy(&self.root, target);
        let branch = branch_name(
            &self.settings.branch_prefix,
            &target.project,
            target.started_at,
        );
        let base = self.settings.default_branch.clone();

        self.prepare(&dir, &target.repo_url).await?;
        let start = format!("origin/{base}");
        self.git
            .run(&dir, &["checkout", "-q", "-B", &branch, &start])
            .await
            .map_err(|f| f.into_adapter(false))?;

        let mut commits = Vec::new();
        for change in &plan.changes {
            if let Some(sha) = self.apply_change(&dir, change).await? {
                commits.push(sha);
            }
        }
        if commits.is_empty() {
            return Err(AdapterError::apply_conflict(format!(
                "none of the {} change(s) produced a commit",
                plan.len()
            )));
        }

        // The branch belongs to this run, so a retry may overwrite it.
        self.git
            .run(&dir, &["push", "-q", "--force", "origin", &branch])
            .await
            .map_err(|f| f.into_adapter(true))?;
        info!(event = "vcs.pushed", branch = %branch, commits = commits.len());

        Ok(CodeChangeResult {
            branch,
            base_branch: base,
            commits,
            push: PushStatus::Pushed,
        })
    }

    async fn revert(&self, result: &CodeChangeResult, target: &ChangeTarget) -> AdapterResult<()> {
        let scratch = self.scratch_repo(target).await?;
        let remote = self.remote_url(&target.repo_url);
        let outcome = self
            .git
            .run(
                &scratch,
                &["push", "-q", remote.as_str(), "--delete", result.branch.as_str()],
            )
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(dir = %scratch.display(), error = %e, "could not remove scratch repository");
        }

        match outcome {
            Ok(_) => {
                info!(event = "vcs.branch_deleted", branch = %result.branch);
                Ok(())
            }
            Err(failure) if failure.remote_ref_missing() => {
                info!(branch = %result.branch, "branch already absent on remote");
                Ok(())
            }
            Err(failure) => Err(failure.into_adapter(true)),
        }
    }

    async fn release(&self, target: &ChangeTarget) -> AdapterResult<()> {
        let dir = working_copy(&self.root, target);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(event = "vcs.released", dir = %dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AdapterError::internal(format!(
                "removing {}: {e}",
                dir.display()
            ))),
        }
    }
}
