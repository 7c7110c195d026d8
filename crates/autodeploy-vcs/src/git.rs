//! Thin async wrapper around the `git` executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use autodeploy_core::{AdapterError, ErrorKind};
use tokio::process::Command;
use tracing::debug;

/// A failed `git` invocation.
#[derive(Debug, Clone)]
pub struct GitFailure {
    pub command: String,
    pub stderr: String,
}

impl GitFailure {
    /// Classify the failure. Remote operations default to
    /// `RepositoryUnreachable`, local ones to `Internal`.
    pub fn into_adapter(self, remote: bool) -> AdapterError {
        let kind = classify(&self.stderr, remote);
        AdapterError::new(kind, format!("{} failed: {}", self.command, self.stderr.trim()))
    }

    pub fn remote_ref_missing(&self) -> bool {
        let stderr = self.stderr.to_lowercase();
        stderr.contains("remote ref does not exist") || stderr.contains("unable to delete")
    }
}

/// Maps git's stderr onto the pipeline error taxonomy.
pub fn classify(stderr: &str, remote: bool) -> ErrorKind {
    let stderr = stderr.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| stderr.contains(n));

    if any(&[
        "authentication failed",
        "permission denied",
        "could not read username",
        "invalid username or password",
        "the requested url returned error: 401",
        "the requested url returned error: 403",
    ]) {
        ErrorKind::Unauthorized
    } else if any(&[
        "[rejected]",
        "[remote rejected]",
        "non-fast-forward",
        "protected branch",
        "hook declined",
        "failed to push some refs",
    ]) {
        ErrorKind::PushRejected
    } else if remote
        || any(&[
            "could not resolve host",
            "connection refused",
            "connection timed out",
            "unable to access",
            "could not read from remote repository",
        ])
    {
        ErrorKind::RepositoryUnreachable
    } else {
        ErrorKind::Internal
    }
}

/// Runs git commands with prompts disabled and secrets masked in errors.
#[derive(Clone)]
pub struct Git {
    program: PathBuf,
    secrets: Vec<String>,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("program", &self.program)
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl Default for Git {
    fn default() -> Self {
        Self::new()
    }
}

impl Git {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            secrets: Vec::new(),
        }
    }

    /// Mask `secret` wherever it shows up in command lines or stderr.
    pub fn redacting(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret, "***"))
    }

    /// Run `git <args>` in `dir` and return trimmed stdout.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitFailure> {
        let command = self.redact(&format!("git {}", args.join(" ")));
        debug!(dir = %dir.display(), %command, "running git");

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GitFailure {
                command: command.clone(),
                stderr: format!("failed to run git: {e}"),
            })?;

        if !output.status.success() {
            return Err(GitFailure {
                command,
                stderr: self.redact(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Repository URL with `username:token@` injected for HTTP(S) remotes.
/// Other URLs (ssh, local paths) are returned unchanged.
pub fn authenticated_url(repo_url: &str, username: Option<&str>, token: Option<&str>) -> String {
    let Some(token) = token else {
        return repo_url.to_string();
    };
    let Some((scheme, rest)) = repo_url.split_once("://") else {
        return repo_url.to_string();
    };
    if !scheme.starts_with("http") || rest.contains('@') {
        return repo_url.to_string();
    }
    let user = username.unwrap_or("oauth2");
    format!("{scheme}://{user}:{token}@{rest}")
}
