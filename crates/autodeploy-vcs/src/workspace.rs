//! Working-copy layout: branch naming, target matching and edit application.

use std::path::{Path, PathBuf};

use autodeploy_core::{AdapterError, AdapterResult, ChangeTarget};
use chrono::{DateTime, Utc};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::generator::{check_repo_path, FileEdit, SourceFile};

/// Lowercase ASCII slug: runs of anything else collapse into one `-`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "project".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<prefix>/<project-slug>-<YYYYmmddHHMMSS>`; stable for one run.
pub fn branch_name(prefix: &str, project: &str, started_at: DateTime<Utc>) -> String {
    format!(
        "{}/{}-{}",
        prefix.trim_end_matches('/'),
        slug(project),
        started_at.format("%Y%m%d%H%M%S")
    )
}

/// Working copy of one run, so that retries of the run reuse it.
pub fn working_copy(root: &Path, target: &ChangeTarget) -> PathBuf {
    let digest = hex::encode(Sha256::digest(target.repo_url.as_bytes()));
    root.join(format!(
        "{}-{}-{}",
        slug(&target.project),
        target.started_at.format("%Y%m%d%H%M%S"),
        &digest[..12]
    ))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Repository-relative files matching `pattern`, sorted.
///
/// A plain path matches itself only; it may not exist yet. Globs are
/// evaluated with `.gitignore` rules applied. Targets outside the working
/// copy or inside `.git` are an `ApplyConflict`.
pub fn matching_files(repo: &Path, pattern: &str) -> AdapterResult<Vec<String>> {
    let pattern = pattern.trim().trim_start_matches("./");
    check_repo_path(pattern, "change target")?;
    if !is_glob(pattern) {
        let full = repo.join(pattern);
        if !full.is_file() {
            return Ok(Vec::new());
        }
        ensure_inside(repo, &full, pattern)?;
        return Ok(vec![pattern.to_string()]);
    }

    let overrides = OverrideBuilder::new(repo)
        .add(pattern)
        .and_then(|b| b.build())
        .map_err(|e| AdapterError::apply_conflict(format!("bad target pattern {pattern}: {e}")))?;
    let mut files = Vec::new();
    for entry in WalkBuilder::new(repo).overrides(overrides).build() {
        let entry = entry.map_err(|e| AdapterError::internal(format!("walking {pattern}: {e}")))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if entry.path().components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(repo) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    Ok(files)
}

/// Symlinks may still point out of the working copy.
fn ensure_inside(repo: &Path, full: &Path, pattern: &str) -> AdapterResult<()> {
    let root = repo
        .canonicalize()
        .map_err(|e| AdapterError::internal(format!("resolving {}: {e}", repo.display())))?;
    let resolved = full
        .canonicalize()
        .map_err(|e| AdapterError::internal(format!("resolving {pattern}: {e}")))?;
    if !resolved.starts_with(&root) || resolved.starts_with(root.join(".git")) {
        return Err(AdapterError::apply_conflict(format!(
            "change target {pattern:?} resolves outside the working copy"
        )));
    }
    Ok(())
}

/// Read the files as generator context, stopping at `budget` bytes.
pub async fn read_context(
    repo: &Path,
    files: &[String],
    budget: usize,
) -> AdapterResult<Vec<SourceFile>> {
    let mut used = 0usize;
    let mut out = Vec::new();
    for path in files {
        let bytes = tokio::fs::read(repo.join(path))
            .await
            .map_err(|e| AdapterError::internal(format!("reading {path}: {e}")))?;
        let Ok(content) = String::from_utf8(bytes) else {
            debug!(path, "skipping binary file");
            continue;
        };
        if used + content.len() > budget {
            debug!(path, used, budget, "context budget reached");
            break;
        }
        used += content.len();
        out.push(SourceFile {
            path: path.clone(),
            content,
        });
    }
    Ok(out)
}

/// Write or delete each edited file under `repo`.
pub async fn apply_edits(repo: &Path, edits: &[FileEdit]) -> AdapterResult<()> {
    for edit in edits {
        edit.check_path()?;
        let full = repo.join(&edit.path);
        match &edit.content {
            Some(content) => {
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        AdapterError::apply_conflict(format!("creating {}: {e}", parent.display()))
                    })?;
                }
                tokio::fs::write(&full, content).await.map_err(|e| {
                    AdapterError::apply_conflict(format!("writing {}: {e}", edit.path))
                })?;
            }
            None => match tokio::fs::remove_file(&full).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %edit.path, "deleted file already absent")
                }
                Err(e) => {
                    return Err(AdapterError::apply_conflict(format!(
                        "deleting {}: {e}",
                        edit.path
                    )))
                }
            },
        }
    }
    Ok(())
}
