//! On-disk archive of finished runs.
//!
//! Layout: `<dir>/<run_id>/result.json` plus `<dir>/<run_id>/result.digest`
//! holding the SHA-256 hex digest of the JSON bytes.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::domain::{DeployError, PipelineResult, Result};

const RESULT_FILE: &str = "result.json";
const DIGEST_FILE: &str = "result.digest";

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write `result` under `dir` and return the path of the JSON file.
pub fn write_run_archive(result: &PipelineResult, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&result.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let result_path = run_dir.join(RESULT_FILE);
    let json = serde_json::to_vec_pretty(result)?;
    std::fs::write(&result_path, &json)?;
    std::fs::write(run_dir.join(DIGEST_FILE), digest_hex(&json).as_bytes())?;

    Ok(result_path)
}

/// Read `<dir>/<run_id>/result.json`, verifying its digest first.
pub fn read_run_archive(run_id: &str, dir: &Path) -> Result<PipelineResult> {
    if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.contains("..") {
        return Err(DeployError::InvalidRequest(format!(
            "invalid run id '{run_id}'"
        )));
    }
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join(RESULT_FILE))?;
    let expected = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;
    let actual = digest_hex(&json);
    if expected.trim() != actual {
        return Err(DeployError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationReport, TerminalState};
    use chrono::Utc;

    fn result(run_id: &str) -> PipelineResult {
        PipelineResult {
            run_id: run_id.to_string(),
            project: "app".to_string(),
            terminal: TerminalState::Succeeded,
            stages: Vec::new(),
            errors: Vec::new(),
            notification: NotificationReport::default(),
            branch: Some("auto-deploy/app-20260101000000".to_string()),
            build: None,
            started_at: Utc::now(),
            duration_ms: 42,
        }
    }

    #[test]
    fn archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let original = result("run-a");
        let path = write_run_archive(&original, dir.path()).unwrap();
        assert!(path.ends_with("run-a/result.json"));
        assert!(dir.path().join("run-a/result.digest").exists());

        let loaded = read_run_archive("run-a", dir.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn tampered_archive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_run_archive(&result("run-b"), dir.path()).unwrap();
        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"succeeded\"", "\"failed\"");
        std::fs::write(&path, tampered).unwrap();

        let err = read_run_archive("run-b", dir.path()).unwrap_err();
        assert!(matches!(err, DeployError::DigestMismatch { .. }));
    }

    #[test]
    fn missing_run_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_run_archive("nope", dir.path()).unwrap_err();
        assert!(matches!(err, DeployError::Io(_)));
    }

    #[test]
    fn path_like_run_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_run_archive("../etc", dir.path()).unwrap_err();
        assert!(matches!(err, DeployError::InvalidRequest(_)));
    }
}
