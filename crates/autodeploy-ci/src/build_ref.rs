//! Encoding of Jenkins queue items and builds in an opaque [`BuildId`].
//!
//! The adapter keeps no state between calls, so the id carries everything
//! needed to find the build again: `<job>#queue-<n>` while queued and
//! `<job>#<n>` once Jenkins assigned a build number.

use autodeploy_core::{AdapterError, BuildId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildRef {
    Queued { job: String, item: u64 },
    Build { job: String, number: u64 },
}

impl BuildRef {
    pub fn job(&self) -> &str {
        match self {
            BuildRef::Queued { job, .. } | BuildRef::Build { job, .. } => job,
        }
    }

    pub fn to_id(&self) -> BuildId {
        match self {
            BuildRef::Queued { job, item } => BuildId::new(format!("{job}#queue-{item}")),
            BuildRef::Build { job, number } => BuildId::new(format!("{job}#{number}")),
        }
    }

    pub fn parse(id: &BuildId) -> Result<Self, AdapterError> {
        let invalid = || AdapterError::internal(format!("not a Jenkins build id: {id}"));
        let (job, tail) = id.as_str().rsplit_once('#').ok_or_else(invalid)?;
        if job.is_empty() {
            return Err(invalid());
        }
        let job = job.to_string();
        match tail.strip_prefix("queue-") {
            Some(item) => Ok(BuildRef::Queued {
                job,
                item: item.parse().map_err(|_| invalid())?,
            }),
            None => Ok(BuildRef::Build {
                job,
                number: tail.parse().map_err(|_| invalid())?,
            }),
        }
    }
}

/// URL path segments of a job; folders `a/b` become `job/a/job/b`.
pub fn job_segments(job: &str) -> Vec<&str> {
    job.split('/')
        .filter(|part| !part.is_empty())
        .flat_map(|part| ["job", part])
        .collect()
}
