//! Ingestion payload: the fields of a job report this server consumes.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::CoverageError;

/// A job report as posted by a CI service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestPayload {
    /// Accepted for compatibility but never used: numbers are always allocated.
    pub build_number: Option<i64>,
    pub git: Option<GitInfo>,
    pub service_name: Option<String>,
    pub service_job_id: Option<String>,
    pub service_job_pull_request: Option<String>,
    /// Leave the build open until an explicit "done" call.
    pub parallel: Option<bool>,
    pub build_started_at: Option<DateTime<Utc>>,
    /// This job's coverage percentage.
    pub coverage: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitInfo {
    pub branch: Option<String>,
    pub head: Option<GitHead>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHead {
    pub id: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub message: Option<String>,
}

/// Commit snapshot after trimming and defaulting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub branch: String,
    pub commit_sha: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub message: Option<String>,
}

impl IngestPayload {
    /// Normalize the git section: trim every string, default the branch to
    /// `""`, and drop optional values that are empty after trimming.
    pub fn commit_info(&self) -> CommitInfo {
        let git = self.git.as_ref();
        let head = git.and_then(|g| g.head.as_ref());

        CommitInfo {
            branch: git
                .and_then(|g| g.branch.as_deref())
                .map(|b| b.trim().to_string())
                .unwrap_or_default(),
            commit_sha: trimmed(head.and_then(|h| h.id.as_deref())),
            committer_name: trimmed(head.and_then(|h| h.committer_name.as_deref())),
            committer_email: trimmed(head.and_then(|h| h.committer_email.as_deref())),
            message: trimmed(head.and_then(|h| h.message.as_deref())),
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel.unwrap_or(false)
    }

    /// Reject a job coverage that is not a finite percentage.
    pub fn validate(&self) -> Result<(), CoverageError> {
        match self.coverage {
            Some(c) if !c.is_finite() || !(0.0..=100.0).contains(&c) => Err(
                CoverageError::Validation(format!("job coverage {c} is outside 0..=100")),
            ),
            _ => Ok(()),
        }
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
