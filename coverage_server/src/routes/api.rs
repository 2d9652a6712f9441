//! JSON shapes for the REST API.

use serde::{Deserialize, Serialize};

use crate::error::CoverageError;
use crate::models::build::{Build, BuildChangeset};

#[derive(Debug, Serialize)]
pub struct ErrorJson {
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBuildsQuery {
    pub branch: Option<String>,
    pub limit: Option<i64>,
}

/// Editable build fields. Omitted fields are left as they are.
#[derive(Debug, Default, Deserialize)]
pub struct BuildPatch {
    pub coverage: Option<f64>,
    pub completed: Option<bool>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub commit_message: Option<String>,
}

impl BuildPatch {
    pub fn into_changeset(self) -> Result<BuildChangeset, CoverageError> {
        if let Some(c) = self.coverage {
            if !c.is_finite() || !(0.0..=100.0).contains(&c) {
                return Err(CoverageError::Validation(format!(
                    "coverage {c} is outside 0..=100"
                )));
            }
        }
        let text = |v: Option<String>| {
            v.map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty()))
        };

        let changes = BuildChangeset {
            coverage: self.coverage.map(Some),
            completed: self.completed,
            committer_name: text(self.committer_name),
            committer_email: text(self.committer_email),
            commit_message: text(self.commit_message),
            write_date: None,
        };
        if changes.is_empty() {
            return Err(CoverageError::Validation("no fields to update".to_string()));
        }
        Ok(changes)
    }
}

/// JSON response for a build, with the change against its predecessor.
#[derive(Debug, Serialize)]
pub struct BuildJson {
    pub id: i64,
    pub project_id: i64,
    pub build_number: i32,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub commit_message: Option<String>,
    pub coverage: Option<f64>,
    pub completed: bool,
    pub previous_build_id: Option<i64>,
    pub previous_coverage: Option<f64>,
    /// `coverage - previous_coverage` when both are known.
    pub coverage_delta: Option<f64>,
    pub build_started_at: chrono::DateTime<chrono::Utc>,
    pub service_name: Option<String>,
    pub service_job_id: Option<String>,
    pub service_job_pull_request: Option<String>,
    pub create_date: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Build> for BuildJson {
    fn from(build: Build) -> Self {
        let coverage_delta = build
            .coverage
            .zip(build.previous_coverage)
            .map(|(current, previous)| current - previous);

        Self {
            id: build.id,
            project_id: build.project_id,
            build_number: build.build_number,
            branch: build.branch,
            commit_sha: build.commit_sha,
            committer_name: build.committer_name,
            committer_email: build.committer_email,
            commit_message: build.commit_message,
            coverage: build.coverage,
            completed: build.completed,
            previous_build_id: build.previous_build_id,
            previous_coverage: build.previous_coverage,
            coverage_delta,
            build_started_at: build.build_started_at,
            service_name: build.service_name,
            service_job_id: build.service_job_id,
            service_job_pull_request: build.service_job_pull_request,
            create_date: build.create_date,
        }
    }
}
