//! cov.build: One coverage report for a project commit.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::cov_builds;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = cov_builds)]
pub struct Build {
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
    pub build_started_at: DateTime<Utc>,
    pub service_name: Option<String>,
    pub service_job_id: Option<String>,
    pub service_job_pull_request: Option<String>,
    pub create_date: Option<DateTime<Utc>>,
    pub write_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cov_builds)]
pub struct NewBuild {
    pub project_id: i64,
    pub build_number: i32,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub commit_message: Option<String>,
    pub completed: bool,
    pub previous_build_id: Option<i64>,
    pub previous_coverage: Option<f64>,
    pub build_started_at: DateTime<Utc>,
    pub service_name: Option<String>,
    pub service_job_id: Option<String>,
    pub service_job_pull_request: Option<String>,
}

/// Mutable build fields. `None` leaves a column untouched; `Some(None)`
/// clears a nullable one. `previous_*` are deliberately absent.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = cov_builds)]
pub struct BuildChangeset {
    pub coverage: Option<Option<f64>>,
    pub completed: Option<bool>,
    pub committer_name: Option<Option<String>>,
    pub committer_email: Option<Option<String>>,
    pub commit_message: Option<Option<String>>,
    pub write_date: Option<Option<DateTime<Utc>>>,
}

impl BuildChangeset {
    pub fn coverage(value: Option<f64>) -> Self {
        Self {
            coverage: Some(value),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            completed: Some(true),
            ..Default::default()
        }
    }

    /// True when no domain column would be written (`write_date` is bookkeeping).
    pub fn is_empty(&self) -> bool {
        self.coverage.is_none()
            && self.completed.is_none()
            && self.committer_name.is_none()
            && self.committer_email.is_none()
            && self.commit_message.is_none()
    }
}

/// The row before and after a single build write.
#[derive(Debug, Clone)]
pub struct BuildUpdate {
    pub before: Build,
    pub after: Build,
}

impl BuildUpdate {
    /// The coverage transition, if this write changed it.
    pub fn coverage_change(&self) -> Option<CoverageChange> {
        if self.before.coverage == self.after.coverage {
            return None;
        }
        Some(CoverageChange {
            build_id: self.after.id,
            project_id: self.after.project_id,
            previous: self.before.coverage,
            current: self.after.coverage,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageChange {
    pub build_id: i64,
    pub project_id: i64,
    pub previous: Option<f64>,
    pub current: Option<f64>,
}
