//! cov.job: A single CI job's coverage submission.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::cov_jobs;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = cov_jobs)]
pub struct Job {
    pub id: i64,
    pub build_id: i64,
    pub service_job_id: Option<String>,
    pub coverage: Option<f64>,
    pub create_date: Option<DateTime<Utc>>,
    pub write_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cov_jobs)]
pub struct NewJob {
    pub build_id: i64,
    pub service_job_id: Option<String>,
    pub coverage: Option<f64>,
}
