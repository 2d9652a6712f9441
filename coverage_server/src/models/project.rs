//! cov.project: A tracked repository and its aggregate coverage.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::cov_projects;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = cov_projects)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repo_name: String,
    pub default_branch: String,
    pub coverage: Option<f64>,
    pub active: bool,
    pub create_date: Option<DateTime<Utc>>,
    pub write_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = cov_projects)]
pub struct NewProject {
    pub name: String,
    pub repo_name: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "active")]
    pub active: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

fn active() -> bool {
    true
}
