//! Storage seam for the build lifecycle.
//!
//! Services only see [`BuildRepository`] (queries and writes within one
//! transaction) and [`CoverageStore`] (transaction boundaries). Postgres backs
//! both in production; tests use the in-memory store.

pub mod pg;

#[cfg(test)]
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::build::{Build, BuildChangeset, BuildUpdate, NewBuild};
use crate::models::job::{Job, NewJob};
use crate::models::project::Project;

/// Future returned by a transaction body borrowing the repository for `'r`.
pub type RepoFuture<'r, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'r>>;

/// Project, build and job operations available inside one transaction.
#[async_trait]
pub trait BuildRepository: Send {
    /// Serialize writes for a project until the transaction ends. Taking it
    /// again in the same transaction is a no-op.
    async fn lock_project(&mut self, project_id: i64) -> Result<()>;

    async fn find_project(&mut self, project_id: i64) -> Result<Option<Project>>;

    async fn set_project_coverage(&mut self, project_id: i64, coverage: Option<f64>)
        -> Result<()>;

    async fn find_build(&mut self, build_id: i64) -> Result<Option<Build>>;

    /// Highest build number in the project, any branch.
    async fn latest_build_number(&mut self, project_id: i64) -> Result<Option<i32>>;

    async fn find_incomplete_build(&mut self, project_id: i64) -> Result<Option<Build>>;

    async fn find_by_commit(
        &mut self,
        project_id: i64,
        branch: &str,
        commit_sha: &str,
    ) -> Result<Option<Build>>;

    /// Build on `branch` with the largest number strictly below `before`.
    async fn find_previous_build(
        &mut self,
        project_id: i64,
        branch: &str,
        before: i32,
    ) -> Result<Option<Build>>;

    /// Highest-numbered build on `branch` whose coverage is set.
    async fn latest_covered_build(&mut self, project_id: i64, branch: &str)
        -> Result<Option<Build>>;

    async fn list_builds(
        &mut self,
        project_id: i64,
        branch: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Build>>;

    /// Insert a build. A uniqueness conflict is reported as
    /// `CoverageError::DuplicateBuild` and leaves the transaction usable.
    async fn insert_build(&mut self, new_build: &NewBuild) -> Result<Build>;

    /// Apply `changes` to a locked row and return it before and after.
    async fn update_build(&mut self, build_id: i64, changes: &BuildChangeset)
        -> Result<BuildUpdate>;

    async fn insert_job(&mut self, new_job: &NewJob) -> Result<Job>;

    async fn job_coverages(&mut self, build_id: i64) -> Result<Vec<Option<f64>>>;
}

/// Runs a unit of work against a [`BuildRepository`] inside one transaction.
///
/// The body's result is committed when it returns `Ok`; an `Err` rolls back.
#[async_trait]
pub trait CoverageStore: Send + Sync {
    async fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'r> FnOnce(&'r mut dyn BuildRepository) -> RepoFuture<'r, T> + Send + 'static;
}

/// The owning project's recomputation entry point, invoked by the cascade.
#[async_trait]
pub trait ProjectCoverage: Send + Sync {
    async fn update_coverage(&self, project_id: i64) -> Result<Option<f64>>;
}
