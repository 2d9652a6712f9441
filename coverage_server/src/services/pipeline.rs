//! Build pipeline: the entry points the HTTP layer calls.
//!
//! Each operation runs as one transaction through the [`CoverageStore`].
//! When that transaction changed a build's coverage, the owning project is
//! recomputed afterwards through the [`CascadeUpdater`], so a slow or failing
//! project update never holds or undoes the build write.

use serde::Serialize;

use crate::error::{CoverageError, Result};
use crate::models::build::{Build, BuildChangeset, BuildUpdate};
use crate::models::job::Job;
use crate::models::payload::IngestPayload;
use crate::services::cascade::CascadeUpdater;
use crate::services::{build_service, coverage_service, job_service};
use crate::store::{CoverageStore, ProjectCoverage};

/// Result of a job submission: the build after its coverage update, and the job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub build: Build,
    pub job: Job,
}

pub struct BuildPipeline<S, P> {
    store: S,
    projects: P,
    cascade: CascadeUpdater,
}

impl<S, P> BuildPipeline<S, P>
where
    S: CoverageStore,
    P: ProjectCoverage,
{
    pub fn new(store: S, projects: P, cascade: CascadeUpdater) -> Self {
        Self {
            store,
            projects,
            cascade,
        }
    }

    /// Find or create the build a report belongs to.
    pub async fn get_or_create(&self, project_id: i64, payload: IngestPayload) -> Result<Build> {
        self.store
            .in_transaction(move |repo| {
                Box::pin(async move {
                    build_service::get_or_create(repo, project_id, &payload).await
                })
            })
            .await
    }

    /// Record a job report: resolve its build, store the job, and refresh the
    /// build's coverage.
    pub async fn submit_job(&self, project_id: i64, payload: IngestPayload) -> Result<JobReport> {
        let (update, job) = self
            .store
            .in_transaction(move |repo| {
                Box::pin(async move {
                    let build = build_service::get_or_create(repo, project_id, &payload).await?;
                    let job = job_service::record_job(repo, &build, &payload).await?;
                    let update = coverage_service::update_coverage(repo, build.id).await?;
                    Ok((update, job))
                })
            })
            .await?;

        self.after_commit(&update).await;
        Ok(JobReport {
            build: update.after,
            job,
        })
    }

    pub async fn update_coverage(&self, build_id: i64) -> Result<Build> {
        let update = self
            .store
            .in_transaction(move |repo| {
                Box::pin(async move { coverage_service::update_coverage(repo, build_id).await })
            })
            .await?;

        self.after_commit(&update).await;
        Ok(update.after)
    }

    /// Write mutable build fields.
    pub async fn update_build(&self, build_id: i64, changes: BuildChangeset) -> Result<Build> {
        let update = self
            .store
            .in_transaction(move |repo| {
                Box::pin(async move { build_service::update_build(repo, build_id, changes).await })
            })
            .await?;

        self.after_commit(&update).await;
        Ok(update.after)
    }

    /// Mark a parallel build as completed.
    pub async fn close_build(&self, project_id: i64, build_id: i64) -> Result<Build> {
        let update = self
            .store
            .in_transaction(move |repo| {
                Box::pin(async move { build_service::close_build(repo, project_id, build_id).await })
            })
            .await?;

        self.after_commit(&update).await;
        Ok(update.after)
    }

    pub async fn find_build(&self, build_id: i64) -> Result<Build> {
        self.store
            .in_transaction(move |repo| {
                Box::pin(async move {
                    repo.find_build(build_id)
                        .await?
                        .ok_or(CoverageError::BuildNotFound(build_id))
                })
            })
            .await
    }

    /// Builds of a project, newest first.
    pub async fn list_builds(
        &self,
        project_id: i64,
        branch: Option<String>,
        limit: i64,
    ) -> Result<Vec<Build>> {
        self.store
            .in_transaction(move |repo| {
                Box::pin(async move {
                    repo.list_builds(project_id, branch.as_deref(), limit)
                        .await
                })
            })
            .await
    }

    async fn after_commit(&self, update: &BuildUpdate) {
        if let Some(change) = update.coverage_change() {
            self.cascade.run(&self.projects, &change).await;
        }
    }
}
