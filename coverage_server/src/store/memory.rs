//! In-memory store used by the service tests.
//!
//! Enforces the same uniqueness rules as the Postgres indexes. Every call
//! yields to the scheduler first so concurrent units of work interleave at
//! each await point. Failed units of work are not rolled back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use crate::error::{CoverageError, Result};
use crate::models::build::{Build, BuildChangeset, BuildUpdate, NewBuild};
use crate::models::job::{Job, NewJob};
use crate::models::project::Project;
use crate::services::project_service;
use crate::store::{BuildRepository, CoverageStore, ProjectCoverage, RepoFuture};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    projects: Vec<Project>,
    builds: Vec<Build>,
    jobs: Vec<Job>,
    project_locks: HashMap<i64, Arc<tokio::sync::Mutex<()>>>,
    /// Inserted right before the next build insert, as a concurrent writer would.
    competing_insert: Option<NewBuild>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_build(&mut self, new_build: &NewBuild) -> Result<Build> {
        let conflict = self.builds.iter().find_map(|b| {
            if b.project_id != new_build.project_id {
                return None;
            }
            if b.build_number == new_build.build_number {
                return Some("uq_cov_builds_number");
            }
            let same_commit = new_build.commit_sha.is_some()
                && b.branch == new_build.branch
                && b.commit_sha == new_build.commit_sha;
            same_commit.then_some("uq_cov_builds_commit")
        });
        if let Some(constraint) = conflict {
            return Err(CoverageError::DuplicateBuild {
                project_id: new_build.project_id,
                constraint: constraint.to_string(),
            });
        }

        let now = Utc::now();
        let build = Build {
            id: self.next_id(),
            project_id: new_build.project_id,
            build_number: new_build.build_number,
            branch: new_build.branch.clone(),
            commit_sha: new_build.commit_sha.clone(),
            committer_name: new_build.committer_name.clone(),
            committer_email: new_build.committer_email.clone(),
            commit_message: new_build.commit_message.clone(),
            coverage: None,
            completed: new_build.completed,
            previous_build_id: new_build.previous_build_id,
            previous_coverage: new_build.previous_coverage,
            build_started_at: new_build.build_started_at,
            service_name: new_build.service_name.clone(),
            service_job_id: new_build.service_job_id.clone(),
            service_job_pull_request: new_build.service_job_pull_request.clone(),
            create_date: Some(now),
            write_date: Some(now),
        };
        self.builds.push(build.clone());
        Ok(build)
    }

    fn builds_of(&self, project_id: i64) -> impl Iterator<Item = &Build> {
        self.builds.iter().filter(move |b| b.project_id == project_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    project_locks: bool,
    coverage_updates: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Store with per-project locking, like the advisory lock in Postgres.
    pub fn new() -> Self {
        Self {
            project_locks: true,
            ..Default::default()
        }
    }

    /// Store that relies on uniqueness conflicts alone to catch races.
    pub fn without_project_locks() -> Self {
        Self::default()
    }

    pub fn add_project(&self, name: &str, default_branch: &str) -> Project {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let project = Project {
            id: state.next_id(),
            name: name.to_string(),
            repo_name: format!("acme/{name}"),
            default_branch: default_branch.to_string(),
            coverage: None,
            active: true,
            create_date: Some(now),
            write_date: Some(now),
        };
        state.projects.push(project.clone());
        project
    }

    /// Insert a build directly, bypassing the deduplicator.
    pub fn seed_build(&self, new_build: NewBuild) -> Build {
        self.state.lock().unwrap().insert_build(&new_build).unwrap()
    }

    pub fn set_build_coverage(&self, build_id: i64, coverage: Option<f64>) {
        let mut state = self.state.lock().unwrap();
        if let Some(build) = state.builds.iter_mut().find(|b| b.id == build_id) {
            build.coverage = coverage;
        }
    }

    pub fn seed_job(&self, build_id: i64, coverage: Option<f64>) -> Job {
        let mut state = self.state.lock().unwrap();
        let job = Job {
            id: state.next_id(),
            build_id,
            service_job_id: None,
            coverage,
            create_date: None,
            write_date: None,
        };
        state.jobs.push(job.clone());
        job
    }

    /// Make the next build insert lose a race against `competitor`.
    pub fn race_next_insert(&self, competitor: NewBuild) {
        self.state.lock().unwrap().competing_insert = Some(competitor);
    }

    pub fn builds(&self) -> Vec<Build> {
        self.state.lock().unwrap().builds.clone()
    }

    pub fn build(&self, build_id: i64) -> Option<Build> {
        self.builds().into_iter().find(|b| b.id == build_id)
    }

    pub fn project(&self, project_id: i64) -> Option<Project> {
        let state = self.state.lock().unwrap();
        state.projects.iter().find(|p| p.id == project_id).cloned()
    }

    /// Number of project recomputations run through [`ProjectCoverage`].
    pub fn coverage_updates(&self) -> usize {
        self.coverage_updates.load(Ordering::SeqCst)
    }
}

pub struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
    project_locks: bool,
    // Held until the unit of work finishes, like a transaction-scoped lock.
    guards: Vec<(i64, OwnedMutexGuard<()>)>,
}

impl MemoryRepository {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}

#[async_trait]
impl BuildRepository for MemoryRepository {
    async fn lock_project(&mut self, project_id: i64) -> Result<()> {
        tokio::task::yield_now().await;
        // Re-entrant within one unit of work.
        if !self.project_locks || self.guards.iter().any(|(id, _)| *id == project_id) {
            return Ok(());
        }
        let lock = self.with_state(|s| s.project_locks.entry(project_id).or_default().clone());
        self.guards.push((project_id, lock.lock_owned().await));
        Ok(())
    }

    async fn find_project(&mut self, project_id: i64) -> Result<Option<Project>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            s.projects
                .iter()
                .find(|p| p.id == project_id && p.active)
                .cloned()
        }))
    }

    async fn set_project_coverage(
        &mut self,
        project_id: i64,
        coverage: Option<f64>,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        self.with_state(|s| {
            if let Some(project) = s.projects.iter_mut().find(|p| p.id == project_id) {
                project.coverage = coverage;
                project.write_date = Some(Utc::now());
            }
        });
        Ok(())
    }

    async fn find_build(&mut self, build_id: i64) -> Result<Option<Build>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| s.builds.iter().find(|b| b.id == build_id).cloned()))
    }

    async fn latest_build_number(&mut self, project_id: i64) -> Result<Option<i32>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| s.builds_of(project_id).map(|b| b.build_number).max()))
    }

    async fn find_incomplete_build(&mut self, project_id: i64) -> Result<Option<Build>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            s.builds_of(project_id)
                .filter(|b| !b.completed)
                .max_by_key(|b| b.build_number)
                .cloned()
        }))
    }

    async fn find_by_commit(
        &mut self,
        project_id: i64,
        branch: &str,
        commit_sha: &str,
    ) -> Result<Option<Build>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            s.builds_of(project_id)
                .find(|b| b.branch == branch && b.commit_sha.as_deref() == Some(commit_sha))
                .cloned()
        }))
    }

    async fn find_previous_build(
        &mut self,
        project_id: i64,
        branch: &str,
        before: i32,
    ) -> Result<Option<Build>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            s.builds_of(project_id)
                .filter(|b| b.branch == branch && b.build_number < before)
                .max_by_key(|b| b.build_number)
                .cloned()
        }))
    }

    async fn latest_covered_build(
        &mut self,
        project_id: i64,
        branch: &str,
    ) -> Result<Option<Build>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            s.builds_of(project_id)
                .filter(|b| b.branch == branch && b.coverage.is_some())
                .max_by_key(|b| b.build_number)
                .cloned()
        }))
    }

    async fn list_builds(
        &mut self,
        project_id: i64,
        branch: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Build>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            let mut builds: Vec<Build> = s
                .builds_of(project_id)
                .filter(|b| branch.map_or(true, |br| b.branch == br))
                .cloned()
                .collect();
            builds.sort_by(|a, b| b.build_number.cmp(&a.build_number));
            builds.truncate(usize::try_from(limit).unwrap_or(0));
            builds
        }))
    }

    async fn insert_build(&mut self, new_build: &NewBuild) -> Result<Build> {
        tokio::task::yield_now().await;
        self.with_state(|s| {
            if let Some(competitor) = s.competing_insert.take() {
                s.insert_build(&competitor)?;
            }
            s.insert_build(new_build)
        })
    }

    async fn update_build(
        &mut self,
        build_id: i64,
        changes: &BuildChangeset,
    ) -> Result<BuildUpdate> {
        tokio::task::yield_now().await;
        self.with_state(|s| {
            let build = s
                .builds
                .iter_mut()
                .find(|b| b.id == build_id)
                .ok_or(CoverageError::BuildNotFound(build_id))?;
            let before = build.clone();
            if changes.is_empty() {
                return Ok(BuildUpdate {
                    after: before.clone(),
                    before,
                });
            }
            if let Some(coverage) = changes.coverage {
                build.coverage = coverage;
            }
            if let Some(completed) = changes.completed {
                build.completed = completed;
            }
            if let Some(name) = &changes.committer_name {
                build.committer_name = name.clone();
            }
            if let Some(email) = &changes.committer_email {
                build.committer_email = email.clone();
            }
            if let Some(message) = &changes.commit_message {
                build.commit_message = message.clone();
            }
            if let Some(write_date) = changes.write_date {
                build.write_date = write_date;
            }
            Ok(BuildUpdate {
                before,
                after: build.clone(),
            })
        })
    }

    async fn insert_job(&mut self, new_job: &NewJob) -> Result<Job> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            let now = Utc::now();
            let job = Job {
                id: s.next_id(),
                build_id: new_job.build_id,
                service_job_id: new_job.service_job_id.clone(),
                coverage: new_job.coverage,
                create_date: Some(now),
                write_date: Some(now),
            };
            s.jobs.push(job.clone());
            job
        }))
    }

    async fn job_coverages(&mut self, build_id: i64) -> Result<Vec<Option<f64>>> {
        tokio::task::yield_now().await;
        Ok(self.with_state(|s| {
            s.jobs
                .iter()
                .filter(|j| j.build_id == build_id)
                .map(|j| j.coverage)
                .collect()
        }))
    }
}

#[async_trait]
impl CoverageStore for MemoryStore {
    async fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'r> FnOnce(&'r mut dyn BuildRepository) -> RepoFuture<'r, T> + Send + 'static,
    {
        let mut repo = MemoryRepository {
            state: self.state.clone(),
            project_locks: self.project_locks,
            guards: Vec::new(),
        };
        f(&mut repo).await
    }
}

#[async_trait]
impl ProjectCoverage for MemoryStore {
    async fn update_coverage(&self, project_id: i64) -> Result<Option<f64>> {
        self.coverage_updates.fetch_add(1, Ordering::SeqCst);
        self.in_transaction(move |repo| {
            Box::pin(async move { project_service::update_coverage(repo, project_id).await })
        })
        .await
    }
}
