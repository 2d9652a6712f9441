//! Build lifecycle: number allocation, branch chain resolution, deduplication.
//!
//! Everything here runs inside the caller's transaction; see
//! [`crate::services::pipeline`] for the transaction boundaries.

use chrono::Utc;

use crate::error::{CoverageError, Result};
use crate::models::build::{Build, BuildChangeset, BuildUpdate, NewBuild};
use crate::models::payload::{CommitInfo, IngestPayload};
use crate::store::BuildRepository;

/// Creation attempts before a persistent uniqueness conflict is returned.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Next build number for a project: highest existing number + 1, any branch.
pub async fn next_build_number<R>(repo: &mut R, project_id: i64) -> Result<i32>
where
    R: BuildRepository + ?Sized,
{
    match repo.latest_build_number(project_id).await? {
        None => Ok(1),
        Some(latest) => latest.checked_add(1).ok_or_else(|| {
            CoverageError::Validation(format!(
                "project {project_id} has exhausted its build numbers"
            ))
        }),
    }
}

/// Nearest earlier build on the same branch, if any.
pub async fn find_previous_build<R>(
    repo: &mut R,
    project_id: i64,
    build_number: i32,
    branch: &str,
) -> Result<Option<Build>>
where
    R: BuildRepository + ?Sized,
{
    repo.find_previous_build(project_id, branch, build_number)
        .await
}

/// Return the build a report belongs to, creating it when none matches.
///
/// An incomplete build always wins, whatever branch or commit the report
/// names. Then an exact `(branch, commit_sha)` match. Otherwise a new build
/// is created under the project lock; losing a uniqueness race to a
/// concurrent writer falls back to the lookup.
pub async fn get_or_create<R>(
    repo: &mut R,
    project_id: i64,
    payload: &IngestPayload,
) -> Result<Build>
where
    R: BuildRepository + ?Sized,
{
    payload.validate()?;
    if repo.find_project(project_id).await?.is_none() {
        return Err(CoverageError::Validation(format!(
            "unknown project {project_id}"
        )));
    }
    repo.lock_project(project_id).await?;

    let commit = payload.commit_info();
    let mut last_conflict = None;

    for attempt in 1..=MAX_CREATE_ATTEMPTS {
        if let Some(build) = find_existing(repo, project_id, &commit).await? {
            return Ok(build);
        }

        match create_build(repo, project_id, &commit, payload).await {
            Ok(build) => return Ok(build),
            Err(CoverageError::DuplicateBuild {
                project_id,
                constraint,
            }) => {
                tracing::warn!(
                    project_id,
                    attempt,
                    constraint = %constraint,
                    "Build creation lost a race, retrying as lookup"
                );
                crate::metrics::duplicate_race(&constraint);
                last_conflict = Some(CoverageError::DuplicateBuild {
                    project_id,
                    constraint,
                });
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_conflict.unwrap_or_else(|| {
        CoverageError::Validation(format!("could not create a build for project {project_id}"))
    }))
}

/// Steps 1 and 2 of the deduplication order.
async fn find_existing<R>(
    repo: &mut R,
    project_id: i64,
    commit: &CommitInfo,
) -> Result<Option<Build>>
where
    R: BuildRepository + ?Sized,
{
    if let Some(build) = repo.find_incomplete_build(project_id).await? {
        tracing::debug!(
            build_id = build.id,
            project_id,
            "Attaching report to incomplete build"
        );
        crate::metrics::build_reused("incomplete");
        return Ok(Some(build));
    }

    let Some(sha) = commit.commit_sha.as_deref() else {
        return Ok(None);
    };
    let existing = repo.find_by_commit(project_id, &commit.branch, sha).await?;
    if let Some(build) = &existing {
        tracing::debug!(
            build_id = build.id,
            project_id,
            branch = %build.branch,
            commit_sha = sha,
            "Reusing build for commit"
        );
        crate::metrics::build_reused("commit");
    }
    Ok(existing)
}

async fn create_build<R>(
    repo: &mut R,
    project_id: i64,
    commit: &CommitInfo,
    payload: &IngestPayload,
) -> Result<Build>
where
    R: BuildRepository + ?Sized,
{
    let build_number = next_build_number(repo, project_id).await?;
    let previous = find_previous_build(repo, project_id, build_number, &commit.branch).await?;

    let new_build = NewBuild {
        project_id,
        build_number,
        branch: commit.branch.clone(),
        commit_sha: commit.commit_sha.clone(),
        committer_name: commit.committer_name.clone(),
        committer_email: commit.committer_email.clone(),
        commit_message: commit.message.clone(),
        completed: !payload.is_parallel(),
        previous_build_id: previous.as_ref().map(|b| b.id),
        previous_coverage: previous.as_ref().and_then(|b| b.coverage),
        build_started_at: payload.build_started_at.unwrap_or_else(Utc::now),
        service_name: payload.service_name.clone(),
        service_job_id: payload.service_job_id.clone(),
        service_job_pull_request: payload.service_job_pull_request.clone(),
    };

    let build = repo.insert_build(&new_build).await?;

    crate::metrics::build_created();
    tracing::info!(
        build_id = build.id,
        project_id,
        build_number,
        branch = %build.branch,
        previous_build_id = ?build.previous_build_id,
        completed = build.completed,
        "Build created"
    );

    Ok(build)
}

/// Write mutable build fields. The returned update tells the caller whether
/// coverage changed, which decides whether the project cascade runs.
///
/// Reopening a build is refused while another build of the project is open.
pub async fn update_build<R>(
    repo: &mut R,
    build_id: i64,
    mut changes: BuildChangeset,
) -> Result<BuildUpdate>
where
    R: BuildRepository + ?Sized,
{
    if changes.completed == Some(false) {
        ensure_no_other_open_build(repo, build_id).await?;
    }
    if !changes.is_empty() {
        changes.write_date = Some(Some(Utc::now()));
    }
    repo.update_build(build_id, &changes).await
}

async fn ensure_no_other_open_build<R>(repo: &mut R, build_id: i64) -> Result<()>
where
    R: BuildRepository + ?Sized,
{
    let build = repo
        .find_build(build_id)
        .await?
        .ok_or(CoverageError::BuildNotFound(build_id))?;
    repo.lock_project(build.project_id).await?;

    match repo.find_incomplete_build(build.project_id).await? {
        Some(open) if open.id != build_id => Err(CoverageError::Validation(format!(
            "build {} of project {} is still open",
            open.build_number, build.project_id
        ))),
        _ => Ok(()),
    }
}

/// Close a parallel build once all of its jobs have reported.
pub async fn close_build<R>(repo: &mut R, project_id: i64, build_id: i64) -> Result<BuildUpdate>
where
    R: BuildRepository + ?Sized,
{
    let build = repo
        .find_build(build_id)
        .await?
        .ok_or(CoverageError::BuildNotFound(build_id))?;
    if build.project_id != project_id {
        return Err(CoverageError::Validation(format!(
            "build {build_id} does not belong to project {project_id}"
        )));
    }

    let update = update_build(repo, build_id, BuildChangeset::completed()).await?;
    if !update.before.completed {
        tracing::info!(build_id, project_id, "Build completed");
    }
    Ok(update)
}
