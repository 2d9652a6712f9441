//! Project registration and aggregate coverage.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{CoverageError, Result};
use crate::models::project::{NewProject, Project};
use crate::schema::cov_projects;
use crate::store::BuildRepository;

/// List all active projects.
pub async fn list_projects(conn: &mut AsyncPgConnection) -> Result<Vec<Project>> {
    let results = cov_projects::table
        .filter(cov_projects::active.eq(true))
        .order(cov_projects::id.asc())
        .load::<Project>(conn)
        .await?;
    Ok(results)
}

/// Find a project by its repository identifier (e.g., "centrixsystems/centrix").
pub async fn find_by_repo(
    conn: &mut AsyncPgConnection,
    repo_name: &str,
) -> Result<Option<Project>> {
    let result = cov_projects::table
        .filter(cov_projects::repo_name.eq(repo_name))
        .filter(cov_projects::active.eq(true))
        .first::<Project>(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Register a new project. Names and repository identifiers are trimmed and
/// must be non-empty; a blank default branch falls back to `main`.
pub async fn create_project(
    conn: &mut AsyncPgConnection,
    new_project: NewProject,
) -> Result<Project> {
    let new_project = normalize(new_project)?;
    if find_by_repo(conn, &new_project.repo_name).await?.is_some() {
        return Err(CoverageError::Validation(format!(
            "repository {} is already registered",
            new_project.repo_name
        )));
    }

    let result = diesel::insert_into(cov_projects::table)
        .values(&new_project)
        .get_result::<Project>(conn)
        .await?;

    tracing::info!(
        project_id = result.id,
        repo = %result.repo_name,
        default_branch = %result.default_branch,
        "Project registered"
    );
    Ok(result)
}

fn normalize(mut new_project: NewProject) -> Result<NewProject> {
    new_project.name = new_project.name.trim().to_string();
    new_project.repo_name = new_project.repo_name.trim().to_string();
    new_project.default_branch = new_project.default_branch.trim().to_string();

    if new_project.name.is_empty() || new_project.repo_name.is_empty() {
        return Err(CoverageError::Validation(
            "project name and repo_name are required".to_string(),
        ));
    }
    if new_project.default_branch.is_empty() {
        new_project.default_branch = "main".to_string();
    }
    Ok(new_project)
}

/// Set the project's coverage from the latest covered build on its default
/// branch, or clear it when there is none.
///
/// Runs under the project lock: concurrent recomputations apply one after
/// the other, each reading the builds committed before it.
pub async fn update_coverage<R>(repo: &mut R, project_id: i64) -> Result<Option<f64>>
where
    R: BuildRepository + ?Sized,
{
    repo.lock_project(project_id).await?;
    let project = repo
        .find_project(project_id)
        .await?
        .ok_or_else(|| CoverageError::Validation(format!("unknown project {project_id}")))?;

    let coverage = repo
        .latest_covered_build(project_id, &project.default_branch)
        .await?
        .and_then(|build| build.coverage);

    if coverage != project.coverage {
        repo.set_project_coverage(project_id, coverage).await?;
    }
    Ok(coverage)
}
