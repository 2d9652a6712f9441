//! Build coverage aggregation over job results.

use crate::error::{CoverageError, Result};
use crate::models::build::{Build, BuildChangeset, BuildUpdate};
use crate::services::build_service;
use crate::store::BuildRepository;

/// Minimum of the eligible job coverages. Absent, zero and NaN values are
/// not eligible.
pub fn aggregate(coverages: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    coverages
        .into_iter()
        .flatten()
        .filter(|c| *c != 0.0 && !c.is_nan())
        .reduce(f64::min)
}

/// Aggregate coverage of a build's jobs.
pub async fn compute_coverage<R>(repo: &mut R, build: &Build) -> Result<f64>
where
    R: BuildRepository + ?Sized,
{
    let coverages = repo.job_coverages(build.id).await?;
    aggregate(coverages).ok_or(CoverageError::NoCoverageData { build_id: build.id })
}

/// Recompute a build's coverage and persist it. A build with no eligible job
/// data ends up with its coverage unset.
///
/// Jobs are read under the project lock, so no job submission can commit
/// between the read and the write.
pub async fn update_coverage<R>(repo: &mut R, build_id: i64) -> Result<BuildUpdate>
where
    R: BuildRepository + ?Sized,
{
    let build = repo
        .find_build(build_id)
        .await?
        .ok_or(CoverageError::BuildNotFound(build_id))?;
    repo.lock_project(build.project_id).await?;

    let coverage = match compute_coverage(repo, &build).await {
        Ok(coverage) => {
            crate::metrics::coverage_computed(coverage);
            Some(coverage)
        }
        Err(CoverageError::NoCoverageData { build_id }) => {
            tracing::debug!(build_id, "No eligible job coverage, clearing build coverage");
            crate::metrics::no_coverage_data();
            None
        }
        Err(e) => return Err(e),
    };

    build_service::update_build(repo, build_id, BuildChangeset::coverage(coverage)).await
}
