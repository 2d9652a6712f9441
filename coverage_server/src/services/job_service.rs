//! Job recording.

use crate::error::Result;
use crate::models::build::Build;
use crate::models::job::{Job, NewJob};
use crate::models::payload::IngestPayload;
use crate::store::BuildRepository;

/// Attach a job result to its build.
pub async fn record_job<R>(repo: &mut R, build: &Build, payload: &IngestPayload) -> Result<Job>
where
    R: BuildRepository + ?Sized,
{
    let new_job = NewJob {
        build_id: build.id,
        service_job_id: payload
            .service_job_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        coverage: payload.coverage,
    };
    let job = repo.insert_job(&new_job).await?;

    crate::metrics::job_recorded();
    tracing::debug!(
        job_id = job.id,
        build_id = build.id,
        coverage = ?job.coverage,
        "Job recorded"
    );
    Ok(job)
}
