//! Post-commit propagation of build coverage changes to the owning project.

use std::time::Duration;

use crate::config::CoverageConfig;
use crate::error::CoverageError;
use crate::models::build::CoverageChange;
use crate::store::ProjectCoverage;

#[derive(Clone, Debug)]
pub struct CascadeUpdater {
    attempts: u32,
    backoff: Duration,
}

impl CascadeUpdater {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &CoverageConfig) -> Self {
        Self::new(config.cascade_attempts, config.cascade_backoff)
    }

    /// Recompute the project's coverage after `change` committed.
    ///
    /// Never fails: the last error is logged and counted. Returns whether the
    /// project was updated.
    pub async fn run<P>(&self, projects: &P, change: &CoverageChange) -> bool
    where
        P: ProjectCoverage + ?Sized,
    {
        let project_id = change.project_id;
        let mut delay = self.backoff;

        for attempt in 1..=self.attempts {
            match projects.update_coverage(project_id).await {
                Ok(coverage) => {
                    tracing::info!(
                        project_id,
                        build_id = change.build_id,
                        previous_coverage = ?change.previous,
                        build_coverage = ?change.current,
                        project_coverage = ?coverage,
                        attempt,
                        "Project coverage updated"
                    );
                    crate::metrics::cascade("ok");
                    return true;
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(
                        project_id,
                        attempt,
                        error = %e,
                        "Project coverage update failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    let err = CoverageError::Cascade {
                        project_id,
                        source: Box::new(e),
                    };
                    tracing::error!(
                        project_id,
                        build_id = change.build_id,
                        attempts = self.attempts,
                        error = %err,
                        "Giving up on project coverage update"
                    );
                    crate::metrics::cascade("failed");
                }
            }
        }
        false
    }
}
