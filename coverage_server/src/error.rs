//! Error taxonomy for the build lifecycle and coverage rollup.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    /// Malformed request or unknown project. The only kind surfaced to callers.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No job of the build reported a usable (non-null, non-zero) coverage.
    #[error("no coverage data available for build {build_id}")]
    NoCoverageData { build_id: i64 },

    /// A uniqueness constraint fired while creating a build.
    #[error("duplicate build for project {project_id} ({constraint})")]
    DuplicateBuild { project_id: i64, constraint: String },

    #[error("build {0} not found")]
    BuildNotFound(i64),

    /// The owning project's recomputation failed after the build write.
    #[error("project {project_id} coverage update failed: {source}")]
    Cascade {
        project_id: i64,
        #[source]
        source: Box<CoverageError>,
    },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),
}

pub type Result<T, E = CoverageError> = std::result::Result<T, E>;

impl CoverageError {
    /// HTTP status for a request that failed with this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoverageError::Validation(_) => StatusCode::BAD_REQUEST,
            CoverageError::BuildNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
