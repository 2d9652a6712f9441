//! SQL migration for the coverage tables.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// Creates the three coverage tables. Idempotent.
///
/// The two unique indexes on cov_builds are what the deduplicator's
/// retry-as-lookup path relies on when two creates race.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Coverage Tables
-- ================================================================

CREATE TABLE IF NOT EXISTS cov_projects (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    repo_name       VARCHAR(255) NOT NULL UNIQUE,
    default_branch  VARCHAR(255) NOT NULL DEFAULT 'main',
    coverage        DOUBLE PRECISION,
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    write_date      TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_cov_projects_repo ON cov_projects (repo_name);

CREATE TABLE IF NOT EXISTS cov_builds (
    id                       BIGSERIAL PRIMARY KEY,
    project_id               BIGINT NOT NULL REFERENCES cov_projects(id) ON DELETE CASCADE,
    build_number             INTEGER NOT NULL,
    branch                   VARCHAR(255) NOT NULL DEFAULT '',
    commit_sha               VARCHAR(64),
    committer_name           VARCHAR(255),
    committer_email          VARCHAR(255),
    commit_message           TEXT,
    coverage                 DOUBLE PRECISION,
    completed                BOOLEAN NOT NULL DEFAULT TRUE,
    previous_build_id        BIGINT,
    previous_coverage        DOUBLE PRECISION,
    build_started_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    service_name             VARCHAR(255),
    service_job_id           VARCHAR(255),
    service_job_pull_request VARCHAR(255),
    create_date              TIMESTAMPTZ DEFAULT NOW(),
    write_date               TIMESTAMPTZ DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_cov_builds_number
    ON cov_builds (project_id, build_number);
CREATE UNIQUE INDEX IF NOT EXISTS uq_cov_builds_commit
    ON cov_builds (project_id, branch, commit_sha) WHERE commit_sha IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_cov_builds_branch_number
    ON cov_builds (project_id, branch, build_number DESC);
CREATE INDEX IF NOT EXISTS idx_cov_builds_incomplete
    ON cov_builds (project_id) WHERE completed = FALSE;

CREATE TABLE IF NOT EXISTS cov_jobs (
    id              BIGSERIAL PRIMARY KEY,
    build_id        BIGINT NOT NULL REFERENCES cov_builds(id) ON DELETE CASCADE,
    service_job_id  VARCHAR(255),
    coverage        DOUBLE PRECISION,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    write_date      TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_cov_jobs_build ON cov_jobs (build_id);
"#;

/// Run the coverage migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("coverage migration failed: {e}"))?;
    Ok(())
}
