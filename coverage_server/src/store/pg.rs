//! PostgreSQL implementation of the storage seam (diesel-async + deadpool).

use async_trait::async_trait;
use diesel::dsl::sql_query;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::BigInt;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::error::{CoverageError, Result};
use crate::models::build::{Build, BuildChangeset, BuildUpdate, NewBuild};
use crate::models::job::{Job, NewJob};
use crate::models::project::Project;
use crate::schema::{cov_builds, cov_jobs, cov_projects};
use crate::services::project_service;
use crate::store::{BuildRepository, CoverageStore, ProjectCoverage, RepoFuture};

pub type DbPool = Pool<AsyncPgConnection>;

/// Create the connection pool.
pub fn create_pool(database_url: &str, max_connections: usize) -> anyhow::Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager)
        .max_size(max_connections)
        .build()
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
    Ok(pool)
}

/// Repository over a connection that is already inside a transaction.
pub struct PgRepository<'c> {
    conn: &'c mut AsyncPgConnection,
}

impl<'c> PgRepository<'c> {
    pub fn new(conn: &'c mut AsyncPgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl BuildRepository for PgRepository<'_> {
    async fn lock_project(&mut self, project_id: i64) -> Result<()> {
        sql_query("SELECT pg_advisory_xact_lock($1)")
            .bind::<BigInt, _>(project_id)
            .execute(self.conn)
            .await?;
        Ok(())
    }

    async fn find_project(&mut self, project_id: i64) -> Result<Option<Project>> {
        let result = cov_projects::table
            .find(project_id)
            .filter(cov_projects::active.eq(true))
            .first::<Project>(self.conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn set_project_coverage(
        &mut self,
        project_id: i64,
        coverage: Option<f64>,
    ) -> Result<()> {
        diesel::update(cov_projects::table.find(project_id))
            .set((
                cov_projects::coverage.eq(coverage),
                cov_projects::write_date.eq(chrono::Utc::now()),
            ))
            .execute(self.conn)
            .await?;
        Ok(())
    }

    async fn find_build(&mut self, build_id: i64) -> Result<Option<Build>> {
        let result = cov_builds::table
            .find(build_id)
            .first::<Build>(self.conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn latest_build_number(&mut self, project_id: i64) -> Result<Option<i32>> {
        let result = cov_builds::table
            .filter(cov_builds::project_id.eq(project_id))
            .order(cov_builds::build_number.desc())
            .select(cov_builds::build_number)
            .first::<i32>(self.conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_incomplete_build(&mut self, project_id: i64) -> Result<Option<Build>> {
        let result = cov_builds::table
            .filter(cov_builds::project_id.eq(project_id))
            .filter(cov_builds::completed.eq(false))
            .order(cov_builds::build_number.desc())
            .first::<Build>(self.conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_by_commit(
        &mut self,
        project_id: i64,
        branch: &str,
        commit_sha: &str,
    ) -> Result<Option<Build>> {
        let result = cov_builds::table
            .filter(cov_builds::project_id.eq(project_id))
            .filter(cov_builds::branch.eq(branch))
            .filter(cov_builds::commit_sha.eq(commit_sha))
            .first::<Build>(self.conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_previous_build(
        &mut self,
        project_id: i64,
        branch: &str,
        before: i32,
    ) -> Result<Option<Build>> {
        let result = cov_builds::table
            .filter(cov_builds::project_id.eq(project_id))
            .filter(cov_builds::branch.eq(branch))
            .filter(cov_builds::build_number.lt(before))
            .order(cov_builds::build_number.desc())
            .first::<Build>(self.conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn latest_covered_build(
        &mut self,
        project_id: i64,
        branch: &str,
    ) -> Result<Option<Build>> {
        let result = cov_builds::table
            .filter(cov_builds::project_id.eq(project_id))
            .filter(cov_builds::branch.eq(branch))
            .filter(cov_builds::coverage.is_not_null())
            .order(cov_builds::build_number.desc())
            .first::<Build>(self.conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn list_builds(
        &mut self,
        project_id: i64,
        branch: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Build>> {
        let mut query = cov_builds::table
            .filter(cov_builds::project_id.eq(project_id))
            .into_boxed();
        if let Some(branch) = branch {
            query = query.filter(cov_builds::branch.eq(branch.to_string()));
        }
        let results = query
            .order(cov_builds::build_number.desc())
            .limit(limit)
            .load::<Build>(self.conn)
            .await?;
        Ok(results)
    }

    async fn insert_build(&mut self, new_build: &NewBuild) -> Result<Build> {
        // Savepoint, so a unique violation does not poison the outer transaction.
        let inserted = self
            .conn
            .transaction::<Build, DieselError, _>(|conn| {
                async move {
                    diesel::insert_into(cov_builds::table)
                        .values(new_build)
                        .get_result::<Build>(conn)
                        .await
                }
                .scope_boxed()
            })
            .await;

        match inserted {
            Ok(build) => Ok(build),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
                Err(CoverageError::DuplicateBuild {
                    project_id: new_build.project_id,
                    constraint: info.constraint_name().unwrap_or("unknown").to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_build(
        &mut self,
        build_id: i64,
        changes: &BuildChangeset,
    ) -> Result<BuildUpdate> {
        let before = cov_builds::table
            .find(build_id)
            .for_update()
            .first::<Build>(self.conn)
            .await
            .optional()?
            .ok_or(CoverageError::BuildNotFound(build_id))?;

        if changes.is_empty() {
            return Ok(BuildUpdate {
                after: before.clone(),
                before,
            });
        }

        let after = diesel::update(cov_builds::table.find(build_id))
            .set(changes)
            .get_result::<Build>(self.conn)
            .await?;

        Ok(BuildUpdate { before, after })
    }

    async fn insert_job(&mut self, new_job: &NewJob) -> Result<Job> {
        let result = diesel::insert_into(cov_jobs::table)
            .values(new_job)
            .get_result::<Job>(self.conn)
            .await?;
        Ok(result)
    }

    async fn job_coverages(&mut self, build_id: i64) -> Result<Vec<Option<f64>>> {
        let results = cov_jobs::table
            .filter(cov_jobs::build_id.eq(build_id))
            .order(cov_jobs::id.asc())
            .select(cov_jobs::coverage)
            .load::<Option<f64>>(self.conn)
            .await?;
        Ok(results)
    }
}

/// Pool-backed store: one pooled connection and one transaction per unit of work.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// A pooled connection for reads outside the build lifecycle.
    pub async fn conn(&self) -> Result<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| CoverageError::Pool(e.to_string()))
    }
}

#[async_trait]
impl CoverageStore for PgStore {
    async fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'r> FnOnce(&'r mut dyn BuildRepository) -> RepoFuture<'r, T> + Send + 'static,
    {
        let mut conn = self.conn().await?;
        conn.transaction::<T, CoverageError, _>(|conn| {
            async move {
                let mut repo = PgRepository::new(conn);
                f(&mut repo).await
            }
            .scope_boxed()
        })
        .await
    }
}

#[async_trait]
impl ProjectCoverage for PgStore {
    async fn update_coverage(&self, project_id: i64) -> Result<Option<f64>> {
        self.in_transaction(move |repo| {
            Box::pin(async move { project_service::update_coverage(repo, project_id).await })
        })
        .await
    }
}
