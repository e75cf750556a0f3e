//! Postgres job store.
//!
//! Claims lock the candidate row with `FOR UPDATE SKIP LOCKED` inside a short
//! transaction, so concurrent schedulers on different hosts never wait on
//! each other's rows and never claim the same one.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::core::job::{
    CostTier, Job, JobId, NewJob, OwnerMetadata, ResourceDescriptor, StateCounts, TierFilter,
};
use crate::core::store::JobStore;
use crate::core::SchedulerError;
use crate::infra::store::{tally, RawJob, JOB_COLUMNS};
use crate::util::clock::now_ms;

/// Job table in Postgres.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if the connection fails.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, SchedulerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        tracing::info!(max_connections, "postgres job store connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Schema statements, applied in order. Idempotent.
    #[must_use]
    pub fn migrations() -> &'static [&'static str] {
        &[
            r"
CREATE TABLE IF NOT EXISTS admission_jobs (
    id BIGSERIAL PRIMARY KEY,
    descriptor JSONB NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    tier TEXT,
    created_at_ms BIGINT NOT NULL,
    started_at_ms BIGINT,
    finished_at_ms BIGINT,
    failure_reason TEXT,
    owner JSONB NOT NULL
)",
            r"
CREATE INDEX IF NOT EXISTS idx_admission_jobs_claim
    ON admission_jobs (state, tier, created_at_ms, id)",
        ]
    }

    /// Apply [`Self::migrations`] in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), SchedulerError> {
        let mut tx = self.pool.begin().await?;
        for statement in Self::migrations() {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn decode(row: &PgRow) -> Result<Job, SchedulerError> {
    let descriptor: Json<ResourceDescriptor> = row.try_get("descriptor")?;
    let owner: Json<OwnerMetadata> = row.try_get("owner")?;
    RawJob {
        id: row.try_get("id")?,
        descriptor: descriptor.0,
        state: row.try_get("state")?,
        tier: row.try_get("tier")?,
        created_at_ms: row.try_get("created_at_ms")?,
        started_at_ms: row.try_get("started_at_ms")?,
        finished_at_ms: row.try_get("finished_at_ms")?,
        failure_reason: row.try_get("failure_reason")?,
        owner: owner.0,
    }
    .into_job()
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, SchedulerError> {
        let sql = format!(
            "INSERT INTO admission_jobs (descriptor, state, tier, created_at_ms, owner)
             VALUES ($1, 'queued', $2, $3, $4)
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Json(&job.descriptor))
            .bind(job.tier.map(CostTier::as_str))
            .bind(job.created_at_ms.unwrap_or_else(now_ms))
            .bind(Json(&job.owner))
            .fetch_one(&self.pool)
            .await?;
        decode(&row)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM admission_jobs WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn delete(&self, id: JobId) -> Result<bool, SchedulerError> {
        let result = sqlx::query("DELETE FROM admission_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unclassified(&self, limit: usize) -> Result<Vec<Job>, SchedulerError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM admission_jobs
             WHERE state = 'queued' AND tier IS NULL
             ORDER BY created_at_ms, id
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn set_tier(&self, id: JobId, tier: CostTier) -> Result<bool, SchedulerError> {
        let result =
            sqlx::query("UPDATE admission_jobs SET tier = $2 WHERE id = $1 AND tier IS NULL")
                .bind(id)
                .bind(tier.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(&self, filter: TierFilter) -> Result<Option<Job>, SchedulerError> {
        let mut tx = self.pool.begin().await?;
        let candidate = sqlx::query(
            "SELECT id FROM admission_jobs
             WHERE state = 'queued'
               AND tier IS NOT NULL
               AND ($1::text IS NULL OR tier = $1::text)
             ORDER BY created_at_ms, id
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(filter.as_bind())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };
        let id: JobId = candidate.try_get("id")?;

        let sql = format!(
            "UPDATE admission_jobs SET state = 'running', started_at_ms = $2
             WHERE id = $1 AND state = 'queued'
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(now_ms())
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        row.as_ref().map(decode).transpose()
    }

    async fn revert_claim(&self, id: JobId) -> Result<bool, SchedulerError> {
        let result = sqlx::query(
            "UPDATE admission_jobs SET state = 'queued', started_at_ms = NULL
             WHERE id = $1 AND state = 'running'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_done(&self, id: JobId) -> Result<bool, SchedulerError> {
        let result = sqlx::query(
            "UPDATE admission_jobs SET state = 'done', finished_at_ms = $2
             WHERE id = $1 AND state = 'running'",
        )
        .bind(id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<bool, SchedulerError> {
        let result = sqlx::query(
            "UPDATE admission_jobs SET state = 'failed', finished_at_ms = $2, failure_reason = $3
             WHERE id = $1 AND state IN ('queued', 'running')",
        )
        .bind(id)
        .bind(now_ms())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn running_jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM admission_jobs
             WHERE state = 'running'
             ORDER BY started_at_ms, id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }

    async fn counts(&self) -> Result<StateCounts, SchedulerError> {
        let rows = sqlx::query(
            "SELECT state, tier, COUNT(*) AS n FROM admission_jobs
             WHERE state IN ('queued', 'running')
             GROUP BY state, tier",
        )
        .fetch_all(&self.pool)
        .await?;
        let groups = rows
            .iter()
            .map(|row| -> Result<_, SchedulerError> {
                Ok((row.try_get("state")?, row.try_get("tier")?, row.try_get("n")?))
            })
            .collect::<Result<Vec<(String, Option<String>, i64)>, _>>()?;
        tally(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent_statements() {
        let statements = PostgresJobStore::migrations();
        assert_eq!(statements.len(), 2);
        assert!(statements
            .iter()
            .all(|s| s.contains("IF NOT EXISTS") && !s.trim_end().ends_with(';')));
    }
}
