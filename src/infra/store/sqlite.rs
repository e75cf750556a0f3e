//! SQLite job store for several worker processes on one host.
//!
//! The claim is a single `UPDATE … WHERE id = (SELECT … LIMIT 1) AND
//! state = 'queued' RETURNING …` statement. SQLite takes the write lock
//! before the statement reads anything, so two claimants can never pick the
//! same row; the busy timeout makes the loser wait instead of failing.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use crate::core::job::{CostTier, Job, JobId, JobState, NewJob, StateCounts, TierFilter};
use crate::core::store::JobStore;
use crate::core::SchedulerError;
use crate::infra::store::{tally, RawJob, JOB_COLUMNS};
use crate::util::clock::now_ms;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Job table in a SQLite database.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if missing) the database at `url` in WAL mode.
    ///
    /// In-memory URLs get a single long-lived connection, since every
    /// connection to `:memory:` would otherwise see its own database.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if the URL is invalid or the database
    /// cannot be opened.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, SchedulerError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            opts = opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }
        let mut pool_opts = SqlitePoolOptions::new();
        pool_opts = if in_memory {
            pool_opts
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_opts.max_connections(max_connections.max(1))
        };
        let pool = pool_opts.connect_with(opts).await?;
        tracing::info!(url, in_memory, "sqlite job store opened");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Schema statements, applied in order. Idempotent.
    #[must_use]
    pub fn migrations() -> &'static [&'static str] {
        &[
            r"
CREATE TABLE IF NOT EXISTS admission_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    descriptor TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    tier TEXT,
    created_at_ms INTEGER NOT NULL,
    started_at_ms INTEGER,
    finished_at_ms INTEGER,
    failure_reason TEXT,
    owner TEXT NOT NULL
)",
            r"
CREATE INDEX IF NOT EXISTS idx_admission_jobs_claim
    ON admission_jobs (state, tier, created_at_ms, id)",
        ]
    }

    /// Apply [`Self::migrations`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), SchedulerError> {
        for statement in Self::migrations() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn decode(row: &SqliteRow) -> Result<Job, SchedulerError> {
    let descriptor: String = row.try_get("descriptor")?;
    let owner: String = row.try_get("owner")?;
    RawJob {
        id: row.try_get("id")?,
        descriptor: serde_json::from_str(&descriptor)?,
        state: row.try_get("state")?,
        tier: row.try_get("tier")?,
        created_at_ms: row.try_get("created_at_ms")?,
        started_at_ms: row.try_get("started_at_ms")?,
        finished_at_ms: row.try_get("finished_at_ms")?,
        failure_reason: row.try_get("failure_reason")?,
        owner: serde_json::from_str(&owner)?,
    }
    .into_job()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, SchedulerError> {
        let sql = format!(
            "INSERT INTO admission_jobs (descriptor, state, tier, created_at_ms, owner)
             VALUES (?1, 'queued', ?2, ?3, ?4)
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(serde_json::to_string(&job.descriptor)?)
            .bind(job.tier.map(CostTier::as_str))
            .bind(job.created_at_ms.unwrap_or_else(now_ms))
            .bind(serde_json::to_string(&job.owner)?)
            .fetch_one(&self.pool)
            .await?;
        decode(&row)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM admission_jobs WHERE id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn delete(&self, id: JobId) -> Result<bool, SchedulerError> {
        let result = sqlx::query("DELETE FROM admission_jobs WHERE id = ?1")
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
             LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn set_tier(&self, id: JobId, tier: CostTier) -> Result<bool, SchedulerError> {
        let result =
            sqlx::query("UPDATE admission_jobs SET tier = ?2 WHERE id = ?1 AND tier IS NULL")
                .bind(id)
                .bind(tier.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(&self, filter: TierFilter) -> Result<Option<Job>, SchedulerError> {
        let sql = format!(
            "UPDATE admission_jobs
             SET state = 'running', started_at_ms = ?2
             WHERE id = (
                 SELECT id FROM admission_jobs
                 WHERE state = 'queued'
                   AND tier IS NOT NULL
                   AND (?1 IS NULL OR tier = ?1)
                 ORDER BY created_at_ms, id
                 LIMIT 1
             )
             AND state = 'queued'
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(filter.as_bind())
            .bind(now_ms())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn revert_claim(&self, id: JobId) -> Result<bool, SchedulerError> {
        let result = sqlx::query(
            "UPDATE admission_jobs SET state = 'queued', started_at_ms = NULL
             WHERE id = ?1 AND state = 'running'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_done(&self, id: JobId) -> Result<bool, SchedulerError> {
        let result = sqlx::query(
            "UPDATE admission_jobs SET state = 'done', finished_at_ms = ?2
             WHERE id = ?1 AND state = 'running'",
        )
        .bind(id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<bool, SchedulerError> {
        let result = sqlx::query(
            "UPDATE admission_jobs SET state = 'failed', finished_at_ms = ?2, failure_reason = ?3
             WHERE id = ?1 AND state IN ('queued', 'running')",
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

impl SqliteJobStore {
    /// Rows in a given state. Used by diagnostics and tests.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Store`] if the query fails.
    pub async fn count_in_state(&self, state: JobState) -> Result<usize, SchedulerError> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM admission_jobs WHERE state = ?1")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::ResourceDescriptor;

    async fn open(dir: &tempfile::TempDir) -> SqliteJobStore {
        let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        let store = SqliteJobStore::connect(&url, 4).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn claim_follows_creation_order_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let heavy = store
            .enqueue(
                NewJob::new("acme", ResourceDescriptor::default())
                    .created_at(1)
                    .with_tier(CostTier::Heavy),
            )
            .await
            .unwrap();
        let light = store
            .enqueue(
                NewJob::new("acme", ResourceDescriptor::default())
                    .created_at(2)
                    .with_tier(CostTier::Default),
            )
            .await
            .unwrap();

        let first = store
            .claim_next(TierFilter::Only(CostTier::Default))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, light.id);
        let second = store.claim_next(TierFilter::Any).await.unwrap().unwrap();
        assert_eq!(second.id, heavy.id);
        assert!(store.claim_next(TierFilter::Any).await.unwrap().is_none());

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.running, 2);
        assert_eq!(counts.running_by_tier.heavy, 1);
        assert_eq!(store.count_in_state(JobState::Running).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn descriptor_and_owner_round_trip_through_json_columns() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let descriptor = ResourceDescriptor {
            format: Some("pptx".into()),
            page_count: Some(42),
            size_bytes: Some(1_024),
        };
        let mut new = NewJob::new("globex", descriptor.clone());
        new.owner.user_id = Some("u-7".into());
        let job = store.enqueue(new).await.unwrap();
        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.descriptor, descriptor);
        assert_eq!(fetched.owner.user_id.as_deref(), Some("u-7"));
        assert_eq!(fetched.tier, None);
        assert_eq!(store.unclassified(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn in_memory_url_keeps_one_database() {
        let store = SqliteJobStore::connect("sqlite::memory:", 8).await.unwrap();
        store.migrate().await.unwrap();
        let id = store
            .enqueue(NewJob::new("acme", ResourceDescriptor::default()).with_tier(CostTier::Default))
            .await
            .unwrap()
            .id;
        assert!(store.get(id).await.unwrap().is_some());
    }
}
