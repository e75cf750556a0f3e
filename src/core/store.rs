//! The shared job store abstraction.
//!
//! The job table is the single source of truth across worker processes. Every
//! method is one short, explicitly committed round trip; nothing is cached.

use async_trait::async_trait;

use crate::core::job::{CostTier, Job, JobId, NewJob, StateCounts, TierFilter};
use crate::core::SchedulerError;

/// Abstraction over the persistent job table.
///
/// Backends must make [`JobStore::claim_next`] atomic: a job moves from
/// `queued` to `running` at most once even when several processes claim
/// concurrently, with or without the leadership lock.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a queued job.
    async fn enqueue(&self, job: NewJob) -> Result<Job, SchedulerError>;

    /// Fetch one job.
    async fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError>;

    /// Remove a job. Deleted jobs are never claimed.
    async fn delete(&self, id: JobId) -> Result<bool, SchedulerError>;

    /// Oldest queued jobs without a tier, up to `limit`.
    async fn unclassified(&self, limit: usize) -> Result<Vec<Job>, SchedulerError>;

    /// Record the tier of a job. Only writes when no tier is set yet, so a
    /// tier is fixed at classification time. Returns whether it was written.
    async fn set_tier(&self, id: JobId, tier: CostTier) -> Result<bool, SchedulerError>;

    /// Atomically move the oldest queued job passing `filter` to `running`.
    ///
    /// Rows locked by a concurrent claimant are skipped, never waited on.
    /// Returns `None` when nothing is available.
    async fn claim_next(&self, filter: TierFilter) -> Result<Option<Job>, SchedulerError>;

    /// Undo a claim before the start callback ran (`running` → `queued`).
    async fn revert_claim(&self, id: JobId) -> Result<bool, SchedulerError>;

    /// Mark a running job done.
    async fn mark_done(&self, id: JobId) -> Result<bool, SchedulerError>;

    /// Mark a queued or running job failed. Returns `false` if the job was
    /// already finished.
    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<bool, SchedulerError>;

    /// The current running set, oldest first.
    async fn running_jobs(&self) -> Result<Vec<Job>, SchedulerError>;

    /// Queued and running counts, overall and per tier.
    async fn counts(&self) -> Result<StateCounts, SchedulerError>;
}
