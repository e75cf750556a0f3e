//! In-memory job store for tests and single-process hosts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::job::{CostTier, Job, JobId, JobState, NewJob, StateCounts, TierFilter};
use crate::core::store::JobStore;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

struct Table {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
}

/// Job table guarded by a single mutex; every call is atomic with respect to
/// every other call on the same instance.
pub struct InMemoryJobStore {
    table: Mutex<Table>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: 1,
                jobs: BTreeMap::new(),
            }),
        }
    }

    /// Number of rows, any state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().jobs.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn finish(job: &mut Job, state: JobState, reason: Option<&str>) {
    job.state = state;
    job.finished_at_ms = Some(now_ms());
    job.failure_reason = reason.map(str::to_owned);
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, new: NewJob) -> Result<Job, SchedulerError> {
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        let job = Job {
            id,
            descriptor: new.descriptor,
            state: JobState::Queued,
            tier: new.tier,
            created_at_ms: new.created_at_ms.unwrap_or_else(now_ms),
            started_at_ms: None,
            finished_at_ms: None,
            failure_reason: None,
            owner: new.owner,
        };
        table.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.table.lock().jobs.get(&id).cloned())
    }

    async fn delete(&self, id: JobId) -> Result<bool, SchedulerError> {
        Ok(self.table.lock().jobs.remove(&id).is_some())
    }

    async fn unclassified(&self, limit: usize) -> Result<Vec<Job>, SchedulerError> {
        let table = self.table.lock();
        let mut pending: Vec<Job> = table
            .jobs
            .values()
            .filter(|j| j.state == JobState::Queued && j.tier.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|j| (j.created_at_ms, j.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn set_tier(&self, id: JobId, tier: CostTier) -> Result<bool, SchedulerError> {
        let mut table = self.table.lock();
        match table.jobs.get_mut(&id) {
            Some(job) if job.tier.is_none() => {
                job.tier = Some(tier);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_next(&self, filter: TierFilter) -> Result<Option<Job>, SchedulerError> {
        let mut table = self.table.lock();
        let next = table
            .jobs
            .values()
            .filter(|j| j.state == JobState::Queued)
            .filter(|j| j.tier.is_some_and(|t| filter.accepts(t)))
            .min_by_key(|j| (j.created_at_ms, j.id))
            .map(|j| j.id);
        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = table.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.state = JobState::Running;
        job.started_at_ms = Some(now_ms());
        Ok(Some(job.clone()))
    }

    async fn revert_claim(&self, id: JobId) -> Result<bool, SchedulerError> {
        let mut table = self.table.lock();
        match table.jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Running => {
                job.state = JobState::Queued;
                job.started_at_ms = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_done(&self, id: JobId) -> Result<bool, SchedulerError> {
        let mut table = self.table.lock();
        match table.jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Running => {
                finish(job, JobState::Done, None);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<bool, SchedulerError> {
        let mut table = self.table.lock();
        match table.jobs.get_mut(&id) {
            Some(job) if matches!(job.state, JobState::Queued | JobState::Running) => {
                finish(job, JobState::Failed, Some(reason));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn running_jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        let table = self.table.lock();
        let mut running: Vec<Job> = table
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .cloned()
            .collect();
        running.sort_by_key(|j| (j.started_at_ms, j.id));
        Ok(running)
    }

    async fn counts(&self) -> Result<StateCounts, SchedulerError> {
        let table = self.table.lock();
        let mut counts = StateCounts::default();
        for job in table.jobs.values() {
            match job.state {
                JobState::Queued => {
                    counts.queued += 1;
                    if let Some(tier) = job.tier {
                        counts.queued_by_tier.increment(tier);
                    }
                }
                JobState::Running => {
                    counts.running += 1;
                    counts
                        .running_by_tier
                        .increment(job.tier.unwrap_or(CostTier::Default));
                }
                JobState::Done | JobState::Failed => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::ResourceDescriptor;

    fn job(created: i64, tier: CostTier) -> NewJob {
        NewJob::new("acme", ResourceDescriptor::default())
            .created_at(created)
            .with_tier(tier)
    }

    #[tokio::test]
    async fn claims_oldest_matching_tier() {
        let store = InMemoryJobStore::new();
        let heavy = store.enqueue(job(10, CostTier::Heavy)).await.unwrap();
        let light = store.enqueue(job(20, CostTier::Default)).await.unwrap();

        let claimed = store
            .claim_next(TierFilter::Only(CostTier::Default))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, light.id);
        assert_eq!(claimed.state, JobState::Running);

        let claimed = store.claim_next(TierFilter::Any).await.unwrap().unwrap();
        assert_eq!(claimed.id, heavy.id);
        assert!(store.claim_next(TierFilter::Any).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unclassified_jobs_are_not_claimable() {
        let store = InMemoryJobStore::new();
        let new = NewJob::new("acme", ResourceDescriptor::default());
        let id = store.enqueue(new).await.unwrap().id;
        assert!(store.claim_next(TierFilter::Any).await.unwrap().is_none());
        assert_eq!(store.unclassified(10).await.unwrap().len(), 1);

        assert!(store.set_tier(id, CostTier::Heavy).await.unwrap());
        assert!(!store.set_tier(id, CostTier::Default).await.unwrap());
        let claimed = store.claim_next(TierFilter::Any).await.unwrap().unwrap();
        assert_eq!(claimed.tier, Some(CostTier::Heavy));
    }

    #[tokio::test]
    async fn revert_and_finish_transitions() {
        let store = InMemoryJobStore::new();
        let id = store.enqueue(job(1, CostTier::Default)).await.unwrap().id;
        store.claim_next(TierFilter::Any).await.unwrap().unwrap();
        assert!(store.revert_claim(id).await.unwrap());
        assert_eq!(store.counts().await.unwrap().queued, 1);

        store.claim_next(TierFilter::Any).await.unwrap().unwrap();
        assert!(store.mark_failed(id, "boom").await.unwrap());
        assert!(!store.mark_failed(id, "again").await.unwrap());
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, JobState::Failed);
        assert_eq!(row.failure_reason.as_deref(), Some("boom"));
        assert!(!store.revert_claim(id).await.unwrap());
    }

    #[tokio::test]
    async fn deleted_jobs_are_never_claimed() {
        let store = InMemoryJobStore::new();
        let id = store.enqueue(job(1, CostTier::Default)).await.unwrap().id;
        assert!(store.delete(id).await.unwrap());
        assert!(store.claim_next(TierFilter::Any).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
