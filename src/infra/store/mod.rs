//! Job store backends.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use crate::config::StoreBackendConfig;
use crate::core::job::{CostTier, Job, JobId, JobState, OwnerMetadata, ResourceDescriptor, StateCounts};
use crate::core::store::JobStore;
use crate::core::SchedulerError;

pub use memory::InMemoryJobStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;

/// Column list shared by every SQL statement that returns a job row.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) const JOB_COLUMNS: &str =
    "id, descriptor, state, tier, created_at_ms, started_at_ms, finished_at_ms, failure_reason, owner";

/// A job row after column decoding, before enum parsing.
#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
pub(crate) struct RawJob {
    pub id: JobId,
    pub descriptor: ResourceDescriptor,
    pub state: String,
    pub tier: Option<String>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub failure_reason: Option<String>,
    pub owner: OwnerMetadata,
}

#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
impl RawJob {
    pub fn into_job(self) -> Result<Job, SchedulerError> {
        Ok(Job {
            id: self.id,
            descriptor: self.descriptor,
            state: self.state.parse::<JobState>()?,
            tier: self.tier.as_deref().map(str::parse::<CostTier>).transpose()?,
            created_at_ms: self.created_at_ms,
            started_at_ms: self.started_at_ms,
            finished_at_ms: self.finished_at_ms,
            failure_reason: self.failure_reason,
            owner: self.owner,
        })
    }
}

/// Fold `(state, tier, count)` groups into [`StateCounts`].
#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
pub(crate) fn tally<I>(groups: I) -> Result<StateCounts, SchedulerError>
where
    I: IntoIterator<Item = (String, Option<String>, i64)>,
{
    let mut counts = StateCounts::default();
    for (state, tier, n) in groups {
        let n = usize::try_from(n).unwrap_or(0);
        let tier = tier.as_deref().map(str::parse::<CostTier>).transpose()?;
        match state.parse::<JobState>()? {
            JobState::Queued => {
                counts.queued += n;
                if let Some(tier) = tier {
                    counts.queued_by_tier.add(tier, n);
                }
            }
            JobState::Running => {
                counts.running += n;
                counts.running_by_tier.add(tier.unwrap_or(CostTier::Default), n);
            }
            JobState::Done | JobState::Failed => {}
        }
    }
    Ok(counts)
}

/// Connect the configured backend and apply its schema.
///
/// # Errors
///
/// Returns [`SchedulerError::Config`] when the backend was compiled out, or a
/// store error when connecting or migrating fails.
pub async fn connect(config: &StoreBackendConfig) -> Result<Arc<dyn JobStore>, SchedulerError> {
    match config {
        StoreBackendConfig::InMemory => Ok(Arc::new(InMemoryJobStore::new())),
        #[cfg(feature = "sqlite")]
        StoreBackendConfig::Sqlite {
            url,
            max_connections,
        } => {
            let store = SqliteJobStore::connect(url, *max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        StoreBackendConfig::Postgres {
            url,
            max_connections,
        } => {
            let store = PostgresJobStore::connect(url, *max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        #[allow(unreachable_patterns)]
        other => Err(SchedulerError::Config(format!(
            "store backend {other:?} is not compiled in"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_groups_by_state_and_tier() {
        let counts = tally(vec![
            ("queued".to_string(), None, 2),
            ("queued".to_string(), Some("heavy".to_string()), 1),
            ("running".to_string(), Some("default".to_string()), 3),
            ("running".to_string(), Some("heavy".to_string()), 1),
            ("done".to_string(), Some("heavy".to_string()), 9),
        ])
        .unwrap();
        assert_eq!(counts.queued, 3);
        assert_eq!(counts.queued_by_tier.heavy, 1);
        assert_eq!(counts.running, 4);
        assert_eq!(counts.running_by_tier.default, 3);
        assert_eq!(counts.running_by_tier.heavy, 1);
    }

    #[test]
    fn unknown_state_is_a_store_error() {
        let err = tally(vec![("paused".to_string(), None, 1)]).unwrap_err();
        assert!(matches!(err, SchedulerError::Store(_)));
    }
}
