//! Fleet-wide resource telemetry.
//!
//! Both readings are taken fresh on every call: the running count comes from
//! the shared store (so it sees jobs started by any process) and memory comes
//! from a sampler that covers the whole worker process group.

use std::sync::Arc;

use crate::core::job::StateCounts;
use crate::core::store::JobStore;
use crate::core::SchedulerError;

/// Fleet-wide resident memory in bytes; `None` when sampling failed.
pub type MemorySample = Option<u64>;

/// Samples resident memory across the deployment's worker process group.
pub trait MemorySampler: Send + Sync + 'static {
    /// Total resident bytes.
    fn sample_bytes(&self) -> Result<u64, SchedulerError>;
}

/// Running-count and memory readings used by the admission policy.
#[derive(Clone)]
pub struct ResourceTelemetry {
    store: Arc<dyn JobStore>,
    sampler: Arc<dyn MemorySampler>,
}

impl ResourceTelemetry {
    /// Combine a store and a sampler.
    pub fn new(store: Arc<dyn JobStore>, sampler: Arc<dyn MemorySampler>) -> Self {
        Self { store, sampler }
    }

    /// Jobs currently running anywhere in the fleet.
    pub async fn running_count(&self) -> Result<usize, SchedulerError> {
        Ok(self.store.counts().await?.running)
    }

    /// Queued/running counts per tier, fresh from the store.
    pub async fn counts(&self) -> Result<StateCounts, SchedulerError> {
        self.store.counts().await
    }

    /// Fleet memory. Failures are logged and reported as unknown so the
    /// policy falls back to concurrency-only control.
    #[must_use]
    pub fn memory_bytes(&self) -> MemorySample {
        match self.sampler.sample_bytes() {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(error = %err, "memory telemetry unavailable, assuming no pressure");
                None
            }
        }
    }

    /// The underlying sampler, shared with the degradation controller.
    #[must_use]
    pub fn sampler(&self) -> Arc<dyn MemorySampler> {
        Arc::clone(&self.sampler)
    }
}
