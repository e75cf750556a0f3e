//! Assemble an [`AdmissionService`] from configuration and host callbacks.

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::AdmissionConfig;
use crate::core::audit::{shared_sink, AuditSink, SharedAuditSink};
use crate::core::classifier::{JobClassifier, PageCountClassifier};
use crate::core::degradation::{CacheReclaimer, DegradationController, SafeCleanup};
use crate::core::hooks::ExecutionHooks;
use crate::core::resources::{MemorySampler, ResourceTelemetry};
use crate::core::scheduler::{AlwaysLeader, LeaderGuard, Scheduler};
use crate::core::store::JobStore;
use crate::core::SchedulerError;
use crate::infra::lock::ProcessLock;
use crate::infra::sampler::ProcessGroupSampler;
use crate::infra::store;
use crate::runtime::service::AdmissionService;

/// Builder for [`AdmissionService`].
///
/// Anything not supplied falls back to the configured default: the store
/// backend from `config.store`, a [`ProcessGroupSampler`] over
/// `config.telemetry.process_group`, and a [`PageCountClassifier`].
pub struct AdmissionServiceBuilder {
    config: AdmissionConfig,
    hooks: Arc<dyn ExecutionHooks>,
    store: Option<Arc<dyn JobStore>>,
    sampler: Option<Arc<dyn MemorySampler>>,
    classifier: Option<Arc<dyn JobClassifier>>,
    audit: Option<SharedAuditSink>,
    reclaimers: Vec<Arc<dyn CacheReclaimer>>,
    use_lock: bool,
    runtime: Option<Handle>,
}

impl AdmissionServiceBuilder {
    /// Start from a configuration and the host's execution hooks.
    #[must_use]
    pub fn new(config: AdmissionConfig, hooks: Arc<dyn ExecutionHooks>) -> Self {
        Self {
            config,
            hooks,
            store: None,
            sampler: None,
            classifier: None,
            audit: None,
            reclaimers: Vec::new(),
            use_lock: true,
            runtime: None,
        }
    }

    /// Use an already connected store instead of `config.store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom memory sampler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Use a custom classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn JobClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Record audit events into `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Some(shared_sink(sink));
        self
    }

    /// Record audit events into a sink the caller keeps a handle to.
    #[must_use]
    pub fn with_shared_audit(mut self, sink: SharedAuditSink) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Register a cache reclaimer for safe cleanup.
    #[must_use]
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn CacheReclaimer>) -> Self {
        self.reclaimers.push(reclaimer);
        self
    }

    /// Skip the leadership lock. Only for hosts that run exactly one
    /// scheduler.
    #[must_use]
    pub const fn without_lock(mut self) -> Self {
        self.use_lock = false;
        self
    }

    /// Drive store calls on this runtime. By default the current multi-thread
    /// runtime is used when there is one, otherwise the scheduler thread runs
    /// its own.
    #[must_use]
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the configuration, connect the store and wire everything.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] for invalid configuration, or the
    /// error from connecting the store or spawning the degradation thread.
    pub async fn build(self) -> Result<AdmissionService, SchedulerError> {
        self.config.validate().map_err(SchedulerError::Config)?;
        let config = self.config;

        let job_store = match self.store {
            Some(s) => s,
            None => store::connect(&config.store).await?,
        };
        let sampler = self.sampler.unwrap_or_else(|| {
            Arc::new(ProcessGroupSampler::new(config.telemetry.process_group))
        });
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(PageCountClassifier::new(config.classifier)));

        let cleanup = self
            .reclaimers
            .into_iter()
            .fold(SafeCleanup::new(config.degradation.trim_allocator), SafeCleanup::with_reclaimer);
        let degradation = DegradationController::start(
            &config.degradation,
            config.budget.emergency_timeout(),
            Arc::clone(&self.hooks),
            Arc::clone(&sampler),
            Arc::new(cleanup),
            self.audit.clone(),
        )?;

        let scheduler = Scheduler::new(
            Arc::clone(&job_store),
            ResourceTelemetry::new(job_store, sampler),
            classifier,
            self.hooks,
            Arc::new(degradation),
            config.budget.clone(),
            config.scheduler.clone(),
        )
        .with_audit(self.audit);

        let runtime = self.runtime.or_else(|| {
            Handle::try_current()
                .ok()
                .filter(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread)
        });

        let lock = self
            .use_lock
            .then(|| Arc::new(ProcessLock::new(config.lock.path.clone())));
        let leader: Arc<dyn LeaderGuard> = match &lock {
            Some(lock) => Arc::clone(lock) as Arc<dyn LeaderGuard>,
            None => Arc::new(AlwaysLeader),
        };

        tracing::debug!(use_lock = lock.is_some(), host_runtime = runtime.is_some(), "admission service built");
        Ok(AdmissionService::new(
            config,
            Arc::new(scheduler),
            lock,
            leader,
            runtime,
        ))
    }
}
