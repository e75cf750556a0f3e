//! Shared fixtures for admission integration tests.
//!
//! Hooks record every callback, the sampler reports whatever the test sets,
//! and services are built on the in-memory store without the file lock.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use prometheus_admission::builders::AdmissionServiceBuilder;
use prometheus_admission::config::{
    AdmissionBudget, AdmissionConfig, DegradationConfig, LoopConfig, MemoryThresholds,
    PauseSelection, TierCaps,
};
use prometheus_admission::core::{
    shared_sink, AppResult, AuditAction, CacheReclaimer, CostTier, ExecutionHooks,
    InMemoryAuditSink, Job, JobId, JobStore, MemorySampler, NewJob, ResourceDescriptor,
    SchedulerError, SharedAuditSink,
};
use prometheus_admission::infra::InMemoryJobStore;
use prometheus_admission::runtime::AdmissionService;

pub const MIB: u64 = 1024 * 1024;

/// Memory thresholds used throughout: 100 / 150 / 200 MiB.
pub const MAX_BYTES: u64 = 100 * MIB;
pub const CRITICAL_BYTES: u64 = 150 * MIB;
pub const EMERGENCY_BYTES: u64 = 200 * MIB;

// ============================================================================
// Hooks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Accept,
    Decline,
    Error,
    Panic,
}

pub struct RecordingHooks {
    mode: Mutex<StartMode>,
    pause_delay: Mutex<Duration>,
    started: Mutex<Vec<JobId>>,
    paused: Mutex<Vec<JobId>>,
    resumed: Mutex<Vec<JobId>>,
}

impl RecordingHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(StartMode::Accept),
            pause_delay: Mutex::new(Duration::ZERO),
            started: Mutex::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
            resumed: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: StartMode) {
        *self.mode.lock() = mode;
    }

    /// Make every `pause_task` call block the degradation thread this long.
    pub fn set_pause_delay(&self, delay: Duration) {
        *self.pause_delay.lock() = delay;
    }

    pub fn started(&self) -> Vec<JobId> {
        self.started.lock().clone()
    }

    pub fn paused(&self) -> Vec<JobId> {
        self.paused.lock().clone()
    }

    pub fn resumed(&self) -> Vec<JobId> {
        self.resumed.lock().clone()
    }
}

impl ExecutionHooks for RecordingHooks {
    fn start_execution(&self, job: &Job) -> AppResult<bool> {
        self.started.lock().push(job.id);
        match *self.mode.lock() {
            StartMode::Accept => Ok(true),
            StartMode::Decline => Ok(false),
            StartMode::Error => Err(anyhow!("worker pool unavailable")),
            StartMode::Panic => panic!("start hook exploded"),
        }
    }

    fn pause_task(&self, job_id: JobId) -> AppResult<()> {
        let delay = *self.pause_delay.lock();
        std::thread::sleep(delay);
        self.paused.lock().push(job_id);
        Ok(())
    }

    fn resume_task(&self, job_id: JobId) -> AppResult<()> {
        self.resumed.lock().push(job_id);
        Ok(())
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Sampler whose reading is set by the test.
pub struct ScriptedSampler {
    bytes: AtomicU64,
    failing: AtomicBool,
}

impl ScriptedSampler {
    pub fn new(bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            bytes: AtomicU64::new(bytes),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MemorySampler for ScriptedSampler {
    fn sample_bytes(&self) -> Result<u64, SchedulerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::Telemetry("sampler offline".into()));
        }
        Ok(self.bytes.load(Ordering::SeqCst))
    }
}

/// Reclaimer that drops the sampled memory to `after` when it runs.
pub struct DroppingReclaimer {
    pub sampler: Arc<ScriptedSampler>,
    pub after: u64,
}

impl CacheReclaimer for DroppingReclaimer {
    fn name(&self) -> &str {
        "test-cache"
    }

    fn reclaim(&self) -> AppResult<()> {
        self.sampler.set(self.after);
        Ok(())
    }
}

// ============================================================================
// Configuration and services
// ============================================================================

pub fn config(max_concurrent: usize, heavy_cap: usize) -> AdmissionConfig {
    AdmissionConfig {
        budget: AdmissionBudget {
            max_concurrent,
            tier_caps: TierCaps {
                default: max_concurrent,
                heavy: heavy_cap,
            },
            memory: MemoryThresholds {
                max_bytes: MAX_BYTES,
                critical_bytes: CRITICAL_BYTES,
                emergency_bytes: EMERGENCY_BYTES,
            },
            emergency_timeout_secs: 1,
            admissions_per_tick: 10,
            admission_delay_ms: 0,
        },
        scheduler: LoopConfig {
            tick_interval_ms: 50,
            backoff_base_ms: 10,
            backoff_max_ms: 40,
            max_consecutive_failures: 3,
            ..LoopConfig::default()
        },
        degradation: DegradationConfig {
            pause_selection: PauseSelection::All,
            trim_allocator: false,
        },
        ..AdmissionConfig::default()
    }
}

pub struct Harness {
    pub service: AdmissionService,
    pub store: Arc<InMemoryJobStore>,
    pub hooks: Arc<RecordingHooks>,
    pub sampler: Arc<ScriptedSampler>,
    pub audit: SharedAuditSink,
}

impl Harness {
    pub async fn new(config: AdmissionConfig) -> Self {
        Self::with_builder(config, |b, _| b).await
    }

    /// Build with extra builder settings; the closure receives the sampler
    /// the service will use.
    pub async fn with_builder(
        config: AdmissionConfig,
        customize: impl FnOnce(
            AdmissionServiceBuilder,
            Arc<ScriptedSampler>,
        ) -> AdmissionServiceBuilder,
    ) -> Self {
        prometheus_admission::util::init_tracing();
        let store = Arc::new(InMemoryJobStore::new());
        let hooks = RecordingHooks::new();
        let sampler = ScriptedSampler::new(10 * MIB);
        let audit = shared_sink(InMemoryAuditSink::new(1_000));
        let builder = AdmissionServiceBuilder::new(config, hooks.clone())
            .with_store(store.clone())
            .with_sampler(sampler.clone())
            .with_shared_audit(Arc::clone(&audit))
            .without_lock();
        let service = customize(builder, Arc::clone(&sampler))
            .build()
            .await
            .unwrap();
        Self {
            service,
            store,
            hooks,
            sampler,
            audit,
        }
    }

    pub async fn enqueue(&self, pages: u32) -> Job {
        self.service.submit(document(pages)).await.unwrap()
    }

    pub async fn enqueue_tier(&self, tier: CostTier) -> Job {
        self.service
            .submit(document(10).with_tier(tier))
            .await
            .unwrap()
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.store.get(id).await.unwrap().unwrap()
    }

    pub fn audit_actions(&self) -> Vec<AuditAction> {
        self.audit.lock().recent().into_iter().map(|e| e.action).collect()
    }
}

pub fn document(pages: u32) -> NewJob {
    NewJob::new(
        "tenant-a",
        ResourceDescriptor {
            format: Some("pdf".into()),
            page_count: Some(pages),
            size_bytes: None,
        },
    )
}
