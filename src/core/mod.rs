//! Core scheduling abstractions: jobs, policy, degradation and the tick loop.

pub mod audit;
pub mod classifier;
pub mod degradation;
pub mod error;
pub mod hooks;
pub mod job;
pub mod policy;
pub mod resources;
pub mod scheduler;
pub mod scheduler_loop;
pub mod store;

pub use audit::{
    shared_sink, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, SharedAuditSink,
    TracingAuditSink,
};
pub use classifier::{classify_or_default, ClassifyError, JobClassifier, PageCountClassifier};
pub use degradation::{
    CacheReclaimer, CleanupReport, DegradationController, EmergencySnapshot, RoutineOutcome,
    SafeCleanup,
};
pub use error::{AppResult, SchedulerError};
pub use hooks::ExecutionHooks;
pub use job::{
    CostTier, Job, JobId, JobState, NewJob, OwnerMetadata, ResourceDescriptor, StateCounts,
    TierCounts, TierFilter,
};
pub use policy::{
    evaluate, tier_filter, within_caps, AdmissionDecision, AdmissionInput, DeferReason,
    EmergencyPhase, PressureLevel,
};
pub use resources::{MemorySample, MemorySampler, ResourceTelemetry};
pub use scheduler::{AlwaysLeader, LeaderGuard, Scheduler, TickReport};
pub use scheduler_loop::{backoff_delay, spawn_scheduler_loop, LoopControl, LoopState};
pub use store::JobStore;
