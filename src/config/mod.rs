//! Configuration models for budgets, cadence, backends and telemetry.

pub mod admission;

pub use admission::{
    AdmissionBudget, AdmissionConfig, ClassifierConfig, DegradationConfig, LockConfig,
    LoopConfig, MemoryThresholds, PauseSelection, ProcessGroup, StoreBackendConfig,
    TelemetryConfig, TierCaps,
};
