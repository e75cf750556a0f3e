//! # Prometheus Admission
//!
//! Admission control for memory-hungry document translation workers.
//!
//! Several worker processes share one job table. Exactly one of them, the
//! holder of a file lock, runs a scheduler thread that decides on every tick
//! how many queued jobs may start, based on fleet-wide running counts, the
//! resident memory of the whole worker process group and per-tier budgets.
//!
//! ## Core Problem Solved
//!
//! - **Memory blowups**: large PDFs and slide decks can take gigabytes; admitting
//!   them blindly takes the host down
//! - **Many processes, one budget**: workers are forked by a supervisor, so
//!   every limit must be computed across processes
//! - **Bad days**: when memory runs away anyway, running jobs are paused,
//!   caches dropped and work resumed once the pressure is gone
//!
//! ## Key Features
//!
//! - **Atomic claims**: `queued → running` happens at most once per job, even
//!   with racing schedulers (Postgres `SKIP LOCKED`, single-statement SQLite)
//! - **Cost tiers**: cheap classification into `default` and `heavy`, each
//!   with its own concurrency cap
//! - **Pressure bands**: normal admission, safe cleanup when nearly idle, and an
//!   emergency routine with a timeout valve
//! - **Leadership**: `flock`-based lock with stale-holder recovery
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_admission::builders::AdmissionServiceBuilder;
//! use prometheus_admission::config::AdmissionConfig;
//! use prometheus_admission::core::{NewJob, ResourceDescriptor};
//!
//! let config = AdmissionConfig::from_env()?;
//! let service = AdmissionServiceBuilder::new(config, Arc::new(my_hooks))
//!     .build()
//!     .await?;
//! service.start()?;
//!
//! let descriptor = ResourceDescriptor { page_count: Some(240), ..Default::default() };
//! service.submit(NewJob::new("tenant-a", descriptor)).await?;
//! ```
//!
//! For complete scenarios, see `tests/scheduler_scenarios.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Jobs, policy, degradation and the scheduler loop.
pub mod core;
/// Configuration models for budgets, cadence, backends and telemetry.
pub mod config;
/// Builders that assemble services from configuration.
pub mod builders;
/// Infrastructure adapters: job stores, leadership lock, memory sampling.
pub mod infra;
/// Service lifecycle and status surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
