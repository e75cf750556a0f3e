//! Service lifecycle and the status surface.

pub mod api;
pub mod service;

pub use api::{Health, SchedulerStatus};
pub use service::AdmissionService;
