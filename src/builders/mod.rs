//! Builders that assemble services from configuration.

pub mod service_builder;

pub use service_builder::AdmissionServiceBuilder;
