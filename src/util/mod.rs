//! Shared utilities.

pub mod alloc;
pub mod clock;
pub mod telemetry;

pub use alloc::release_free_heap;
pub use clock::now_ms;
pub use telemetry::init_tracing;
