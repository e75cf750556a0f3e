//! Infrastructure adapters: job stores, the leadership lock and memory
//! sampling.

pub mod lock;
pub mod sampler;
pub mod store;

pub use lock::{LockToken, ProcessLock};
pub use sampler::ProcessGroupSampler;
pub use store::InMemoryJobStore;
#[cfg(feature = "postgres")]
pub use store::PostgresJobStore;
#[cfg(feature = "sqlite")]
pub use store::SqliteJobStore;
