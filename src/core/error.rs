//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The shared job store rejected or failed a query.
    #[error("store error: {0}")]
    Store(String),
    /// The leadership lock file could not be opened, written or removed.
    #[error("lock error: {0}")]
    Lock(#[from] std::io::Error),
    /// Memory telemetry could not be sampled.
    #[error("telemetry unavailable: {0}")]
    Telemetry(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Safe cleanup was requested while too many jobs were active.
    #[error("cleanup refused: {active} active jobs")]
    CleanupRefused {
        /// Number of jobs that were still active.
        active: usize,
    },
    /// This process no longer holds the scheduler lock.
    #[error("scheduler leadership lost")]
    LeadershipLost,
    /// The service or one of its threads has shut down.
    #[error("scheduler shut down")]
    Shutdown,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for SchedulerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("serialization: {err}"))
    }
}

/// Application-facing result using anyhow for host callbacks.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_refused_reports_active_jobs() {
        let err = SchedulerError::CleanupRefused { active: 3 };
        assert_eq!(err.to_string(), "cleanup refused: 3 active jobs");
    }

    #[test]
    fn io_errors_become_lock_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SchedulerError = io.into();
        assert!(matches!(err, SchedulerError::Lock(_)));
        assert_eq!(err.to_string(), "lock error: denied");
    }
}
