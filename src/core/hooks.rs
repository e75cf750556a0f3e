//! Execution callbacks supplied by the hosting application.

use crate::core::job::{Job, JobId};
use crate::core::AppResult;

/// Callbacks into the host that actually runs translation work.
///
/// The scheduler only flips job state; everything else happens behind these
/// hooks.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_admission::core::{AppResult, ExecutionHooks, Job, JobId};
///
/// struct Workers { tx: crossbeam_channel::Sender<JobId> }
///
/// impl ExecutionHooks for Workers {
///     fn start_execution(&self, job: &Job) -> AppResult<bool> {
///         // Acknowledge now, run on a worker thread.
///         Ok(self.tx.try_send(job.id).is_ok())
///     }
///     fn pause_task(&self, _id: JobId) -> AppResult<()> { Ok(()) }
///     fn resume_task(&self, _id: JobId) -> AppResult<()> { Ok(()) }
/// }
/// ```
pub trait ExecutionHooks: Send + Sync + 'static {
    /// Start executing a freshly claimed job.
    ///
    /// Called synchronously once per admission. Must return quickly (or
    /// acknowledge and run asynchronously) and must never start a job twice.
    /// `Ok(false)`, an error or a panic marks the job failed; it is not
    /// retried.
    fn start_execution(&self, job: &Job) -> AppResult<bool>;

    /// Pause a running job during emergency degradation. May block while the
    /// job reaches a safe point.
    fn pause_task(&self, job_id: JobId) -> AppResult<()>;

    /// Resume a job paused by [`ExecutionHooks::pause_task`].
    fn resume_task(&self, job_id: JobId) -> AppResult<()>;
}
