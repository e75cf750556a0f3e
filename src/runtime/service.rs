//! The admission service: leadership, the scheduler thread and status.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::AdmissionConfig;
use crate::core::degradation::EmergencySnapshot;
use crate::core::job::{Job, JobId, NewJob};
use crate::core::policy::{evaluate, AdmissionDecision, AdmissionInput, PressureLevel};
use crate::core::scheduler::{LeaderGuard, Scheduler, TickReport};
use crate::core::scheduler_loop::{spawn_scheduler_loop, LoopControl, LoopState};
use crate::core::store::JobStore;
use crate::core::SchedulerError;
use crate::infra::lock::ProcessLock;
use crate::runtime::api::{Health, SchedulerStatus};

/// An explicitly constructed admission service. Build one with
/// [`crate::builders::AdmissionServiceBuilder`].
pub struct AdmissionService {
    config: AdmissionConfig,
    scheduler: Arc<Scheduler>,
    lock: Option<Arc<ProcessLock>>,
    leader: Arc<dyn LeaderGuard>,
    control: Arc<LoopControl>,
    runtime: Option<tokio::runtime::Handle>,
    worker: Mutex<Option<JoinHandle<LoopState>>>,
}

impl AdmissionService {
    pub(crate) fn new(
        config: AdmissionConfig,
        scheduler: Arc<Scheduler>,
        lock: Option<Arc<ProcessLock>>,
        leader: Arc<dyn LeaderGuard>,
        runtime: Option<tokio::runtime::Handle>,
    ) -> Self {
        Self {
            config,
            scheduler,
            lock,
            leader,
            control: Arc::new(LoopControl::new()),
            runtime,
            worker: Mutex::new(None),
        }
    }

    /// Take leadership and start the scheduler thread.
    ///
    /// Returns `Ok(false)` when another process already schedules; this
    /// process then only enqueues and runs work.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be used or the thread cannot
    /// be spawned.
    pub fn start(&self) -> Result<bool, SchedulerError> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(true);
        }
        if self.control.state().is_terminal() {
            return Err(SchedulerError::Shutdown);
        }
        if let Some(lock) = &self.lock {
            if !lock.acquire()? {
                info!(path = %lock.path().display(), "another process holds the scheduler lock");
                return Ok(false);
            }
        }
        let handle = spawn_scheduler_loop(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.leader),
            Arc::clone(&self.control),
            self.runtime.clone(),
        )?;
        *worker = Some(handle);
        info!(
            max_concurrent = self.config.budget.max_concurrent,
            tick_interval_ms = self.config.scheduler.tick_interval_ms,
            "admission scheduler started"
        );
        Ok(true)
    }

    /// Wake the scheduler for an immediate tick.
    pub fn notify(&self) {
        self.control.notify();
    }

    /// Enqueue a job and wake the scheduler.
    ///
    /// # Errors
    ///
    /// Returns a store error if the insert fails.
    pub async fn submit(&self, job: NewJob) -> Result<Job, SchedulerError> {
        let job = self.scheduler.store().enqueue(job).await?;
        self.notify();
        Ok(job)
    }

    /// Mark a running job done and wake the scheduler for the freed slot.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn complete(&self, id: JobId) -> Result<bool, SchedulerError> {
        let done = self.scheduler.store().mark_done(id).await?;
        self.notify();
        Ok(done)
    }

    /// Mark a job failed and wake the scheduler.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn fail(&self, id: JobId, reason: &str) -> Result<bool, SchedulerError> {
        let failed = self.scheduler.store().mark_failed(id, reason).await?;
        self.notify();
        Ok(failed)
    }

    /// Run one tick on the caller's task, outside the loop.
    ///
    /// # Errors
    ///
    /// Propagates tick failures.
    pub async fn tick_once(&self) -> Result<TickReport, SchedulerError> {
        self.scheduler.tick(self.leader.as_ref()).await
    }

    /// Stop the loop, resume paused jobs and release leadership.
    ///
    /// Blocks until the scheduler thread exits, so call it from a blocking
    /// context (or `spawn_blocking`) when inside a runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be removed.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        self.control.stop();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(state) => info!(?state, "scheduler thread joined"),
                Err(_) => warn!("scheduler thread panicked"),
            }
        }
        self.scheduler.degradation().shutdown();
        if let Some(lock) = &self.lock {
            lock.release()?;
        }
        Ok(())
    }

    /// Current loop state.
    #[must_use]
    pub fn loop_state(&self) -> LoopState {
        self.control.state()
    }

    /// Report of the last successful loop tick.
    #[must_use]
    pub fn last_tick(&self) -> Option<TickReport> {
        self.control.last_tick()
    }

    /// Whether this process currently holds leadership.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader.is_leader()
    }

    /// Liveness summary.
    #[must_use]
    pub fn health(&self) -> Health {
        Health::from_loop(
            self.control.state(),
            self.control.consecutive_failures(),
            self.is_leader(),
        )
    }

    /// Degradation controller state.
    #[must_use]
    pub fn emergency(&self) -> EmergencySnapshot {
        self.scheduler.degradation().snapshot()
    }

    /// Fresh status snapshot.
    ///
    /// # Errors
    ///
    /// Returns a store error if counts cannot be read.
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let counts = self.scheduler.telemetry().counts().await?;
        let memory_bytes = self.scheduler.telemetry().memory_bytes();
        let budget = self.scheduler.budget().clone();
        let emergency = self.emergency();
        let decision = evaluate(
            &budget,
            &AdmissionInput {
                running: counts.running_by_tier,
                memory_bytes,
                emergency: emergency.phase,
                cleanup_attempted: false,
            },
        );
        Ok(SchedulerStatus {
            queued_count: counts.queued,
            running_count: counts.running,
            queued_by_tier: counts.queued_by_tier,
            running_by_tier: counts.running_by_tier,
            memory_bytes,
            pressure: PressureLevel::from_memory(&budget.memory, memory_bytes),
            can_admit_more: matches!(decision, AdmissionDecision::Admit { slots } if slots > 0),
            budget,
            is_leader: self.is_leader(),
            loop_state: self.control.state(),
            emergency,
        })
    }

    /// Shared job store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(self.scheduler.store())
    }

    /// The scheduler driven by this service.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}

impl Drop for AdmissionService {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "admission service shutdown on drop failed");
        }
    }
}
