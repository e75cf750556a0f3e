//! Memory-pressure degradation: safe cleanup and the emergency routine.
//!
//! # Design
//!
//! - **Safe cleanup** runs inline on the scheduler thread and only when at most
//!   one job is active.
//! - **Emergency routine** runs on a dedicated `admission-degradation` thread
//!   fed through a channel, so pausing jobs never blocks a tick.
//! - **Timeout**: an episode that outlives its timeout force-resumes every
//!   paused job and is marked expired until memory drops below the emergency
//!   threshold.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{DegradationConfig, PauseSelection};
use crate::core::audit::{record, AuditAction, AuditEvent, SharedAuditSink};
use crate::core::hooks::ExecutionHooks;
use crate::core::job::JobId;
use crate::core::policy::EmergencyPhase;
use crate::core::resources::MemorySampler;
use crate::core::{AppResult, SchedulerError};
use crate::util::alloc::release_free_heap;

/// A cache the host can drop under memory pressure (model caches, font
/// caches, rendered page buffers).
pub trait CacheReclaimer: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Release whatever can be released.
    fn reclaim(&self) -> AppResult<()>;
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Reclaimers that completed.
    pub reclaimed: usize,
    /// Reclaimers that returned an error or panicked.
    pub failed: usize,
    /// Whether the allocator returned pages to the OS.
    pub allocator_trimmed: bool,
}

/// Releases process-held caches and garbage without touching running jobs.
pub struct SafeCleanup {
    reclaimers: Vec<Arc<dyn CacheReclaimer>>,
    trim_allocator: bool,
}

impl SafeCleanup {
    /// Cleanup with no reclaimers.
    #[must_use]
    pub const fn new(trim_allocator: bool) -> Self {
        Self {
            reclaimers: Vec::new(),
            trim_allocator,
        }
    }

    /// Register a cache reclaimer.
    #[must_use]
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn CacheReclaimer>) -> Self {
        self.reclaimers.push(reclaimer);
        self
    }

    /// Run every reclaimer and optionally trim the allocator.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::CleanupRefused`] when more than one job is
    /// active; releasing caches under several live jobs could destabilize them.
    pub fn run(&self, active_jobs: usize) -> Result<CleanupReport, SchedulerError> {
        if active_jobs > 1 {
            return Err(SchedulerError::CleanupRefused {
                active: active_jobs,
            });
        }
        let mut report = CleanupReport::default();
        for reclaimer in &self.reclaimers {
            match catch_unwind(AssertUnwindSafe(|| reclaimer.reclaim())) {
                Ok(Ok(())) => report.reclaimed += 1,
                Ok(Err(err)) => {
                    warn!(reclaimer = reclaimer.name(), error = %err, "cache reclaim failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(reclaimer = reclaimer.name(), "cache reclaimer panicked");
                    report.failed += 1;
                }
            }
        }
        if self.trim_allocator {
            report.allocator_trimmed = release_free_heap();
        }
        info!(
            active_jobs,
            reclaimed = report.reclaimed,
            failed = report.failed,
            allocator_trimmed = report.allocator_trimmed,
            "safe cleanup finished"
        );
        Ok(report)
    }
}

/// How the last emergency step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineOutcome {
    /// Memory fell below the emergency threshold; paused jobs were resumed.
    Recovered,
    /// Memory is still at or above the threshold. Jobs were resumed and the
    /// next tick decides whether to run the routine again.
    StillAboveThreshold,
    /// Nothing was running to pause.
    NothingToPause,
    /// The episode timed out and paused jobs were resumed regardless.
    ForcedResume,
}

/// Point-in-time view of the degradation controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencySnapshot {
    /// Episode phase.
    pub phase: EmergencyPhase,
    /// Jobs currently paused by the controller.
    pub paused: Vec<JobId>,
    /// Milliseconds since the episode began.
    pub elapsed_ms: Option<u64>,
    /// Whether an emergency routine is executing.
    pub routine_in_progress: bool,
    /// Result of the last routine or resume.
    pub last_outcome: Option<RoutineOutcome>,
}

enum Command {
    Routine { candidates: Vec<JobId>, threshold: u64 },
    ResumeAll { forced: bool },
    Shutdown,
}

struct EmergencyState {
    phase: EmergencyPhase,
    entered_at: Option<Instant>,
    paused: BTreeSet<JobId>,
    routine_in_progress: bool,
    pending: usize,
    last_outcome: Option<RoutineOutcome>,
}

struct Shared {
    state: Mutex<EmergencyState>,
    idle: Condvar,
}

impl Shared {
    fn finish_command(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    hooks: Arc<dyn ExecutionHooks>,
    sampler: Arc<dyn MemorySampler>,
    cleanup: Arc<SafeCleanup>,
    selection: PauseSelection,
    audit: Option<SharedAuditSink>,
}

/// Tracks emergency episodes and drives the pause/cleanup/resume routine.
pub struct DegradationController {
    shared: Arc<Shared>,
    timeout: Duration,
    cleanup: Arc<SafeCleanup>,
    audit: Option<SharedAuditSink>,
    tx: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DegradationController {
    /// Spawn the degradation thread.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Backend`] if the thread cannot be spawned.
    pub fn start(
        config: &DegradationConfig,
        timeout: Duration,
        hooks: Arc<dyn ExecutionHooks>,
        sampler: Arc<dyn MemorySampler>,
        cleanup: Arc<SafeCleanup>,
        audit: Option<SharedAuditSink>,
    ) -> Result<Self, SchedulerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(EmergencyState {
                phase: EmergencyPhase::Inactive,
                entered_at: None,
                paused: BTreeSet::new(),
                routine_in_progress: false,
                pending: 0,
                last_outcome: None,
            }),
            idle: Condvar::new(),
        });
        let (tx, rx) = unbounded();
        let worker = Worker {
            shared: Arc::clone(&shared),
            hooks,
            sampler,
            cleanup: Arc::clone(&cleanup),
            selection: config.pause_selection,
            audit: audit.clone(),
        };
        let handle = thread::Builder::new()
            .name("admission-degradation".into())
            .spawn(move || worker.run(&rx))
            .map_err(|e| SchedulerError::Backend(format!("spawn degradation thread: {e}")))?;
        Ok(Self {
            shared,
            timeout,
            cleanup,
            audit,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Current episode phase.
    #[must_use]
    pub fn phase(&self) -> EmergencyPhase {
        self.shared.state.lock().phase
    }

    /// Cleanup routine shared with the scheduler's critical-band handling.
    #[must_use]
    pub fn safe_cleanup(&self) -> &SafeCleanup {
        &self.cleanup
    }

    /// Called when a tick observes memory at or above the emergency threshold.
    ///
    /// Starts an episode if none is active, expires it once the timeout has
    /// elapsed, and otherwise queues a routine unless one is already running.
    pub fn on_emergency(&self, running: &[JobId], threshold_bytes: u64) -> EmergencyPhase {
        let mut state = self.shared.state.lock();
        match state.phase {
            EmergencyPhase::Expired => {
                if !state.paused.is_empty() && !state.routine_in_progress {
                    self.send_locked(&mut state, Command::ResumeAll { forced: true });
                }
                return EmergencyPhase::Expired;
            }
            EmergencyPhase::Inactive => {
                state.phase = EmergencyPhase::Active;
                state.entered_at = Some(Instant::now());
                warn!(running = running.len(), "entering memory emergency");
                record(
                    self.audit.as_ref(),
                    AuditEvent::new(AuditAction::EmergencyEntered, None)
                        .with_detail(format!("running={}", running.len())),
                );
            }
            EmergencyPhase::Active => {
                let elapsed = state.entered_at.map_or(Duration::ZERO, |t| t.elapsed());
                if elapsed >= self.timeout {
                    state.phase = EmergencyPhase::Expired;
                    error!(
                        elapsed_secs = elapsed.as_secs(),
                        paused = state.paused.len(),
                        "memory emergency timed out, resuming paused jobs"
                    );
                    record(
                        self.audit.as_ref(),
                        AuditEvent::new(AuditAction::EmergencyExpired, None)
                            .with_detail(format!("paused={}", state.paused.len())),
                    );
                    // Queued behind any routine still pausing, so nothing it
                    // pauses stays paused.
                    self.send_locked(&mut state, Command::ResumeAll { forced: true });
                    return EmergencyPhase::Expired;
                }
            }
        }

        if state.routine_in_progress {
            return EmergencyPhase::Active;
        }
        let candidates: Vec<JobId> = running
            .iter()
            .copied()
            .filter(|id| !state.paused.contains(id))
            .collect();
        if candidates.is_empty() && state.paused.is_empty() {
            error!("memory emergency with no running jobs to pause, waiting for timeout");
            state.last_outcome = Some(RoutineOutcome::NothingToPause);
            return EmergencyPhase::Active;
        }
        state.routine_in_progress = true;
        if !self.send_locked(
            &mut state,
            Command::Routine {
                candidates,
                threshold: threshold_bytes,
            },
        ) {
            state.routine_in_progress = false;
        }
        EmergencyPhase::Active
    }

    /// Called when a tick observes memory below the emergency threshold.
    /// Ends the episode and resumes anything still paused.
    pub fn on_below_emergency(&self) {
        let mut state = self.shared.state.lock();
        if state.phase != EmergencyPhase::Inactive {
            info!(phase = ?state.phase, "memory below emergency threshold, ending episode");
            state.phase = EmergencyPhase::Inactive;
            state.entered_at = None;
        }
        if !state.paused.is_empty() && !state.routine_in_progress {
            self.send_locked(&mut state, Command::ResumeAll { forced: false });
        }
    }

    /// Snapshot for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> EmergencySnapshot {
        let state = self.shared.state.lock();
        EmergencySnapshot {
            phase: state.phase,
            paused: state.paused.iter().copied().collect(),
            elapsed_ms: state
                .entered_at
                .map(|t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX)),
            routine_in_progress: state.routine_in_progress,
            last_outcome: state.last_outcome,
        }
    }

    /// Block until every queued command has been processed. Returns `false`
    /// on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.pending > 0 {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.pending == 0;
            }
        }
        true
    }

    /// Resume paused jobs and stop the degradation thread.
    pub fn shutdown(&self) {
        let sender = self.tx.lock().take();
        if let Some(tx) = sender {
            {
                let mut state = self.shared.state.lock();
                state.pending += 1;
            }
            if tx.send(Command::Shutdown).is_err() {
                self.shared.finish_command();
            }
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("degradation thread panicked");
            }
        }
    }

    fn send_locked(&self, state: &mut EmergencyState, command: Command) -> bool {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            warn!("degradation controller is shut down, dropping command");
            return false;
        };
        if tx.send(command).is_err() {
            error!("degradation thread is gone");
            return false;
        }
        state.pending += 1;
        true
    }
}

impl Drop for DegradationController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker {
    fn run(&self, rx: &Receiver<Command>) {
        debug!("degradation thread started");
        for command in rx {
            let stop = matches!(command, Command::Shutdown);
            match command {
                Command::Routine {
                    candidates,
                    threshold,
                } => self.routine(candidates, threshold),
                Command::ResumeAll { forced } => {
                    let outcome = if forced {
                        RoutineOutcome::ForcedResume
                    } else {
                        RoutineOutcome::Recovered
                    };
                    self.resume_all(outcome);
                }
                Command::Shutdown => self.resume_all(RoutineOutcome::ForcedResume),
            }
            self.shared.finish_command();
            if stop {
                break;
            }
        }
        debug!("degradation thread stopped");
    }

    fn routine(&self, candidates: Vec<JobId>, threshold: u64) {
        let unpaused = candidates.len();
        let selected = select_for_pause(candidates, self.selection);
        let mut newly_paused = 0usize;
        for id in selected {
            match catch_unwind(AssertUnwindSafe(|| self.hooks.pause_task(id))) {
                Ok(Ok(())) => {
                    self.shared.state.lock().paused.insert(id);
                    newly_paused += 1;
                    record(self.audit.as_ref(), AuditEvent::new(AuditAction::Paused, Some(id)));
                }
                Ok(Err(err)) => warn!(job_id = id, error = %err, "pause failed"),
                Err(_) => warn!(job_id = id, "pause hook panicked"),
            }
        }

        let active = unpaused.saturating_sub(newly_paused);
        match self.cleanup.run(active) {
            Ok(report) => record(
                self.audit.as_ref(),
                AuditEvent::new(AuditAction::Cleanup, None).with_detail(format!(
                    "emergency reclaimed={} failed={}",
                    report.reclaimed, report.failed
                )),
            ),
            Err(err) => warn!(error = %err, "emergency cleanup skipped"),
        }

        let memory = match self.sampler.sample_bytes() {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(error = %err, "memory telemetry unavailable after cleanup");
                None
            }
        };
        let outcome = if self.shared.state.lock().phase == EmergencyPhase::Expired {
            RoutineOutcome::ForcedResume
        } else if memory.is_none_or(|m| m < threshold) {
            info!(memory_bytes = ?memory, "memory recovered after emergency cleanup");
            RoutineOutcome::Recovered
        } else {
            error!(
                memory_bytes = ?memory,
                threshold_bytes = threshold,
                "emergency cleanup did not relieve memory"
            );
            RoutineOutcome::StillAboveThreshold
        };
        self.resume_all(outcome);
        self.shared.state.lock().routine_in_progress = false;
    }

    fn resume_all(&self, outcome: RoutineOutcome) {
        let paused: Vec<JobId> = {
            let mut state = self.shared.state.lock();
            std::mem::take(&mut state.paused).into_iter().collect()
        };
        for id in &paused {
            match catch_unwind(AssertUnwindSafe(|| self.hooks.resume_task(*id))) {
                Ok(Ok(())) => {
                    record(self.audit.as_ref(), AuditEvent::new(AuditAction::Resumed, Some(*id)));
                }
                Ok(Err(err)) => warn!(job_id = *id, error = %err, "resume failed"),
                Err(_) => warn!(job_id = *id, "resume hook panicked"),
            }
        }
        if !paused.is_empty() {
            info!(resumed = paused.len(), ?outcome, "paused jobs resumed");
        }
        self.shared.state.lock().last_outcome = Some(outcome);
    }
}

fn select_for_pause(mut candidates: Vec<JobId>, selection: PauseSelection) -> Vec<JobId> {
    match selection {
        PauseSelection::All => candidates,
        PauseSelection::RandomFraction(fraction) => {
            if candidates.is_empty() {
                return candidates;
            }
            candidates.shuffle(&mut rand::rng());
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let count = ((candidates.len() as f64) * fraction).ceil() as usize;
            candidates.truncate(count.clamp(1, candidates.len()));
            candidates
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct RecordingHooks {
        pause_delay: Duration,
        paused: Mutex<Vec<JobId>>,
        resumed: Mutex<Vec<JobId>>,
    }

    impl ExecutionHooks for RecordingHooks {
        fn start_execution(&self, _job: &crate::core::job::Job) -> AppResult<bool> {
            Ok(true)
        }
        fn pause_task(&self, job_id: JobId) -> AppResult<()> {
            thread::sleep(self.pause_delay);
            self.paused.lock().push(job_id);
            Ok(())
        }
        fn resume_task(&self, job_id: JobId) -> AppResult<()> {
            self.resumed.lock().push(job_id);
            Ok(())
        }
    }

    struct FixedSampler(AtomicU64);

    impl MemorySampler for FixedSampler {
        fn sample_bytes(&self) -> Result<u64, SchedulerError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    struct CountingReclaimer(AtomicUsize);

    impl CacheReclaimer for CountingReclaimer {
        fn name(&self) -> &str {
            "counting"
        }
        fn reclaim(&self) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(
        hooks: Arc<RecordingHooks>,
        memory: u64,
        timeout: Duration,
    ) -> (DegradationController, Arc<FixedSampler>) {
        let sampler = Arc::new(FixedSampler(AtomicU64::new(memory)));
        let c = DegradationController::start(
            &DegradationConfig {
                pause_selection: PauseSelection::All,
                trim_allocator: false,
            },
            timeout,
            hooks,
            sampler.clone(),
            Arc::new(SafeCleanup::new(false)),
            None,
        )
        .unwrap();
        (c, sampler)
    }

    #[test]
    fn cleanup_refuses_with_several_active_jobs() {
        let reclaimer = Arc::new(CountingReclaimer(AtomicUsize::new(0)));
        let cleanup = SafeCleanup::new(false).with_reclaimer(reclaimer.clone());
        assert!(matches!(
            cleanup.run(2),
            Err(SchedulerError::CleanupRefused { active: 2 })
        ));
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 0);
        let report = cleanup.run(1).unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn random_fraction_pauses_at_least_one() {
        let picked = select_for_pause(vec![1, 2, 3, 4, 5], PauseSelection::RandomFraction(0.01));
        assert_eq!(picked.len(), 1);
        let picked = select_for_pause(vec![1, 2, 3, 4], PauseSelection::RandomFraction(0.5));
        assert_eq!(picked.len(), 2);
        assert!(select_for_pause(Vec::new(), PauseSelection::RandomFraction(0.5)).is_empty());
    }

    #[test]
    fn recovered_routine_resumes_everything() {
        let hooks = Arc::new(RecordingHooks::default());
        let (c, _sampler) = controller(hooks.clone(), 10, Duration::from_secs(300));
        assert_eq!(c.on_emergency(&[1, 2], 100), EmergencyPhase::Active);
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(*hooks.paused.lock(), vec![1, 2]);
        assert_eq!(*hooks.resumed.lock(), vec![1, 2]);
        let snap = c.snapshot();
        assert!(snap.paused.is_empty());
        assert_eq!(snap.last_outcome, Some(RoutineOutcome::Recovered));
        c.shutdown();
    }

    #[test]
    fn unrecovered_routine_resumes_and_reports_failure() {
        let hooks = Arc::new(RecordingHooks::default());
        let (c, sampler) = controller(hooks.clone(), 500, Duration::from_secs(300));
        c.on_emergency(&[7, 8], 100);
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(*hooks.resumed.lock(), vec![7, 8]);
        let snap = c.snapshot();
        assert!(snap.paused.is_empty());
        assert_eq!(snap.phase, EmergencyPhase::Active);
        assert_eq!(snap.last_outcome, Some(RoutineOutcome::StillAboveThreshold));

        // The next tick still above the threshold runs the routine again.
        assert_eq!(c.on_emergency(&[7, 8], 100), EmergencyPhase::Active);
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(hooks.paused.lock().len(), 4);
        assert_eq!(hooks.resumed.lock().len(), 4);

        sampler.0.store(10, Ordering::SeqCst);
        c.on_below_emergency();
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(c.phase(), EmergencyPhase::Inactive);
        c.shutdown();
    }

    #[test]
    fn timeout_forces_resume_and_expires() {
        let hooks = Arc::new(RecordingHooks::default());
        let (c, _sampler) = controller(hooks.clone(), 500, Duration::ZERO);
        c.on_emergency(&[3], 100);
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(c.on_emergency(&[3], 100), EmergencyPhase::Expired);
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(*hooks.resumed.lock(), vec![3]);
        assert_eq!(c.snapshot().last_outcome, Some(RoutineOutcome::ForcedResume));
        // Expired episodes do not pause again.
        assert_eq!(c.on_emergency(&[3], 100), EmergencyPhase::Expired);
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(hooks.paused.lock().len(), 1);
        c.shutdown();
    }

    #[test]
    fn timeout_during_a_slow_pause_still_resumes_the_job() {
        let hooks = Arc::new(RecordingHooks {
            pause_delay: Duration::from_millis(300),
            ..RecordingHooks::default()
        });
        let (c, _sampler) = controller(hooks.clone(), 500, Duration::from_millis(100));
        c.on_emergency(&[1], 100);
        thread::sleep(Duration::from_millis(150));
        // The routine is still inside pause_task, nothing is recorded as paused.
        assert!(c.snapshot().paused.is_empty());
        assert_eq!(c.on_emergency(&[1], 100), EmergencyPhase::Expired);

        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(*hooks.paused.lock(), vec![1]);
        assert_eq!(*hooks.resumed.lock(), vec![1]);
        let snap = c.snapshot();
        assert!(snap.paused.is_empty());
        assert_eq!(snap.last_outcome, Some(RoutineOutcome::ForcedResume));

        for _ in 0..3 {
            assert_eq!(c.on_emergency(&[1], 100), EmergencyPhase::Expired);
        }
        assert!(c.wait_idle(Duration::from_secs(5)));
        assert_eq!(hooks.paused.lock().len(), 1);
        assert_eq!(hooks.resumed.lock().len(), 1);
        c.shutdown();
    }

    #[test]
    fn no_running_jobs_waits_for_timeout() {
        let hooks = Arc::new(RecordingHooks::default());
        let (c, _sampler) = controller(hooks.clone(), 500, Duration::from_secs(300));
        assert_eq!(c.on_emergency(&[], 100), EmergencyPhase::Active);
        assert_eq!(c.snapshot().last_outcome, Some(RoutineOutcome::NothingToPause));
        assert!(hooks.paused.lock().is_empty());
        c.shutdown();
    }

    #[test]
    fn shutdown_resumes_paused_jobs() {
        let hooks = Arc::new(RecordingHooks::default());
        let (c, _sampler) = controller(hooks.clone(), 500, Duration::from_secs(300));
        c.on_emergency(&[4, 5], 100);
        assert!(c.wait_idle(Duration::from_secs(5)));
        c.shutdown();
        assert_eq!(*hooks.resumed.lock(), vec![4, 5]);
    }
}
