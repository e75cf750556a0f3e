//! The dedicated scheduler thread.
//!
//! Ticks run on an `admission-scheduler` OS thread. Async store calls are
//! driven on the host's tokio runtime when a handle is supplied, otherwise on
//! a private current-thread runtime. Between ticks the thread parks on a
//! `Condvar` so [`LoopControl::notify`] can wake it early.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::audit::{record, AuditAction, AuditEvent};
use crate::core::scheduler::{LeaderGuard, Scheduler, TickReport};
use crate::core::SchedulerError;

/// Lifecycle of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Not started.
    Idle,
    /// Ticking.
    Running,
    /// Stopped on request.
    Stopped,
    /// Exited because the leadership lock was lost.
    LeadershipLost,
    /// Exited after too many consecutive tick failures.
    Failed,
}

impl LoopState {
    /// Whether the loop has exited.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::LeadershipLost | Self::Failed)
    }
}

/// Shared state for Condvar-based wake notifications.
struct WakeState {
    notified: bool,
    shutdown: bool,
}

/// Handle shared between the scheduler thread and its owner.
pub struct LoopControl {
    wake: Mutex<WakeState>,
    condvar: Condvar,
    state: Mutex<LoopState>,
    consecutive_failures: Mutex<u32>,
    last_tick: Mutex<Option<TickReport>>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    /// A control block in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            wake: Mutex::new(WakeState {
                notified: false,
                shutdown: false,
            }),
            condvar: Condvar::new(),
            state: Mutex::new(LoopState::Idle),
            consecutive_failures: Mutex::new(0),
            last_tick: Mutex::new(None),
        }
    }

    /// Wake the loop for an immediate tick.
    pub fn notify(&self) {
        self.wake.lock().notified = true;
        self.condvar.notify_one();
    }

    /// Ask the loop to exit after the current tick.
    pub fn stop(&self) {
        self.wake.lock().shutdown = true;
        self.condvar.notify_all();
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    /// Tick failures since the last successful tick.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        *self.consecutive_failures.lock()
    }

    /// Report of the last successful tick.
    #[must_use]
    pub fn last_tick(&self) -> Option<TickReport> {
        self.last_tick.lock().clone()
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock() = state;
    }

    fn stop_requested(&self) -> bool {
        self.wake.lock().shutdown
    }

    /// Park until notified, stopped or `timeout` elapses. Returns `true` when
    /// a stop was requested.
    fn park(&self, timeout: Duration) -> bool {
        let mut wake = self.wake.lock();
        if !wake.notified && !wake.shutdown {
            let _ = self.condvar.wait_for(&mut wake, timeout);
        }
        wake.notified = false;
        wake.shutdown
    }
}

/// Capped exponential backoff: `base · 2^(failures−1)`, at most `max`.
#[must_use]
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

/// Spawn the `admission-scheduler` thread. The thread returns its final
/// [`LoopState`].
///
/// # Errors
///
/// Returns [`SchedulerError::Backend`] if the thread cannot be spawned.
pub fn spawn_scheduler_loop(
    scheduler: Arc<Scheduler>,
    leader: Arc<dyn LeaderGuard>,
    control: Arc<LoopControl>,
    runtime: Option<tokio::runtime::Handle>,
) -> Result<JoinHandle<LoopState>, SchedulerError> {
    control.set_state(LoopState::Running);
    thread::Builder::new()
        .name("admission-scheduler".into())
        .spawn(move || {
            let exit = run_loop(&scheduler, leader.as_ref(), &control, runtime);
            control.set_state(exit);
            info!(state = ?exit, "scheduler loop exited");
            exit
        })
        .map_err(|e| SchedulerError::Backend(format!("spawn scheduler thread: {e}")))
}

enum Driver {
    Host(tokio::runtime::Handle),
    Owned(tokio::runtime::Runtime),
}

impl Driver {
    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        match self {
            Self::Host(handle) => handle.block_on(fut),
            Self::Owned(rt) => rt.block_on(fut),
        }
    }
}

fn run_loop(
    scheduler: &Scheduler,
    leader: &dyn LeaderGuard,
    control: &LoopControl,
    runtime: Option<tokio::runtime::Handle>,
) -> LoopState {
    let driver = match runtime {
        Some(handle) => Driver::Host(handle),
        None => match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => Driver::Owned(rt),
            Err(e) => {
                error!(error = %e, "failed to create scheduler runtime");
                return LoopState::Failed;
            }
        },
    };

    let config = scheduler.loop_config().clone();
    let base = Duration::from_millis(config.backoff_base_ms);
    let max = Duration::from_millis(config.backoff_max_ms);
    debug!(tick_interval_ms = config.tick_interval_ms, "scheduler loop started");

    loop {
        if control.stop_requested() {
            return LoopState::Stopped;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| driver.block_on(scheduler.tick(leader))));
        let failure = match outcome {
            Ok(Ok(report)) if report.leadership_lost => {
                error!("scheduler lock lost, stopping admissions in this process");
                record(
                    scheduler.audit(),
                    AuditEvent::new(AuditAction::LeadershipLost, None),
                );
                return LoopState::LeadershipLost;
            }
            Ok(Ok(report)) => {
                *control.consecutive_failures.lock() = 0;
                *control.last_tick.lock() = Some(report);
                None
            }
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("tick panicked".to_string()),
        };

        let wait = match failure {
            None => config.tick_interval(),
            Some(reason) => {
                let failures = {
                    let mut failures = control.consecutive_failures.lock();
                    *failures += 1;
                    *failures
                };
                if failures >= config.max_consecutive_failures {
                    error!(failures, reason = %reason, "scheduler giving up after repeated tick failures");
                    return LoopState::Failed;
                }
                let delay = backoff_delay(base, max, failures);
                warn!(
                    failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason = %reason,
                    "scheduler tick failed, backing off"
                );
                delay
            }
        };

        if control.park(wait) {
            return LoopState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, max, 0), Duration::ZERO);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, max, 5), Duration::from_secs(32));
        assert_eq!(backoff_delay(base, max, 6), max);
        assert_eq!(backoff_delay(base, max, 40), max);
    }

    #[test]
    fn notify_wakes_a_parked_loop() {
        let control = Arc::new(LoopControl::new());
        let waker = Arc::clone(&control);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.notify();
        });
        let started = std::time::Instant::now();
        assert!(!control.park(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        t.join().unwrap();
    }

    #[test]
    fn stop_is_sticky() {
        let control = LoopControl::new();
        control.stop();
        assert!(control.park(Duration::from_secs(10)));
        assert!(control.stop_requested());
        assert!(LoopState::Stopped.is_terminal());
        assert!(!LoopState::Running.is_terminal());
    }
}
