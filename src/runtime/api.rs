//! Status and health models surfaced to hosts and dashboards.

use serde::{Deserialize, Serialize};

use crate::config::AdmissionBudget;
use crate::core::degradation::EmergencySnapshot;
use crate::core::job::TierCounts;
use crate::core::policy::PressureLevel;
use crate::core::scheduler_loop::LoopState;

/// Point-in-time view of the admission system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Jobs waiting for admission.
    pub queued_count: usize,
    /// Jobs running anywhere in the fleet.
    pub running_count: usize,
    /// Classified queued jobs per tier.
    pub queued_by_tier: TierCounts,
    /// Running jobs per tier.
    pub running_by_tier: TierCounts,
    /// Fleet memory, `None` when telemetry failed.
    pub memory_bytes: Option<u64>,
    /// Pressure level for `memory_bytes`.
    pub pressure: PressureLevel,
    /// Budget in force.
    pub budget: AdmissionBudget,
    /// Whether the policy would admit at least one job right now.
    pub can_admit_more: bool,
    /// Whether this process holds scheduler leadership.
    pub is_leader: bool,
    /// Scheduler loop state.
    pub loop_state: LoopState,
    /// Degradation controller state.
    pub emergency: EmergencySnapshot,
}

/// Liveness summary for external supervision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// `false` once the loop has failed or lost leadership.
    pub ok: bool,
    /// Scheduler loop state.
    pub loop_state: LoopState,
    /// Tick failures since the last success.
    pub consecutive_failures: u32,
    /// Whether this process holds scheduler leadership.
    pub is_leader: bool,
    /// Why the service is unhealthy.
    pub reason: Option<String>,
}

impl Health {
    /// Derive health from loop state.
    #[must_use]
    pub fn from_loop(loop_state: LoopState, consecutive_failures: u32, is_leader: bool) -> Self {
        let reason = match loop_state {
            LoopState::Failed => Some(format!(
                "scheduler loop failed after {consecutive_failures} consecutive tick failures"
            )),
            LoopState::LeadershipLost => Some("scheduler leadership lost".to_string()),
            LoopState::Idle | LoopState::Running | LoopState::Stopped => None,
        };
        Self {
            ok: reason.is_none(),
            loop_state,
            consecutive_failures,
            is_leader,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_loop_is_unhealthy() {
        let health = Health::from_loop(LoopState::Failed, 10, true);
        assert!(!health.ok);
        assert!(health.reason.unwrap().contains("10"));
        assert!(Health::from_loop(LoopState::Running, 2, true).ok);
        assert!(!Health::from_loop(LoopState::LeadershipLost, 0, false).ok);
    }
}
