//! Admission policy: a pure function from telemetry, tier counts and budget
//! to a decision for the current tick.
//!
//! | Level     | Condition                        | Outcome                                   |
//! |-----------|----------------------------------|-------------------------------------------|
//! | Normal    | memory < max (or unknown)        | admit up to K, bounded by concurrency     |
//! | Critical  | max ≤ memory < emergency         | cleanup when (nearly) idle, else defer    |
//! | Emergency | memory ≥ emergency               | emergency routine, no admissions          |
//!
//! The concurrency limit always wins: with `running ≥ max_concurrent` nothing
//! is admitted regardless of memory headroom.

use serde::{Deserialize, Serialize};

use crate::config::{AdmissionBudget, MemoryThresholds};
use crate::core::job::{CostTier, TierCounts, TierFilter};

/// Memory pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    /// Below the max threshold, or memory unknown.
    Normal,
    /// Between max and emergency.
    Critical,
    /// At or above the emergency threshold.
    Emergency,
}

impl PressureLevel {
    /// Level for a memory sample. Unknown memory counts as no pressure.
    #[must_use]
    pub const fn from_memory(thresholds: &MemoryThresholds, memory_bytes: Option<u64>) -> Self {
        match memory_bytes {
            Some(m) if m >= thresholds.emergency_bytes => Self::Emergency,
            Some(m) if m >= thresholds.max_bytes => Self::Critical,
            _ => Self::Normal,
        }
    }
}

/// Where the current emergency episode stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyPhase {
    /// No episode.
    Inactive,
    /// Episode in progress, within its timeout.
    Active,
    /// Episode outlived its timeout; jobs were force-resumed.
    Expired,
}

/// Everything the policy looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionInput {
    /// Running jobs per tier, fleet-wide.
    pub running: TierCounts,
    /// Fleet memory, `None` when telemetry failed.
    pub memory_bytes: Option<u64>,
    /// Emergency episode state.
    pub emergency: EmergencyPhase,
    /// Whether safe cleanup already ran this tick.
    pub cleanup_attempted: bool,
}

/// Why nothing is admitted this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// `running ≥ max_concurrent`.
    ConcurrencyLimit,
    /// Memory above the max threshold and jobs are in flight.
    MemoryPressure,
    /// Every tier is at its cap.
    TierBudgetsExhausted,
}

/// Policy outcome for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// Try to admit up to `slots` jobs.
    Admit {
        /// Admission attempts allowed this tick.
        slots: usize,
    },
    /// Admit nothing.
    Defer(DeferReason),
    /// Run safe cleanup, re-sample memory and evaluate again.
    SafeCleanup,
    /// Hand over to the degradation controller's emergency routine.
    Emergency,
}

impl AdmissionDecision {
    /// Number of admission attempts this decision allows.
    #[must_use]
    pub const fn slots(&self) -> usize {
        match self {
            Self::Admit { slots } => *slots,
            _ => 0,
        }
    }
}

/// Evaluate the admission policy.
#[must_use]
pub fn evaluate(budget: &AdmissionBudget, input: &AdmissionInput) -> AdmissionDecision {
    let running = input.running.total();
    let level = PressureLevel::from_memory(&budget.memory, input.memory_bytes);

    if level == PressureLevel::Emergency && input.emergency != EmergencyPhase::Expired {
        return AdmissionDecision::Emergency;
    }
    if running >= budget.max_concurrent {
        return AdmissionDecision::Defer(DeferReason::ConcurrencyLimit);
    }

    match level {
        PressureLevel::Normal => admit_up_to(budget, &input.running, budget.admissions_per_tick),
        PressureLevel::Critical | PressureLevel::Emergency => {
            if !input.cleanup_attempted && running <= 1 {
                return AdmissionDecision::SafeCleanup;
            }
            if input.cleanup_attempted && running == 0 {
                // An idle baseline above the threshold must not block admissions forever.
                return admit_up_to(budget, &input.running, 1);
            }
            AdmissionDecision::Defer(DeferReason::MemoryPressure)
        }
    }
}

fn admit_up_to(budget: &AdmissionBudget, running: &TierCounts, cap: usize) -> AdmissionDecision {
    if tier_filter(budget, running).is_none() {
        return AdmissionDecision::Defer(DeferReason::TierBudgetsExhausted);
    }
    let headroom = budget.max_concurrent.saturating_sub(running.total());
    AdmissionDecision::Admit {
        slots: cap.min(headroom),
    }
}

/// Tiers that still have headroom given the running counts.
///
/// Heavy jobs are bounded by the heavy cap and also occupy the default
/// budget, so a running heavy job shrinks what default jobs may use.
#[must_use]
pub fn tier_filter(budget: &AdmissionBudget, running: &TierCounts) -> Option<TierFilter> {
    let total = running.total();
    if total >= budget.max_concurrent {
        return None;
    }
    let heavy_ok = running.heavy < budget.tier_caps.heavy;
    let default_ok = total < budget.tier_caps.default;
    match (default_ok, heavy_ok) {
        (true, true) => Some(TierFilter::Any),
        (true, false) => Some(TierFilter::Only(CostTier::Default)),
        (false, true) => Some(TierFilter::Only(CostTier::Heavy)),
        (false, false) => None,
    }
}

/// Whether running counts that already include a freshly claimed job of
/// `tier` stay within that tier's budget.
#[must_use]
pub fn within_caps(budget: &AdmissionBudget, tier: CostTier, running: &TierCounts) -> bool {
    let total = running.total();
    if total > budget.max_concurrent {
        return false;
    }
    match tier {
        CostTier::Heavy => running.heavy <= budget.tier_caps.heavy,
        CostTier::Default => total <= budget.tier_caps.default,
    }
}
