//! Audit sink implementations.
//!
//! Every admission-relevant transition is recorded as an [`AuditEvent`]. The
//! in-memory sink keeps a bounded ring for tests and status pages; the tracing
//! sink forwards events to the log.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::job::{CostTier, JobId};
use crate::util::clock::now_ms;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A tier was assigned.
    Classified,
    /// A job was claimed and its start callback accepted it.
    Admitted,
    /// Admission was deferred for a new reason.
    Deferred,
    /// The start callback failed; the job was marked failed.
    StartFailed,
    /// A claim was undone because a concurrent claimant overshot a tier cap.
    ClaimReverted,
    /// Safe cleanup ran.
    Cleanup,
    /// An emergency episode began.
    EmergencyEntered,
    /// A running job was paused.
    Paused,
    /// A paused job was resumed.
    Resumed,
    /// An emergency episode hit its timeout.
    EmergencyExpired,
    /// This process lost the scheduler lock.
    LeadershipLost,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Classified => "classified",
            Self::Admitted => "admitted",
            Self::Deferred => "deferred",
            Self::StartFailed => "start_failed",
            Self::ClaimReverted => "claim_reverted",
            Self::Cleanup => "cleanup",
            Self::EmergencyEntered => "emergency_entered",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::EmergencyExpired => "emergency_expired",
            Self::LeadershipLost => "leadership_lost",
        };
        f.write_str(s)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related job, if any.
    pub job_id: Option<JobId>,
    /// Tier of the related job, if known.
    pub tier: Option<CostTier>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: i64,
    /// Additional context.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Build an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(action: AuditAction, job_id: Option<JobId>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            job_id,
            tier: None,
            action,
            created_at_ms: now_ms(),
            detail: None,
        }
    }

    /// Attach the job's tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: Option<CostTier>) -> Self {
        self.tier = tier;
        self
    }

    /// Attach free-form context.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);

    /// Most recent events, oldest first, if the sink retains them.
    fn recent(&self) -> Vec<AuditEvent> {
        Vec::new()
    }
}

/// Audit sink shared between the scheduler thread and the degradation thread.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing.
#[must_use]
pub fn shared_sink(sink: impl AuditSink + 'static) -> SharedAuditSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Record `event` if a sink is attached.
pub fn record(audit: Option<&SharedAuditSink>, event: AuditEvent) {
    if let Some(sink) = audit {
        sink.lock().record(event);
    }
}

/// In-memory audit sink with a bounded buffer.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events: max_events.max(1),
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn recent(&self) -> Vec<AuditEvent> {
        self.events()
    }
}

/// Sink that writes events to the `tracing` log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "prometheus_admission::audit",
            event_id = %event.event_id,
            job_id = ?event.job_id,
            tier = ?event.tier,
            action = %event.action,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest() {
        let mut sink = InMemoryAuditSink::new(2);
        sink.record(AuditEvent::new(AuditAction::Admitted, Some(1)));
        sink.record(AuditEvent::new(AuditAction::Admitted, Some(2)));
        sink.record(AuditEvent::new(AuditAction::StartFailed, Some(3)));
        let ids: Vec<_> = sink.recent().iter().map(|e| e.job_id).collect();
        assert_eq!(ids, vec![Some(2), Some(3)]);
    }

    #[test]
    fn builder_fields() {
        let event = AuditEvent::new(AuditAction::Paused, Some(7))
            .with_tier(Some(CostTier::Heavy))
            .with_detail("memory 9GiB");
        assert_eq!(event.tier, Some(CostTier::Heavy));
        assert_eq!(event.detail.as_deref(), Some("memory 9GiB"));
        assert_eq!(event.action.to_string(), "paused");
        assert!(!event.event_id.is_empty());
    }
}
