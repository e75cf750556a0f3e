//! Job rows, cost tiers and tier accounting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;

/// Identifier of a job row in the shared store.
pub type JobId = i64;

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for admission.
    Queued,
    /// Claimed by a scheduler and handed to the execution callback.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error, or the start callback failed.
    Failed,
}

impl JobState {
    /// Column value used by the SQL backends.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(SchedulerError::Store(format!("unknown job state `{other}`"))),
        }
    }
}

/// Cost classification bucket. Each tier has its own concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    /// Regular documents.
    Default,
    /// Large documents that need more memory and time.
    Heavy,
}

impl CostTier {
    /// Column value used by the SQL backends.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Heavy => "heavy",
        }
    }
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostTier {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "heavy" => Ok(Self::Heavy),
            other => Err(SchedulerError::Store(format!("unknown cost tier `{other}`"))),
        }
    }
}

/// Cheap signals about the document behind a job, used for classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Document format hint (`pdf`, `docx`, ...).
    #[serde(default)]
    pub format: Option<String>,
    /// Page or slide count, when known.
    #[serde(default)]
    pub page_count: Option<u32>,
    /// Source document size in bytes.
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Tenant/owner metadata. Opaque to the scheduler, carried for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerMetadata {
    /// Tenant identifier.
    pub tenant: String,
    /// Optional user identifier.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A job row as stored in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Row identifier.
    pub id: JobId,
    /// Classification input.
    pub descriptor: ResourceDescriptor,
    /// Current lifecycle state.
    pub state: JobState,
    /// Cost tier, fixed once classified.
    pub tier: Option<CostTier>,
    /// Creation time in milliseconds since epoch; admission order.
    pub created_at_ms: i64,
    /// Time of the queued→running transition.
    pub started_at_ms: Option<i64>,
    /// Time the job reached `done` or `failed`.
    pub finished_at_ms: Option<i64>,
    /// Reason recorded when the job failed.
    pub failure_reason: Option<String>,
    /// Owner metadata.
    pub owner: OwnerMetadata,
}

/// Input for [`crate::core::JobStore::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Classification input.
    pub descriptor: ResourceDescriptor,
    /// Owner metadata.
    pub owner: OwnerMetadata,
    /// Explicit creation time; `None` uses the current clock.
    pub created_at_ms: Option<i64>,
    /// Pre-computed tier, if the producer already classified the job.
    pub tier: Option<CostTier>,
}

impl NewJob {
    /// Job for `tenant` with the given descriptor.
    #[must_use]
    pub fn new(tenant: impl Into<String>, descriptor: ResourceDescriptor) -> Self {
        Self {
            descriptor,
            owner: OwnerMetadata {
                tenant: tenant.into(),
                user_id: None,
            },
            created_at_ms: None,
            tier: None,
        }
    }

    /// Override the creation timestamp.
    #[must_use]
    pub const fn created_at(mut self, created_at_ms: i64) -> Self {
        self.created_at_ms = Some(created_at_ms);
        self
    }

    /// Set the tier up front.
    #[must_use]
    pub const fn with_tier(mut self, tier: CostTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Per-tier job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    /// Jobs in the default tier.
    pub default: usize,
    /// Jobs in the heavy tier.
    pub heavy: usize,
}

impl TierCounts {
    /// Count for a single tier.
    #[must_use]
    pub const fn get(&self, tier: CostTier) -> usize {
        match tier {
            CostTier::Default => self.default,
            CostTier::Heavy => self.heavy,
        }
    }

    /// Add one job of `tier`.
    pub fn increment(&mut self, tier: CostTier) {
        self.add(tier, 1);
    }

    /// Add `n` jobs of `tier`.
    pub fn add(&mut self, tier: CostTier, n: usize) {
        match tier {
            CostTier::Default => self.default += n,
            CostTier::Heavy => self.heavy += n,
        }
    }

    /// Sum over tiers.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.default + self.heavy
    }
}

/// Snapshot of queued and running counts, computed fresh from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// All queued jobs, classified or not.
    pub queued: usize,
    /// All running jobs.
    pub running: usize,
    /// Classified queued jobs per tier.
    pub queued_by_tier: TierCounts,
    /// Running jobs per tier.
    pub running_by_tier: TierCounts,
}

/// Which tiers a claim may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierFilter {
    /// Any classified job.
    Any,
    /// Only jobs of one tier.
    Only(CostTier),
}

impl TierFilter {
    /// Whether a job of `tier` passes the filter.
    #[must_use]
    pub fn accepts(self, tier: CostTier) -> bool {
        match self {
            Self::Any => true,
            Self::Only(only) => only == tier,
        }
    }

    /// SQL bind value: `None` matches any tier.
    #[must_use]
    pub const fn as_bind(self) -> Option<&'static str> {
        match self {
            Self::Any => None,
            Self::Only(tier) => Some(tier.as_str()),
        }
    }
}
