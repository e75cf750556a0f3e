//! Admission budget and scheduler configuration structures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

/// Memory thresholds in bytes, `max_bytes < critical_bytes < emergency_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    /// Above this, no regular admissions happen.
    pub max_bytes: u64,
    /// Above this, safe cleanup may run even with one active job.
    pub critical_bytes: u64,
    /// Above this, the emergency pause/resume routine runs.
    pub emergency_bytes: u64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            max_bytes: 6 * GIB,
            critical_bytes: 7 * GIB,
            emergency_bytes: 8 * GIB,
        }
    }
}

/// Per-tier concurrency caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCaps {
    /// Budget shared by default jobs and heavy jobs together.
    pub default: usize,
    /// Maximum concurrently running heavy jobs.
    pub heavy: usize,
}

impl Default for TierCaps {
    fn default() -> Self {
        Self {
            default: default_max_concurrent(),
            heavy: 1,
        }
    }
}

/// Admission budget: concurrency, tier caps, memory thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionBudget {
    /// Maximum running jobs across the whole fleet.
    pub max_concurrent: usize,
    /// Per-tier caps.
    pub tier_caps: TierCaps,
    /// Memory thresholds.
    pub memory: MemoryThresholds,
    /// Emergency episodes longer than this force-resume paused jobs.
    pub emergency_timeout_secs: u64,
    /// Maximum admissions per tick (K).
    pub admissions_per_tick: usize,
    /// Pause between two admissions in the same tick.
    pub admission_delay_ms: u64,
}

impl Default for AdmissionBudget {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tier_caps: TierCaps::default(),
            memory: MemoryThresholds::default(),
            emergency_timeout_secs: 300,
            admissions_per_tick: 5,
            admission_delay_ms: 100,
        }
    }
}

impl AdmissionBudget {
    /// Emergency timeout as a duration.
    #[must_use]
    pub const fn emergency_timeout(&self) -> Duration {
        Duration::from_secs(self.emergency_timeout_secs)
    }

    /// Inter-admission delay as a duration.
    #[must_use]
    pub const fn admission_delay(&self) -> Duration {
        Duration::from_millis(self.admission_delay_ms)
    }

    /// Validate budget values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".into());
        }
        if self.admissions_per_tick == 0 {
            return Err("admissions_per_tick must be greater than 0".into());
        }
        if self.tier_caps.default == 0 {
            return Err("tier_caps.default must be greater than 0".into());
        }
        if self.emergency_timeout_secs == 0 {
            return Err("emergency_timeout_secs must be greater than 0".into());
        }
        let m = &self.memory;
        if !(m.max_bytes < m.critical_bytes && m.critical_bytes < m.emergency_bytes) {
            return Err(format!(
                "memory thresholds must satisfy max < critical < emergency (got {} / {} / {})",
                m.max_bytes, m.critical_bytes, m.emergency_bytes
            ));
        }
        Ok(())
    }
}

/// Scheduler loop cadence and failure handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Sleep between ticks.
    pub tick_interval_ms: u64,
    /// First backoff delay after a failed tick.
    pub backoff_base_ms: u64,
    /// Backoff ceiling.
    pub backoff_max_ms: u64,
    /// Consecutive failed ticks before the loop gives up.
    pub max_consecutive_failures: u32,
    /// Consecutive empty claims that end a tick's admission pass.
    pub max_empty_claims: usize,
    /// Unclassified jobs classified per tick.
    pub classification_batch: usize,
    /// Expected upper bound for one classification call.
    pub classification_budget_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_000,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
            max_consecutive_failures: 10,
            max_empty_claims: 3,
            classification_batch: 50,
            classification_budget_ms: 20,
        }
    }
}

impl LoopConfig {
    /// Tick interval as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate loop values.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err("backoff must satisfy 0 < backoff_base_ms <= backoff_max_ms".into());
        }
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be greater than 0".into());
        }
        if self.max_empty_claims == 0 {
            return Err("max_empty_claims must be greater than 0".into());
        }
        // Unclassified jobs are never claimable, so a zero batch starves the queue.
        if self.classification_batch == 0 {
            return Err("classification_batch must be greater than 0".into());
        }
        if self.classification_budget_ms == 0 {
            return Err("classification_budget_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Which running jobs the emergency routine pauses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseSelection {
    /// Pause every running job.
    All,
    /// Pause a random fraction (0, 1] of running jobs, at least one.
    RandomFraction(f64),
}

/// Degradation controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Subset of running jobs paused during an emergency.
    pub pause_selection: PauseSelection,
    /// Ask the allocator to return free heap pages during cleanup.
    pub trim_allocator: bool,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            pause_selection: PauseSelection::All,
            trim_allocator: true,
        }
    }
}

impl DegradationConfig {
    /// Validate degradation values.
    pub fn validate(&self) -> Result<(), String> {
        if let PauseSelection::RandomFraction(f) = self.pause_selection {
            if !(f > 0.0 && f <= 1.0) {
                return Err(format!("pause fraction must be in (0, 1], got {f}"));
            }
        }
        Ok(())
    }
}

/// Thresholds for the page-count classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Documents with at least this many pages are heavy.
    pub heavy_page_threshold: u32,
    /// Without a page count, documents at least this large are heavy.
    pub heavy_size_bytes: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            heavy_page_threshold: 100,
            heavy_size_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Which processes count towards fleet memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessGroup {
    /// Only this process.
    CurrentProcess,
    /// The parent of this process and all its descendants.
    ParentTree,
    /// An explicit root pid and all its descendants.
    Tree {
        /// Root of the worker process group.
        root_pid: u32,
    },
}

/// Memory telemetry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Process group to sum.
    pub process_group: ProcessGroup,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            process_group: ProcessGroup::ParentTree,
        }
    }
}

/// Leadership lock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Well-known lock file shared by all worker processes.
    pub path: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("prometheus-admission.lock"),
        }
    }
}

/// Job store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// Process-local store for development/testing.
    InMemory,
    /// SQLite database file shared by local processes.
    Sqlite {
        /// Connection URL, e.g. `sqlite:///var/lib/app/jobs.db`.
        url: String,
        /// Pool size.
        max_connections: u32,
    },
    /// Postgres database.
    Postgres {
        /// Connection URL.
        url: String,
        /// Pool size.
        max_connections: u32,
    },
}

impl StoreBackendConfig {
    /// Validate backend values.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::InMemory => Ok(()),
            Self::Sqlite {
                url,
                max_connections,
            }
            | Self::Postgres {
                url,
                max_connections,
            } => {
                if url.trim().is_empty() {
                    return Err("store url must not be empty".into());
                }
                if *max_connections == 0 {
                    return Err("max_connections must be greater than 0".into());
                }
                Ok(())
            }
        }
    }
}

/// Root configuration for an admission service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Admission budget.
    #[serde(default)]
    pub budget: AdmissionBudget,
    /// Loop cadence.
    #[serde(default)]
    pub scheduler: LoopConfig,
    /// Degradation settings.
    #[serde(default)]
    pub degradation: DegradationConfig,
    /// Classifier thresholds.
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Memory telemetry.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Leadership lock.
    #[serde(default)]
    pub lock: LockConfig,
    /// Job store backend.
    pub store: StoreBackendConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            budget: AdmissionBudget::default(),
            scheduler: LoopConfig::default(),
            degradation: DegradationConfig::default(),
            classifier: ClassifierConfig::default(),
            telemetry: TelemetryConfig::default(),
            lock: LockConfig::default(),
            store: StoreBackendConfig::InMemory,
        }
    }
}

impl AdmissionConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.budget.validate().map_err(|e| format!("budget invalid: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.degradation
            .validate()
            .map_err(|e| format!("degradation invalid: {e}"))?;
        self.store.validate().map_err(|e| format!("store invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment.
    ///
    /// Reads `.env` if present, then the JSON file named by
    /// `ADMISSION_CONFIG` (defaults otherwise), then applies
    /// `ADMISSION_MAX_CONCURRENT`, `ADMISSION_HEAVY_CAP`,
    /// `ADMISSION_DATABASE_URL` and `ADMISSION_LOCK_PATH`.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var("ADMISSION_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read {path}: {e}"))?;
                serde_json::from_str(&raw).map_err(|e| format!("parse error in {path}: {e}"))?
            }
            Err(_) => Self::default(),
        };
        if let Some(n) = env_parse::<usize>("ADMISSION_MAX_CONCURRENT")? {
            cfg.budget.max_concurrent = n;
            cfg.budget.tier_caps.default = cfg.budget.tier_caps.default.min(n).max(1);
        }
        if let Some(n) = env_parse::<usize>("ADMISSION_HEAVY_CAP")? {
            cfg.budget.tier_caps.heavy = n;
        }
        if let Ok(url) = std::env::var("ADMISSION_DATABASE_URL") {
            cfg.store = backend_for_url(url);
        }
        if let Ok(path) = std::env::var("ADMISSION_LOCK_PATH") {
            cfg.lock.path = PathBuf::from(path);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{key} is not a valid number: `{raw}`")),
        Err(_) => Ok(None),
    }
}

fn backend_for_url(url: String) -> StoreBackendConfig {
    if url.starts_with("sqlite:") {
        StoreBackendConfig::Sqlite {
            url,
            max_connections: 4,
        }
    } else {
        StoreBackendConfig::Postgres {
            url,
            max_connections: 5,
        }
    }
}

fn default_max_concurrent() -> usize {
    num_cpus::get().max(1)
}
