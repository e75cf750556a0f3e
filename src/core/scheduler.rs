//! One scheduling tick: classify, measure, decide, claim, start.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{AdmissionBudget, LoopConfig};
use crate::core::audit::{record, AuditAction, AuditEvent, SharedAuditSink};
use crate::core::classifier::{classify_or_default, JobClassifier};
use crate::core::degradation::{CleanupReport, DegradationController};
use crate::core::hooks::ExecutionHooks;
use crate::core::job::{CostTier, Job, JobId};
use crate::core::policy::{
    evaluate, tier_filter, within_caps, AdmissionDecision, AdmissionInput, DeferReason,
    EmergencyPhase, PressureLevel,
};
use crate::core::resources::ResourceTelemetry;
use crate::core::store::JobStore;
use crate::core::SchedulerError;

/// Answers whether this process may still schedule.
pub trait LeaderGuard: Send + Sync {
    /// `true` while this process holds leadership.
    fn is_leader(&self) -> bool;
}

/// Guard for hosts that run a single scheduler and skip the file lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysLeader;

impl LeaderGuard for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}

/// What one tick observed and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Pressure level from the final memory sample.
    pub pressure: PressureLevel,
    /// Final memory sample.
    pub memory_bytes: Option<u64>,
    /// Policy decision, absent when the tick ended before evaluation.
    pub decision: Option<AdmissionDecision>,
    /// Jobs that received a tier this tick.
    pub classified: usize,
    /// Jobs started.
    pub admitted: Vec<JobId>,
    /// Jobs marked failed because their start callback failed.
    pub failed: Vec<JobId>,
    /// Claims undone because a tier cap was overshot.
    pub reverted: Vec<JobId>,
    /// Claims that found nothing.
    pub empty_claims: usize,
    /// Safe cleanup that ran inline, if any.
    pub cleanup: Option<CleanupReport>,
    /// The admission phase stopped on a store error.
    pub aborted: bool,
    /// Leadership was gone at the start of or during the tick.
    pub leadership_lost: bool,
}

impl TickReport {
    const fn empty() -> Self {
        Self {
            pressure: PressureLevel::Normal,
            memory_bytes: None,
            decision: None,
            classified: 0,
            admitted: Vec::new(),
            failed: Vec::new(),
            reverted: Vec::new(),
            empty_claims: 0,
            cleanup: None,
            aborted: false,
            leadership_lost: false,
        }
    }
}

/// Admission scheduler. Holds no job state of its own; every tick reads the
/// store fresh.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    telemetry: ResourceTelemetry,
    classifier: Arc<dyn JobClassifier>,
    hooks: Arc<dyn ExecutionHooks>,
    degradation: Arc<DegradationController>,
    budget: AdmissionBudget,
    loop_config: LoopConfig,
    audit: Option<SharedAuditSink>,
    last_defer: Mutex<Option<DeferReason>>,
}

impl Scheduler {
    /// Assemble a scheduler from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        telemetry: ResourceTelemetry,
        classifier: Arc<dyn JobClassifier>,
        hooks: Arc<dyn ExecutionHooks>,
        degradation: Arc<DegradationController>,
        budget: AdmissionBudget,
        loop_config: LoopConfig,
    ) -> Self {
        Self {
            store,
            telemetry,
            classifier,
            hooks,
            degradation,
            budget,
            loop_config,
            audit: None,
            last_defer: Mutex::new(None),
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Option<SharedAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// The admission budget.
    #[must_use]
    pub const fn budget(&self) -> &AdmissionBudget {
        &self.budget
    }

    /// Loop cadence settings.
    #[must_use]
    pub const fn loop_config(&self) -> &LoopConfig {
        &self.loop_config
    }

    /// Shared job store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Telemetry used for decisions.
    #[must_use]
    pub const fn telemetry(&self) -> &ResourceTelemetry {
        &self.telemetry
    }

    /// Attached audit sink.
    #[must_use]
    pub const fn audit(&self) -> Option<&SharedAuditSink> {
        self.audit.as_ref()
    }

    /// The degradation controller.
    #[must_use]
    pub fn degradation(&self) -> &Arc<DegradationController> {
        &self.degradation
    }

    /// Run one scheduling tick.
    ///
    /// Claim failures abort only the admission phase and are reported in the
    /// returned [`TickReport`]; the next tick retries.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read for classification or
    /// counts. The loop treats that as a tick failure and backs off.
    pub async fn tick(&self, leader: &dyn LeaderGuard) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::empty();
        if !leader.is_leader() {
            report.leadership_lost = true;
            return Ok(report);
        }

        report.classified = self.classify_pending().await?;

        let counts = self.telemetry.counts().await?;
        let mut memory = self.telemetry.memory_bytes();
        let level = PressureLevel::from_memory(&self.budget.memory, memory);

        let emergency = if level == PressureLevel::Emergency {
            let running: Vec<JobId> = self
                .store
                .running_jobs()
                .await?
                .into_iter()
                .map(|job| job.id)
                .collect();
            self.degradation
                .on_emergency(&running, self.budget.memory.emergency_bytes)
        } else {
            self.degradation.on_below_emergency();
            EmergencyPhase::Inactive
        };

        let mut input = AdmissionInput {
            running: counts.running_by_tier,
            memory_bytes: memory,
            emergency,
            cleanup_attempted: false,
        };
        let mut decision = evaluate(&self.budget, &input);
        if decision == AdmissionDecision::SafeCleanup {
            match self.degradation.safe_cleanup().run(counts.running) {
                Ok(cleanup) => {
                    record(
                        self.audit.as_ref(),
                        AuditEvent::new(AuditAction::Cleanup, None).with_detail(format!(
                            "running={} memory_bytes={memory:?}",
                            counts.running
                        )),
                    );
                    report.cleanup = Some(cleanup);
                }
                Err(err) => warn!(error = %err, "safe cleanup skipped"),
            }
            memory = self.telemetry.memory_bytes();
            input.memory_bytes = memory;
            input.cleanup_attempted = true;
            decision = evaluate(&self.budget, &input);
        }

        report.memory_bytes = memory;
        report.pressure = PressureLevel::from_memory(&self.budget.memory, memory);
        report.decision = Some(decision);
        debug!(
            running = counts.running,
            queued = counts.queued,
            memory_bytes = ?memory,
            pressure = ?report.pressure,
            ?decision,
            "admission decision"
        );
        self.note_defer(decision, counts.running, memory);

        let slots = decision.slots();
        if slots > 0 {
            self.admit(slots, leader, &mut report).await;
        }
        Ok(report)
    }

    async fn classify_pending(&self) -> Result<usize, SchedulerError> {
        let pending = self
            .store
            .unclassified(self.loop_config.classification_batch)
            .await?;
        let budget = Duration::from_millis(self.loop_config.classification_budget_ms);
        let mut classified = 0;
        for job in pending {
            let tier = classify_or_default(self.classifier.as_ref(), &job.descriptor, budget);
            if self.store.set_tier(job.id, tier).await? {
                classified += 1;
                debug!(job_id = job.id, %tier, "job classified");
                record(
                    self.audit.as_ref(),
                    AuditEvent::new(AuditAction::Classified, Some(job.id)).with_tier(Some(tier)),
                );
            }
        }
        Ok(classified)
    }

    async fn admit(&self, slots: usize, leader: &dyn LeaderGuard, report: &mut TickReport) {
        let delay = self.budget.admission_delay();
        let mut consecutive_empty = 0;
        for slot in 0..slots {
            if slot > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !leader.is_leader() {
                report.leadership_lost = true;
                break;
            }
            let counts = match self.store.counts().await {
                Ok(counts) => counts,
                Err(err) => {
                    error!(error = %err, "reading running counts failed, aborting admissions");
                    report.aborted = true;
                    break;
                }
            };
            let Some(filter) = tier_filter(&self.budget, &counts.running_by_tier) else {
                debug!(running = counts.running, "no tier has headroom");
                break;
            };

            let job = match self.store.claim_next(filter).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    report.empty_claims += 1;
                    consecutive_empty += 1;
                    if consecutive_empty >= self.loop_config.max_empty_claims {
                        debug!(consecutive_empty, "queue drained for admissible tiers");
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "claim failed, aborting admissions for this tick");
                    report.aborted = true;
                    break;
                }
            };
            consecutive_empty = 0;

            match self.verify_caps(&job).await {
                Ok(true) => {}
                Ok(false) => {
                    self.revert(&job, report).await;
                    continue;
                }
                Err(err) => {
                    error!(job_id = job.id, error = %err, "could not verify tier caps after claim");
                    self.revert(&job, report).await;
                    report.aborted = true;
                    break;
                }
            }

            self.start(&job, report).await;
        }
    }

    async fn verify_caps(&self, job: &Job) -> Result<bool, SchedulerError> {
        let tier = job.tier.unwrap_or(CostTier::Default);
        let after = self.store.counts().await?;
        Ok(within_caps(&self.budget, tier, &after.running_by_tier))
    }

    async fn revert(&self, job: &Job, report: &mut TickReport) {
        match self.store.revert_claim(job.id).await {
            Ok(_) => {
                warn!(job_id = job.id, tier = ?job.tier, "tier cap overshot by a concurrent claim, job requeued");
                report.reverted.push(job.id);
                record(
                    self.audit.as_ref(),
                    AuditEvent::new(AuditAction::ClaimReverted, Some(job.id)).with_tier(job.tier),
                );
            }
            Err(err) => error!(job_id = job.id, error = %err, "reverting claim failed"),
        }
    }

    async fn start(&self, job: &Job, report: &mut TickReport) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.hooks.start_execution(job)));
        let failure = match outcome {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some("start callback declined the job".to_string()),
            Ok(Err(err)) => Some(format!("start callback failed: {err:#}")),
            Err(_) => Some("start callback panicked".to_string()),
        };

        let Some(reason) = failure else {
            info!(job_id = job.id, tier = ?job.tier, "job admitted");
            report.admitted.push(job.id);
            record(
                self.audit.as_ref(),
                AuditEvent::new(AuditAction::Admitted, Some(job.id)).with_tier(job.tier),
            );
            return;
        };

        warn!(job_id = job.id, reason = %reason, "job failed to start");
        if let Err(err) = self.store.mark_failed(job.id, &reason).await {
            error!(job_id = job.id, error = %err, "marking job failed did not persist");
        }
        report.failed.push(job.id);
        record(
            self.audit.as_ref(),
            AuditEvent::new(AuditAction::StartFailed, Some(job.id))
                .with_tier(job.tier)
                .with_detail(reason),
        );
    }

    fn note_defer(&self, decision: AdmissionDecision, running: usize, memory: Option<u64>) {
        let reason = match decision {
            AdmissionDecision::Defer(reason) => Some(reason),
            _ => None,
        };
        let mut last = self.last_defer.lock();
        if *last == reason {
            return;
        }
        *last = reason;
        if let Some(reason) = reason {
            info!(?reason, running, memory_bytes = ?memory, "admissions deferred");
            record(
                self.audit.as_ref(),
                AuditEvent::new(AuditAction::Deferred, None).with_detail(format!("{reason:?}")),
            );
        }
    }
}
