//! Cost-tier classification.
//!
//! Classification sits on the admission critical path, so it must only look at
//! cheap signals and must never block a job: any failure degrades to
//! [`CostTier::Default`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::core::job::{CostTier, ResourceDescriptor};

/// Reasons a classifier could not decide.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The descriptor carries no usable signal.
    #[error("descriptor has no page count or size")]
    NoSignal,
    /// Inspection of the document failed.
    #[error("inspection failed: {0}")]
    Inspection(String),
}

/// Assigns a cost tier from a resource descriptor.
pub trait JobClassifier: Send + Sync + 'static {
    /// Classify one job.
    fn classify(&self, descriptor: &ResourceDescriptor) -> Result<CostTier, ClassifyError>;
}

/// Tier from page count, falling back to byte size.
#[derive(Debug, Clone, Copy)]
pub struct PageCountClassifier {
    config: ClassifierConfig,
}

impl PageCountClassifier {
    /// Create a classifier with the given thresholds.
    #[must_use]
    pub const fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }
}

impl Default for PageCountClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl JobClassifier for PageCountClassifier {
    fn classify(&self, descriptor: &ResourceDescriptor) -> Result<CostTier, ClassifyError> {
        if let Some(pages) = descriptor.page_count {
            return Ok(if pages >= self.config.heavy_page_threshold {
                CostTier::Heavy
            } else {
                CostTier::Default
            });
        }
        match descriptor.size_bytes {
            Some(size) if size >= self.config.heavy_size_bytes => Ok(CostTier::Heavy),
            Some(_) => Ok(CostTier::Default),
            None => Err(ClassifyError::NoSignal),
        }
    }
}

/// Run `classifier`, degrading errors and panics to [`CostTier::Default`].
///
/// Calls slower than `budget` are logged; the result is still used.
pub fn classify_or_default(
    classifier: &dyn JobClassifier,
    descriptor: &ResourceDescriptor,
    budget: Duration,
) -> CostTier {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| classifier.classify(descriptor)));
    let elapsed = started.elapsed();
    if elapsed > budget {
        tracing::warn!(
            elapsed_ms = elapsed.as_millis(),
            budget_ms = budget.as_millis(),
            "classification exceeded its time budget"
        );
    }
    match outcome {
        Ok(Ok(tier)) => tier,
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "classification failed, using default tier");
            CostTier::Default
        }
        Err(_) => {
            tracing::warn!("classifier panicked, using default tier");
            CostTier::Default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(pages: Option<u32>, size: Option<u64>) -> ResourceDescriptor {
        ResourceDescriptor {
            format: Some("pdf".into()),
            page_count: pages,
            size_bytes: size,
        }
    }

    #[test]
    fn page_count_decides_first() {
        let c = PageCountClassifier::new(ClassifierConfig {
            heavy_page_threshold: 50,
            heavy_size_bytes: 10,
        });
        assert_eq!(c.classify(&descriptor(Some(49), Some(1_000))).unwrap(), CostTier::Default);
        assert_eq!(c.classify(&descriptor(Some(50), None)).unwrap(), CostTier::Heavy);
    }

    #[test]
    fn size_is_the_fallback_signal() {
        let c = PageCountClassifier::new(ClassifierConfig {
            heavy_page_threshold: 50,
            heavy_size_bytes: 1_000,
        });
        assert_eq!(c.classify(&descriptor(None, Some(999))).unwrap(), CostTier::Default);
        assert_eq!(c.classify(&descriptor(None, Some(1_000))).unwrap(), CostTier::Heavy);
        assert!(c.classify(&descriptor(None, None)).is_err());
    }

    struct Exploding;

    impl JobClassifier for Exploding {
        fn classify(&self, _: &ResourceDescriptor) -> Result<CostTier, ClassifyError> {
            panic!("corrupt document");
        }
    }

    struct Broken;

    impl JobClassifier for Broken {
        fn classify(&self, _: &ResourceDescriptor) -> Result<CostTier, ClassifyError> {
            Err(ClassifyError::Inspection("truncated xref table".into()))
        }
    }

    #[test]
    fn failures_degrade_to_default() {
        let budget = Duration::from_millis(20);
        let d = descriptor(Some(500), None);
        assert_eq!(classify_or_default(&Broken, &d, budget), CostTier::Default);
        assert_eq!(classify_or_default(&Exploding, &d, budget), CostTier::Default);
        assert_eq!(
            classify_or_default(&PageCountClassifier::default(), &d, budget),
            CostTier::Heavy
        );
    }
}
