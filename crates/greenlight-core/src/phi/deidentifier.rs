//! De-identification engine: optional external detector with a regex
//! fallback that never fails the caller.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::patterns::PatternRegistry;
use super::validation::{validate, ValidationReport};
use crate::config::DeidConfig;
use crate::error::Result;
use crate::worker::WorkerPool;

/// Returned in place of the note when the pattern fallback itself fails.
pub const FAILURE_SENTINEL: &str = "[DE-IDENTIFICATION FAILED]";

/// An external PHI detector, consulted before the pattern fallback.
///
/// Any error (or panic) from `apply` sends the note through the regex rules
/// instead.
pub trait PhiDetector: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn apply(&self, text: &str) -> Result<String>;
}

/// Which path produced a de-identified text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMethod {
    /// Empty or whitespace-only input, returned as-is.
    Unchanged,
    Detector,
    Patterns,
    /// The fallback failed; the text is [`FAILURE_SENTINEL`].
    Failed,
}

/// De-identified text and the path that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deidentified {
    pub text: String,
    pub method: RedactionMethod,
    /// Pattern matches rewritten. Always 0 for the detector path.
    pub replacements: usize,
}

impl Deidentified {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            method: RedactionMethod::Unchanged,
            replacements: 0,
        }
    }

    fn failed() -> Self {
        Self {
            text: FAILURE_SENTINEL.to_string(),
            method: RedactionMethod::Failed,
            replacements: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.method == RedactionMethod::Failed
    }
}

/// Output of [`Deidentifier::process`]: the text plus its validation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeidentificationResult {
    pub text: String,
    pub method: RedactionMethod,
    pub report: ValidationReport,
}

/// Removes PHI from clinical notes.
///
/// Built once from [`DeidConfig`] and shared behind an `Arc`; the registry is
/// immutable so concurrent calls need no locking.
pub struct Deidentifier {
    registry: Arc<PatternRegistry>,
    detector: Option<Arc<dyn PhiDetector>>,
    config: DeidConfig,
}

impl Deidentifier {
    /// Compile the pattern registry. Fails only on an invalid configured rule.
    pub fn new(config: DeidConfig) -> Result<Self> {
        let registry = PatternRegistry::from_config(&config)?;
        Ok(Self {
            registry: Arc::new(registry),
            detector: None,
            config,
        })
    }

    /// Route notes through `detector` first.
    pub fn with_detector(mut self, detector: Arc<dyn PhiDetector>) -> Self {
        debug!(detector = detector.name(), "PHI detector attached");
        self.detector = Some(detector);
        self
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DeidConfig {
        &self.config
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    /// De-identify `text` on the calling thread.
    pub fn deidentify(&self, text: &str) -> Deidentified {
        if text.trim().is_empty() {
            return Deidentified::unchanged(text);
        }

        if let Some(detector) = &self.detector {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.apply(text)));
            match outcome {
                Ok(Ok(clean)) => {
                    return Deidentified {
                        text: clean,
                        method: RedactionMethod::Detector,
                        replacements: 0,
                    };
                }
                Ok(Err(e)) => {
                    warn!(detector = detector.name(), error = %e, "PHI detector failed, using pattern fallback");
                }
                Err(_) => {
                    warn!(detector = detector.name(), "PHI detector panicked, using pattern fallback");
                }
            }
        }

        self.deidentify_with_patterns(text)
    }

    /// Apply the pattern registry directly, skipping any detector.
    pub fn deidentify_with_patterns(&self, text: &str) -> Deidentified {
        if text.trim().is_empty() {
            return Deidentified::unchanged(text);
        }

        if text.len() > self.config.max_input_bytes {
            error!(
                bytes = text.len(),
                limit = self.config.max_input_bytes,
                "Note exceeds de-identification size limit"
            );
            return Deidentified::failed();
        }

        let style = self.config.replacement_style;
        match panic::catch_unwind(AssertUnwindSafe(|| self.registry.apply(text, style))) {
            Ok((clean, replacements)) => {
                debug!(
                    patterns = self.registry.len(),
                    replacements, "Applied PHI patterns"
                );
                Deidentified {
                    text: clean,
                    method: RedactionMethod::Patterns,
                    replacements,
                }
            }
            Err(_) => {
                error!("Pattern de-identification panicked");
                Deidentified::failed()
            }
        }
    }

    /// Re-scan `output` for residual PHI.
    pub fn validate(&self, original: &str, output: &str) -> ValidationReport {
        validate(&self.registry, original, output)
    }

    /// De-identify and validate, logging any issues.
    pub fn process(&self, text: &str) -> DeidentificationResult {
        let deidentified = self.deidentify(text);
        let report = self.validate(text, &deidentified.text);
        self.finish(deidentified, report)
    }

    /// Like [`deidentify`](Self::deidentify), but runs on the worker pool.
    ///
    /// The detector call is bounded by `detector_timeout_ms`. A timed-out
    /// detector job keeps its worker until it returns.
    pub async fn deidentify_async(self: &Arc<Self>, pool: &WorkerPool, text: String) -> Deidentified {
        if text.trim().is_empty() {
            return Deidentified::unchanged(&text);
        }

        if let Some(detector) = self.detector.clone() {
            let name = detector.name().to_string();
            let input = text.clone();
            let limit = Duration::from_millis(self.config.detector_timeout_ms);
            let job = pool.run(move || detector.apply(&input));

            match tokio::time::timeout(limit, job).await {
                Ok(Ok(Ok(clean))) => {
                    return Deidentified {
                        text: clean,
                        method: RedactionMethod::Detector,
                        replacements: 0,
                    };
                }
                Ok(Ok(Err(e))) => {
                    warn!(detector = %name, error = %e, "PHI detector failed, using pattern fallback");
                }
                Ok(Err(e)) => {
                    warn!(detector = %name, error = %e, "PHI detector job failed, using pattern fallback");
                }
                Err(_) => {
                    warn!(
                        detector = %name,
                        timeout_ms = self.config.detector_timeout_ms,
                        "PHI detector timed out, using pattern fallback"
                    );
                }
            }
        }

        let this = Arc::clone(self);
        match pool.run(move || this.deidentify_with_patterns(&text)).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Pattern de-identification job failed");
                Deidentified::failed()
            }
        }
    }

    /// Like [`process`](Self::process), but runs on the worker pool.
    pub async fn process_async(
        self: &Arc<Self>,
        pool: &WorkerPool,
        text: String,
    ) -> DeidentificationResult {
        let deidentified = self.deidentify_async(pool, text.clone()).await;

        let this = Arc::clone(self);
        let original = text.clone();
        let output = deidentified.text.clone();
        let report = match pool.run(move || this.validate(&original, &output)).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Validation job failed, validating inline");
                self.validate(&text, &deidentified.text)
            }
        };

        self.finish(deidentified, report)
    }

    fn finish(&self, deidentified: Deidentified, report: ValidationReport) -> DeidentificationResult {
        if self.config.report_issues && !report.issues.is_empty() {
            warn!(
                method = ?deidentified.method,
                issues = ?report.issues,
                "De-identification validation reported issues"
            );
        }
        DeidentificationResult {
            text: deidentified.text,
            method: deidentified.method,
            report,
        }
    }
}
