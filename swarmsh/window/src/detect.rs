use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use span_log::PatternAlert;
use thiserror::Error;

use crate::metrics::MetricSnapshot;

/// Detector failure. The registry logs it and moves on to the next detector.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// A metric the detector needs is missing or not finite.
    #[error("detector {detector} cannot read {metric}")]
    Metric {
        /// Detector id.
        detector: String,
        /// Offending metric.
        metric: &'static str,
    },
    /// Custom detector failure.
    #[error("detector {0} failed: {1}")]
    Failed(String, String),
}

/// Thresholds for the built-in detectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorThresholds {
    /// Error rate above which an error spike is raised.
    pub error_rate: f64,
    /// Minimum workload spans before error rate is trusted.
    pub min_samples: usize,
    /// Latency growth ratio against the prior snapshot.
    pub latency_ratio: f64,
    /// Throughput ratio below which a drop is raised.
    pub throughput_ratio: f64,
    /// Error categories tolerated at once.
    pub cascade_categories: usize,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.05,
            min_samples: 5,
            latency_ratio: 1.5,
            throughput_ratio: 0.5,
            cascade_categories: 2,
        }
    }
}

/// Pure function over the current (and optionally prior) snapshot.
pub trait PatternDetector: Send + Sync {
    /// Stable id, also the alert kind.
    fn id(&self) -> &str;

    /// Returns an alert when the pattern is present.
    fn detect(
        &self,
        current: &MetricSnapshot,
        prior: Option<&MetricSnapshot>,
    ) -> Result<Option<PatternAlert>, DetectorError>;
}

/// Raises `error_spike` when the error rate exceeds the threshold.
#[derive(Debug, Clone)]
pub struct ErrorSpikeDetector {
    threshold: f64,
    min_samples: usize,
}

impl ErrorSpikeDetector {
    /// Creates the detector.
    #[must_use]
    pub const fn new(threshold: f64, min_samples: usize) -> Self {
        Self {
            threshold,
            min_samples,
        }
    }
}

impl PatternDetector for ErrorSpikeDetector {
    fn id(&self) -> &str {
        "error_spike"
    }

    fn detect(
        &self,
        current: &MetricSnapshot,
        _prior: Option<&MetricSnapshot>,
    ) -> Result<Option<PatternAlert>, DetectorError> {
        if !current.error_rate.is_finite() {
            return Err(DetectorError::Metric {
                detector: self.id().into(),
                metric: "error_rate",
            });
        }
        if current.span_count < self.min_samples || current.error_rate <= self.threshold {
            return Ok(None);
        }
        let severity = (current.error_rate - self.threshold) / self.threshold;
        let alert = PatternAlert::new(
            self.id(),
            self.id(),
            severity,
            format!(
                "error rate {:.1}% over {} spans exceeds {:.1}%",
                current.error_rate * 100.0,
                current.span_count,
                self.threshold * 100.0
            ),
        )
        .with_evidence(current.error_span_ids.iter().cloned());
        Ok(Some(alert))
    }
}

/// Raises `latency_increase` when mean latency grew past `ratio` of the prior window.
#[derive(Debug, Clone)]
pub struct LatencyIncreaseDetector {
    ratio: f64,
}

impl LatencyIncreaseDetector {
    /// Creates the detector.
    #[must_use]
    pub const fn new(ratio: f64) -> Self {
        Self { ratio }
    }
}

impl PatternDetector for LatencyIncreaseDetector {
    fn id(&self) -> &str {
        "latency_increase"
    }

    fn detect(
        &self,
        current: &MetricSnapshot,
        prior: Option<&MetricSnapshot>,
    ) -> Result<Option<PatternAlert>, DetectorError> {
        let (Some(now), Some(before)) = (
            current.mean_latency_ms,
            prior.and_then(|prior| prior.mean_latency_ms),
        ) else {
            return Ok(None);
        };
        if before <= 0.0 {
            return Ok(None);
        }
        let growth = now / before;
        if growth <= self.ratio {
            return Ok(None);
        }
        Ok(Some(PatternAlert::new(
            self.id(),
            self.id(),
            (growth - self.ratio) / self.ratio,
            format!("mean latency {before:.0}ms -> {now:.0}ms ({growth:.2}x)"),
        )))
    }
}

/// Raises `throughput_drop` when the event rate fell below `ratio` of the prior window.
#[derive(Debug, Clone)]
pub struct ThroughputDropDetector {
    ratio: f64,
}

impl ThroughputDropDetector {
    /// Creates the detector.
    #[must_use]
    pub const fn new(ratio: f64) -> Self {
        Self { ratio }
    }
}

impl PatternDetector for ThroughputDropDetector {
    fn id(&self) -> &str {
        "throughput_drop"
    }

    fn detect(
        &self,
        current: &MetricSnapshot,
        prior: Option<&MetricSnapshot>,
    ) -> Result<Option<PatternAlert>, DetectorError> {
        let Some(prior) = prior else {
            return Ok(None);
        };
        if prior.event_rate <= 0.0 {
            return Ok(None);
        }
        let ratio = current.event_rate / prior.event_rate;
        if ratio >= self.ratio {
            return Ok(None);
        }
        Ok(Some(PatternAlert::new(
            self.id(),
            self.id(),
            (self.ratio - ratio) / self.ratio,
            format!(
                "event rate {:.2}/s -> {:.2}/s",
                prior.event_rate, current.event_rate
            ),
        )))
    }
}

/// Raises `cascade_failure` when errors spread over too many categories.
#[derive(Debug, Clone)]
pub struct CascadeFailureDetector {
    max_categories: usize,
}

impl CascadeFailureDetector {
    /// Creates the detector.
    #[must_use]
    pub const fn new(max_categories: usize) -> Self {
        Self { max_categories }
    }
}

impl PatternDetector for CascadeFailureDetector {
    fn id(&self) -> &str {
        "cascade_failure"
    }

    #[allow(clippy::cast_precision_loss)]
    fn detect(
        &self,
        current: &MetricSnapshot,
        _prior: Option<&MetricSnapshot>,
    ) -> Result<Option<PatternAlert>, DetectorError> {
        let affected = current.error_categories.len();
        if affected <= self.max_categories {
            return Ok(None);
        }
        let tolerated = self.max_categories.max(1) as f64;
        let categories: Vec<&str> = current.error_categories.keys().map(String::as_str).collect();
        Ok(Some(
            PatternAlert::new(
                self.id(),
                self.id(),
                (affected as f64 - tolerated) / tolerated,
                format!("errors across {affected} categories: {}", categories.join(", ")),
            )
            .with_evidence(current.error_span_ids.iter().cloned()),
        ))
    }
}

/// Ordered, runtime-extensible detector set.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Arc<RwLock<Vec<Arc<dyn PatternDetector>>>>,
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

impl DetectorRegistry {
    /// Registry with the four built-in detectors.
    #[must_use]
    pub fn with_defaults(thresholds: &DetectorThresholds) -> Self {
        let registry = Self::default();
        registry.register(Arc::new(ErrorSpikeDetector::new(
            thresholds.error_rate,
            thresholds.min_samples,
        )));
        registry.register(Arc::new(LatencyIncreaseDetector::new(thresholds.latency_ratio)));
        registry.register(Arc::new(ThroughputDropDetector::new(
            thresholds.throughput_ratio,
        )));
        registry.register(Arc::new(CascadeFailureDetector::new(
            thresholds.cascade_categories,
        )));
        registry
    }

    /// Adds a detector; one with the same id is replaced in place.
    pub fn register(&self, detector: Arc<dyn PatternDetector>) {
        let mut detectors = self.detectors.write();
        if let Some(slot) = detectors.iter_mut().find(|existing| existing.id() == detector.id()) {
            *slot = detector;
        } else {
            detectors.push(detector);
        }
    }

    /// Registered ids, in evaluation order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.detectors
            .read()
            .iter()
            .map(|detector| detector.id().to_owned())
            .collect()
    }

    /// Runs every detector. Failures are logged and counted, never propagated.
    pub fn evaluate(
        &self,
        current: &MetricSnapshot,
        prior: Option<&MetricSnapshot>,
    ) -> (Vec<PatternAlert>, usize) {
        let detectors: Vec<Arc<dyn PatternDetector>> = self.detectors.read().clone();
        let mut alerts = Vec::new();
        let mut skipped = 0;
        for detector in detectors {
            match detector.detect(current, prior) {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => {}
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(detector = detector.id(), error = %err, "detector skipped");
                }
            }
        }
        (alerts, skipped)
    }
}
