#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Telemetry window processor: a bounded sliding window over the span log,
//! per-tick metric snapshots with a composite health score, and pattern
//! detectors that raise alerts.

/// Bounded circular span buffer.
pub mod buffer;
/// Pattern detectors and their registry.
pub mod detect;
/// Metric snapshots, health scoring and the snapshot board.
pub mod metrics;
/// Periodic tick driver.
pub mod processor;

pub use buffer::SpanWindow;
pub use detect::{
    CascadeFailureDetector, DetectorError, DetectorRegistry, DetectorThresholds,
    ErrorSpikeDetector, LatencyIncreaseDetector, PatternDetector, ThroughputDropDetector,
};
pub use metrics::{health_score, HealthBand, MetricSnapshot, SnapshotBoard};
pub use processor::{TickReport, WindowConfig, WindowProcessor};
