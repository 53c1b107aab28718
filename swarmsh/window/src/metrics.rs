use std::{collections::HashSet, collections::VecDeque, fmt, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use span_log::{Scalar, Span};

use crate::buffer::SpanWindow;

/// Spans the coordination core emits about itself. They count toward
/// telemetry volume and active agents but not toward workload rates.
pub const INTERNAL_PREFIXES: [&str; 5] = [
    "swarmsh.alert",
    "swarmsh.agent",
    "swarmsh.decision",
    "swarmsh.remediation",
    "swarmsh.window",
];

const MAX_EVIDENCE: usize = 32;

/// Health classification derived from the health score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    /// Below 0.3.
    Critical,
    /// `[0.3, 0.6)`.
    Degraded,
    /// `[0.6, 0.9)`.
    Healthy,
    /// 0.9 and above.
    Optimal,
}

impl HealthBand {
    /// Bands a health score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            Self::Critical
        } else if score < 0.6 {
            Self::Degraded
        } else if score < 0.9 {
            Self::Healthy
        } else {
            Self::Optimal
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Degraded => "degraded",
            Self::Healthy => "healthy",
            Self::Optimal => "optimal",
        }
    }
}

impl fmt::Display for HealthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Composite health score in `[0, 1]`.
///
/// `0.4·completion + 0.3·min(agents/5, 1) + 0.2·max(0, 1 − queue/10) + 0.1·min(volume/20, 1)`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn health_score(
    completion_rate: f64,
    active_agents: usize,
    queue_size: u64,
    telemetry_volume: usize,
) -> f64 {
    let completion = if completion_rate.is_finite() {
        completion_rate.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let agents = (active_agents as f64 / 5.0).min(1.0);
    let queue = (1.0 - queue_size as f64 / 10.0).max(0.0);
    let telemetry = (telemetry_volume as f64 / 20.0).min(1.0);
    (0.4f64.mul_add(
        completion,
        0.3f64.mul_add(agents, 0.2f64.mul_add(queue, 0.1 * telemetry)),
    ))
    .clamp(0.0, 1.0)
}

/// Immutable per-tick aggregate over a window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    /// Unix seconds when computed.
    pub taken_at: f64,
    /// Window horizon in seconds.
    pub window_secs: f64,
    /// Workload spans in the window.
    pub span_count: usize,
    /// Workload spans per second.
    pub event_rate: f64,
    /// Workload spans per category.
    pub category_counts: IndexMap<String, u64>,
    /// Workload spans marked as errors.
    pub error_count: u64,
    /// `error_count / span_count` (0 when empty).
    pub error_rate: f64,
    /// Error spans per category.
    pub error_categories: IndexMap<String, u64>,
    /// Ids of (up to 32) error spans.
    pub error_span_ids: Vec<String>,
    /// Mean `duration_ms` over spans carrying it.
    pub mean_latency_ms: Option<f64>,
    /// Completed work over finished and outstanding work (0 without work spans).
    pub completion_rate: f64,
    /// Distinct agents seen.
    pub active_agents: usize,
    /// Outstanding work: the latest `queue.size` gauge, else pending minus finished.
    pub queue_size: u64,
    /// Every span in the window, internal ones included.
    pub telemetry_volume: usize,
    /// Composite health score.
    pub health_score: f64,
    /// Band of `health_score`.
    pub band: HealthBand,
}

impl MetricSnapshot {
    /// Aggregates the spans currently in `window`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn from_window(window: &SpanWindow, now: f64) -> Self {
        let window_secs = window.horizon().as_secs_f64().max(1.0);
        let mut span_count = 0_usize;
        let mut category_counts: IndexMap<String, u64> = IndexMap::new();
        let mut error_categories: IndexMap<String, u64> = IndexMap::new();
        let mut error_count = 0_u64;
        let mut error_span_ids = Vec::new();
        let mut latency_sum = 0.0;
        let mut latency_count = 0_u64;
        let mut agents: HashSet<&str> = HashSet::new();
        let mut work = WorkTally::default();
        let mut queue_gauge: Option<(f64, u64)> = None;

        for span in window.iter() {
            for key in ["agent.name", "swarmsh.agent.name"] {
                if let Some(name) = span.attr_str(key) {
                    agents.insert(name);
                }
            }
            if let Some(size) = span.attr_f64("queue.size").filter(|size| *size >= 0.0) {
                let size = size.round().min(u64::MAX as f64) as u64;
                if !matches!(queue_gauge, Some((ts, _)) if span.timestamp < ts) {
                    queue_gauge = Some((span.timestamp, size));
                }
            }
            if is_internal(span) {
                continue;
            }
            span_count += 1;
            let category = category_of(span);
            *category_counts.entry(category.to_owned()).or_default() += 1;
            if is_error(span) {
                error_count += 1;
                *error_categories.entry(category.to_owned()).or_default() += 1;
                if error_span_ids.len() < MAX_EVIDENCE {
                    error_span_ids.push(span.span_id.clone());
                }
            }
            if let Some(latency) = span.attr_f64("duration_ms").filter(|ms| ms.is_finite()) {
                latency_sum += latency;
                latency_count += 1;
            }
            work.observe(span.attr_str("work.status"));
        }

        let error_rate = if span_count == 0 {
            0.0
        } else {
            error_count as f64 / span_count as f64
        };
        let mean_latency_ms = (latency_count > 0).then(|| latency_sum / latency_count as f64);
        let queue_size = queue_gauge.map_or_else(|| work.outstanding(), |(_, size)| size);
        let completion_rate = work.completion_rate();
        let active_agents = agents.len();
        let telemetry_volume = window.len();
        let health_score = health_score(completion_rate, active_agents, queue_size, telemetry_volume);

        Self {
            taken_at: now,
            window_secs,
            span_count,
            event_rate: span_count as f64 / window_secs,
            category_counts,
            error_count,
            error_rate,
            error_categories,
            error_span_ids,
            mean_latency_ms,
            completion_rate,
            active_agents,
            queue_size,
            telemetry_volume,
            health_score,
            band: HealthBand::from_score(health_score),
        }
    }
}

/// Whether the span is emitted by the coordination core itself.
#[must_use]
pub fn is_internal(span: &Span) -> bool {
    INTERNAL_PREFIXES.iter().any(|prefix| {
        span.name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    })
}

/// `error=true` or `status="error"`.
#[must_use]
pub fn is_error(span: &Span) -> bool {
    span.attr("error").and_then(Scalar::as_bool).unwrap_or(false)
        || span
            .attr_str("status")
            .is_some_and(|status| status.eq_ignore_ascii_case("error"))
}

fn category_of(span: &Span) -> &str {
    span.attr_str("category")
        .filter(|category| !category.is_empty())
        .or_else(|| span.domain())
        .unwrap_or("unknown")
}

#[derive(Debug, Default)]
struct WorkTally {
    completed: u64,
    failed: u64,
    pending: u64,
    claimed: u64,
}

impl WorkTally {
    fn observe(&mut self, status: Option<&str>) {
        match status {
            Some("completed") => self.completed += 1,
            Some("failed") => self.failed += 1,
            Some("pending") => self.pending += 1,
            Some("claimed") => self.claimed += 1,
            _ => {}
        }
    }

    fn outstanding(&self) -> u64 {
        (self.pending + self.claimed).saturating_sub(self.completed + self.failed)
    }

    #[allow(clippy::cast_precision_loss)]
    fn completion_rate(&self) -> f64 {
        let total = self.completed + self.failed + self.outstanding();
        if total == 0 {
            0.0
        } else {
            self.completed as f64 / total as f64
        }
    }
}

/// Latest snapshots, shared between the window processor and the decision engine.
#[derive(Debug, Clone)]
pub struct SnapshotBoard {
    inner: Arc<RwLock<VecDeque<Arc<MetricSnapshot>>>>,
    keep: usize,
}

impl Default for SnapshotBoard {
    fn default() -> Self {
        Self::new(32)
    }
}

impl SnapshotBoard {
    /// Creates a board retaining `keep` snapshots.
    #[must_use]
    pub fn new(keep: usize) -> Self {
        let keep = keep.max(2);
        Self {
            inner: Arc::new(RwLock::new(VecDeque::with_capacity(keep))),
            keep,
        }
    }

    /// Publishes a snapshot.
    pub fn publish(&self, snapshot: MetricSnapshot) -> Arc<MetricSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut inner = self.inner.write();
        if inner.len() == self.keep {
            inner.pop_front();
        }
        inner.push_back(Arc::clone(&snapshot));
        snapshot
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<MetricSnapshot>> {
        self.inner.read().back().cloned()
    }

    /// Snapshot before the most recent one.
    #[must_use]
    pub fn previous(&self) -> Option<Arc<MetricSnapshot>> {
        let inner = self.inner.read();
        inner.len().checked_sub(2).and_then(|idx| inner.get(idx).cloned())
    }

    /// Retained snapshots, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Arc<MetricSnapshot>> {
        self.inner.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn window_with(spans: Vec<Span>) -> SpanWindow {
        let mut window = SpanWindow::new(Duration::from_secs(60), 1_000);
        for span in spans {
            window.push(Arc::new(span.at(1_000.0)));
        }
        window
    }

    #[test]
    fn health_score_matches_weights_and_bounds() {
        assert!((health_score(1.0, 5, 0, 20) - 1.0).abs() < 1e-9);
        assert!((health_score(0.5, 5, 5, 10) - 0.65).abs() < 1e-9);
        assert!(health_score(0.0, 0, 100, 0).abs() < 1e-9);
        assert!((health_score(7.0, 50, 0, 500) - 1.0).abs() < 1e-9);
        assert!(health_score(f64::NAN, 1, 1, 1) >= 0.0);
    }

    #[test]
    fn health_is_monotonic_in_completion_and_queue() {
        let mut last = -1.0;
        for step in 0..=10 {
            let score = health_score(f64::from(step) / 10.0, 3, 4, 12);
            assert!(score >= last);
            last = score;
        }
        let mut last = 2.0;
        for queue in 0..=20 {
            let score = health_score(0.6, 3, queue, 12);
            assert!(score <= last);
            last = score;
        }
    }

    #[test]
    fn bands_split_at_thresholds() {
        assert_eq!(HealthBand::from_score(0.29), HealthBand::Critical);
        assert_eq!(HealthBand::from_score(0.3), HealthBand::Degraded);
        assert_eq!(HealthBand::from_score(0.6), HealthBand::Healthy);
        assert_eq!(HealthBand::from_score(0.9), HealthBand::Optimal);
    }

    #[test]
    fn snapshot_derives_rates_from_attributes() {
        let mut spans = Vec::new();
        for idx in 0..8 {
            spans.push(
                Span::new("swarmsh.work.complete")
                    .with_attr("work.status", "completed")
                    .with_attr("duration_ms", 100_i64)
                    .with_attr("agent.name", format!("agent-{}", idx % 2)),
            );
        }
        spans.push(Span::new("swarmsh.work.claim").with_attr("work.status", "failed").with_attr("error", true));
        spans.push(
            Span::new("swarmsh.api.call")
                .with_attr("category", "backend")
                .with_attr("status", "error")
                .with_attr("duration_ms", 400_i64),
        );
        spans.push(Span::new("swarmsh.agent.transition").with_attr("agent.name", "roberts"));
        spans.push(Span::new("swarmsh.alert.error_spike"));

        let snapshot = MetricSnapshot::from_window(&window_with(spans), 1_001.0);
        assert_eq!(snapshot.span_count, 10);
        assert_eq!(snapshot.telemetry_volume, 12);
        assert_eq!(snapshot.error_count, 2);
        assert!((snapshot.error_rate - 0.2).abs() < 1e-9);
        assert_eq!(snapshot.category_counts.get("work"), Some(&9));
        assert_eq!(snapshot.error_categories.get("backend"), Some(&1));
        assert_eq!(snapshot.mean_latency_ms, Some(1_200.0 / 9.0));
        assert!((snapshot.completion_rate - 8.0 / 9.0).abs() < 1e-9);
        assert_eq!(snapshot.active_agents, 3);
        assert_eq!(snapshot.queue_size, 0);
        assert_eq!(snapshot.error_span_ids.len(), 2);
    }

    #[test]
    fn queue_gauge_latest_wins() {
        let mut window = SpanWindow::new(Duration::from_secs(60), 100);
        window.push(Arc::new(Span::new("swarmsh.queue.depth").with_attr("queue.size", 4_i64).at(10.0)));
        window.push(Arc::new(Span::new("swarmsh.queue.depth").with_attr("queue.size", 15_i64).at(20.0)));
        let snapshot = MetricSnapshot::from_window(&window, 30.0);
        assert_eq!(snapshot.queue_size, 15);
    }

    #[test]
    fn board_keeps_latest_and_previous() {
        let board = SnapshotBoard::new(2);
        let window = SpanWindow::default();
        for ts in [1.0, 2.0, 3.0] {
            board.publish(MetricSnapshot::from_window(&window, ts));
        }
        assert!((board.latest().unwrap().taken_at - 3.0).abs() < f64::EPSILON);
        assert!((board.previous().unwrap().taken_at - 2.0).abs() < f64::EPSILON);
        assert_eq!(board.history().len(), 2);
    }
}
