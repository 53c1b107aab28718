use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use swarmsh_window::HealthBand;
use uuid::Uuid;

use crate::metrics::SystemMetrics;

/// Kinds of decisions the engine can take.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Add agents.
    ScaleUp,
    /// Remove agents.
    ScaleDown,
    /// Restart the failing service.
    RestartService,
    /// Relieve the work queue.
    CoordinationImprove,
    /// Tune for completion rate.
    Optimize,
    /// Probe the system.
    HealthCheck,
    /// Collect more telemetry.
    TelemetryEnhance,
}

impl DecisionKind {
    /// Snake-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::RestartService => "restart_service",
            Self::CoordinationImprove => "coordination_improve",
            Self::Optimize => "optimize",
            Self::HealthCheck => "health_check",
            Self::TelemetryEnhance => "telemetry_enhance",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One ranked candidate action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    /// Identifier.
    pub id: Uuid,
    /// Kind.
    pub kind: DecisionKind,
    /// Human-readable reason.
    pub description: String,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Kind-specific parameters.
    pub parameters: IndexMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Decision {
    fn new(kind: DecisionKind, priority: u8, confidence: f64, description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description,
            priority,
            confidence: clamp_unit(confidence),
            parameters: IndexMap::new(),
            created_at: Utc::now(),
        }
    }

    fn with_param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_owned(), value);
        self
    }
}

/// Thresholds driving the rule set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecisionThresholds {
    /// Queue length above which coordination is improved.
    pub queue_busy: u64,
    /// Queue length considered critical.
    pub max_queue_size: u64,
    /// Fewer agents than this is an emergency.
    pub min_agents: usize,
    /// More agents than this is over-provisioned.
    pub max_agents: usize,
    /// Completion rate the healthy band aims for.
    pub high_completion_rate: f64,
    /// Completion rate that warrants scaling up.
    pub low_completion_rate: f64,
    /// Error rate that warrants a restart.
    pub error_rate: f64,
    /// Telemetry volume below which collection is enhanced.
    pub min_telemetry_volume: usize,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            queue_busy: 5,
            max_queue_size: 15,
            min_agents: 2,
            max_agents: 8,
            high_completion_rate: 0.8,
            low_completion_rate: 0.4,
            error_rate: 0.05,
            min_telemetry_volume: 10,
        }
    }
}

/// Rule-based candidate generation, sorted by descending (priority, confidence).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn decide(metrics: &SystemMetrics, thresholds: &DecisionThresholds) -> Vec<Decision> {
    let mut decisions = Vec::new();
    let band = metrics.band;
    let unhealthy = matches!(band, HealthBand::Critical | HealthBand::Degraded);
    let agents = metrics.active_agents;
    let queue = metrics.queue_size;

    if metrics.error_rate > thresholds.error_rate && thresholds.error_rate > 0.0 {
        let distance = (metrics.error_rate - thresholds.error_rate) / thresholds.error_rate;
        decisions.push(
            Decision::new(
                DecisionKind::RestartService,
                9,
                0.25f64.mul_add(distance, 0.5),
                format!(
                    "error rate {:.1}% above {:.1}%",
                    metrics.error_rate * 100.0,
                    thresholds.error_rate * 100.0
                ),
            )
            .with_param("error_rate", json!(metrics.error_rate)),
        );
    }

    if band == HealthBand::Critical && agents < thresholds.min_agents {
        let distance = (thresholds.min_agents - agents) as f64 / thresholds.min_agents as f64;
        decisions.push(
            Decision::new(
                DecisionKind::ScaleUp,
                10,
                0.2f64.mul_add(distance, 0.8),
                format!("emergency scale up: only {agents} agents active"),
            )
            .with_param("target_agents", json!(thresholds.min_agents)),
        );
    } else if unhealthy && metrics.completion_rate < thresholds.low_completion_rate {
        let distance = (thresholds.low_completion_rate - metrics.completion_rate)
            / thresholds.low_completion_rate;
        decisions.push(
            Decision::new(
                DecisionKind::ScaleUp,
                7,
                0.4f64.mul_add(distance, 0.6),
                format!("low completion rate {:.2}", metrics.completion_rate),
            )
            .with_param("target_agents", json!(agents + 1)),
        );
    }

    if band != HealthBand::Optimal && queue > thresholds.queue_busy {
        let critical = band == HealthBand::Critical && queue > thresholds.max_queue_size;
        let span = thresholds
            .max_queue_size
            .saturating_sub(thresholds.queue_busy)
            .max(1);
        let distance = queue.saturating_sub(thresholds.queue_busy) as f64 / span as f64;
        decisions.push(
            Decision::new(
                DecisionKind::CoordinationImprove,
                if critical { 9 } else { 6 },
                0.4f64.mul_add(distance, 0.6),
                format!("queue building up: {queue} items"),
            )
            .with_param(
                "action",
                json!(if critical { "clear_old_work" } else { "optimize_distribution" }),
            ),
        );
    }

    if band == HealthBand::Critical {
        let distance = (0.3 - metrics.health_score).max(0.0) / 0.3;
        decisions.push(Decision::new(
            DecisionKind::HealthCheck,
            8,
            0.3f64.mul_add(distance, 0.7),
            format!("critical health {:.2}", metrics.health_score),
        ));
    }

    if band == HealthBand::Healthy && metrics.completion_rate < thresholds.high_completion_rate {
        let distance = (thresholds.high_completion_rate - metrics.completion_rate)
            / thresholds.high_completion_rate;
        decisions.push(
            Decision::new(
                DecisionKind::Optimize,
                4,
                0.4f64.mul_add(distance, 0.6),
                format!("room for improvement: {:.2} completion rate", metrics.completion_rate),
            )
            .with_param("focus", json!("completion_rate")),
        );
    }

    if band == HealthBand::Optimal {
        if agents > thresholds.max_agents || (agents > 3 && queue == 0) {
            let distance = (agents.saturating_sub(3)) as f64 / 3.0;
            decisions.push(
                Decision::new(
                    DecisionKind::ScaleDown,
                    2,
                    0.2f64.mul_add(distance, 0.6),
                    format!("over-provisioned: {agents} agents, {queue} queued"),
                )
                .with_param("target_agents", json!(agents.saturating_sub(1).max(2))),
            );
        }
        if metrics.telemetry_volume < thresholds.min_telemetry_volume {
            let floor = thresholds.min_telemetry_volume.max(1) as f64;
            let distance = (floor - metrics.telemetry_volume as f64) / floor;
            decisions.push(
                Decision::new(
                    DecisionKind::TelemetryEnhance,
                    1,
                    0.4f64.mul_add(distance, 0.6),
                    "opportunity to enhance telemetry collection".to_owned(),
                )
                .with_param("action", json!("increase_sampling")),
            );
        }
    }

    rank(&mut decisions);
    decisions
}

/// Sorts by descending priority, then descending confidence.
pub fn rank(decisions: &mut [Decision]) {
    decisions.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(health: f64, completion: f64, agents: usize, queue: u64) -> SystemMetrics {
        SystemMetrics {
            taken_at: 0.0,
            health_score: health,
            band: HealthBand::from_score(health),
            completion_rate: completion,
            active_agents: agents,
            queue_size: queue,
            telemetry_volume: 40,
            error_rate: 0.0,
            event_rate: 1.0,
        }
    }

    fn kinds(decisions: &[Decision]) -> Vec<DecisionKind> {
        decisions.iter().map(|decision| decision.kind).collect()
    }

    #[test]
    fn critical_band_scales_and_clears_queue() {
        let decisions = decide(&metrics(0.2, 0.1, 1, 20), &DecisionThresholds::default());
        assert_eq!(
            kinds(&decisions),
            vec![
                DecisionKind::ScaleUp,
                DecisionKind::CoordinationImprove,
                DecisionKind::HealthCheck
            ]
        );
        assert_eq!(decisions[0].priority, 10);
        assert!((decisions[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(decisions[1].priority, 9);
        assert!((decisions[1].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degraded_queue_outranks_optimize() {
        let degraded = decide(&metrics(0.45, 0.45, 3, 15), &DecisionThresholds::default());
        assert_eq!(kinds(&degraded), vec![DecisionKind::CoordinationImprove]);
        let healthy = decide(&metrics(0.7, 0.6, 3, 8), &DecisionThresholds::default());
        assert_eq!(
            kinds(&healthy),
            vec![DecisionKind::CoordinationImprove, DecisionKind::Optimize]
        );
        assert!(healthy[0].priority > healthy[1].priority);
        assert!((healthy[1].confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn error_rate_proposes_restart() {
        let mut input = metrics(0.7, 0.9, 3, 0);
        input.error_rate = 0.15;
        let decisions = decide(&input, &DecisionThresholds::default());
        assert_eq!(decisions[0].kind, DecisionKind::RestartService);
        assert!((decisions[0].confidence - 1.0).abs() < 1e-9);

        input.error_rate = 0.07;
        let decisions = decide(&input, &DecisionThresholds::default());
        assert!((decisions[0].confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn optimal_band_trims_and_enhances() {
        let mut input = metrics(0.95, 1.0, 6, 0);
        input.telemetry_volume = 5;
        let decisions = decide(&input, &DecisionThresholds::default());
        assert_eq!(
            kinds(&decisions),
            vec![DecisionKind::ScaleDown, DecisionKind::TelemetryEnhance]
        );
        assert_eq!(decisions[0].parameters["target_agents"], json!(5));
    }

    #[test]
    fn confidence_is_clamped() {
        let mut input = metrics(0.7, 0.9, 3, 0);
        input.error_rate = 5.0;
        let decisions = decide(&input, &DecisionThresholds::default());
        assert!((decisions[0].confidence - 1.0).abs() < f64::EPSILON);
    }
}
