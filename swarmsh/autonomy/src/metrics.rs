use chrono::Duration;
use serde::{Deserialize, Serialize};
use swarmsh_agents::AgentRegistry;
use swarmsh_window::{health_score, HealthBand, MetricSnapshot};

/// Decision-time view of the system: the latest window snapshot merged with
/// the agent registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    /// Unix seconds of the underlying snapshot.
    pub taken_at: f64,
    /// Health score recomputed with the merged agent count.
    pub health_score: f64,
    /// Band of `health_score`.
    pub band: HealthBand,
    /// Work completion rate.
    pub completion_rate: f64,
    /// Larger of the agents seen in spans and the agents recently active in the registry.
    pub active_agents: usize,
    /// Outstanding work.
    pub queue_size: u64,
    /// Spans in the window.
    pub telemetry_volume: usize,
    /// Workload error rate.
    pub error_rate: f64,
    /// Workload spans per second.
    pub event_rate: f64,
}

impl SystemMetrics {
    /// Merges a snapshot with the registry; agents count as active when seen
    /// within `active_within`.
    #[must_use]
    pub fn combine(
        snapshot: &MetricSnapshot,
        registry: &AgentRegistry,
        active_within: Duration,
    ) -> Self {
        let active_agents = snapshot
            .active_agents
            .max(registry.active_count(active_within));
        let health_score = health_score(
            snapshot.completion_rate,
            active_agents,
            snapshot.queue_size,
            snapshot.telemetry_volume,
        );
        Self {
            taken_at: snapshot.taken_at,
            health_score,
            band: HealthBand::from_score(health_score),
            completion_rate: snapshot.completion_rate,
            active_agents,
            queue_size: snapshot.queue_size,
            telemetry_volume: snapshot.telemetry_volume,
            error_rate: snapshot.error_rate,
            event_rate: snapshot.event_rate,
        }
    }
}
