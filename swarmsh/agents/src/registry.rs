use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Last known status of one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentStatus {
    /// Agent id.
    pub id: String,
    /// Agent family.
    pub kind: String,
    /// Current state label.
    pub state: String,
    /// Last time the agent processed a span.
    pub last_seen: DateTime<Utc>,
    /// Successful transitions.
    pub transitions: u64,
    /// Handler failures and validator rejections.
    pub failures: u64,
}

/// Registry of running agents, shared between runners and the decision engine.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RwLock<IndexMap<String, AgentStatus>>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent, replacing any previous entry with the same id.
    pub fn register(&self, id: &str, kind: &str, state: &str) {
        self.inner.write().insert(
            id.to_owned(),
            AgentStatus {
                id: id.to_owned(),
                kind: kind.to_owned(),
                state: state.to_owned(),
                last_seen: Utc::now(),
                transitions: 0,
                failures: 0,
            },
        );
    }

    /// Records a processed span without a transition.
    pub fn touch(&self, id: &str) {
        if let Some(status) = self.inner.write().get_mut(id) {
            status.last_seen = Utc::now();
        }
    }

    /// Records a successful transition.
    pub fn record_transition(&self, id: &str, state: &str) {
        if let Some(status) = self.inner.write().get_mut(id) {
            state.clone_into(&mut status.state);
            status.transitions += 1;
            status.last_seen = Utc::now();
        }
    }

    /// Records a failed or rejected span.
    pub fn record_failure(&self, id: &str) {
        if let Some(status) = self.inner.write().get_mut(id) {
            status.failures += 1;
            status.last_seen = Utc::now();
        }
    }

    /// Removes an agent.
    pub fn deregister(&self, id: &str) -> Option<AgentStatus> {
        self.inner.write().shift_remove(id)
    }

    /// Fetches one agent.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<AgentStatus> {
        self.inner.read().get(id).cloned()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no agent is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Agents seen within `within` of now.
    #[must_use]
    pub fn active_count(&self, within: Duration) -> usize {
        let cutoff = Utc::now() - within;
        self.inner
            .read()
            .values()
            .filter(|status| status.last_seen >= cutoff)
            .count()
    }

    /// Snapshot of all statuses in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentStatus> {
        self.inner.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_transitions_and_failures() {
        let registry = AgentRegistry::new();
        registry.register("roberts", "roberts", "idle");
        registry.register("scrum", "scrum", "planning");
        registry.record_transition("roberts", "open");
        registry.record_failure("roberts");
        registry.record_transition("ghost", "nowhere");

        let roberts = registry.get("roberts").unwrap();
        assert_eq!(roberts.state, "open");
        assert_eq!((roberts.transitions, roberts.failures), (1, 1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_count(Duration::minutes(5)), 2);
        assert!(registry.deregister("scrum").is_some());
        assert_eq!(registry.snapshot().len(), 1);
    }
}
