use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    action::{ActionKind, ActionRequest, RollbackToken},
    engine::RemediationError,
};

/// Side-effecting half of the remediation engine.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Performs the action and returns what is needed to invert it.
    async fn apply(&self, request: &ActionRequest) -> Result<RollbackToken, RemediationError>;

    /// Reapplies the prior state captured in `token`.
    async fn revert(&self, target: &str, token: &RollbackToken) -> Result<(), RemediationError>;
}

/// Observable state of one simulated target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetState {
    /// Running agents.
    pub agents: u32,
    /// Whether the circuit breaker is open.
    pub circuit_open: bool,
    /// Admitted requests per second; `None` means unlimited.
    pub rate_limit: Option<u32>,
    /// Restarts performed.
    pub restarts: u32,
    /// Cache clears performed.
    pub cache_clears: u32,
    /// Health probes performed.
    pub health_checks: u32,
}

/// Simulated fleet used when no real control plane is attached.
#[derive(Debug, Clone)]
pub struct InMemoryActuator {
    targets: Arc<RwLock<IndexMap<String, TargetState>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    latency: Duration,
    initial_agents: u32,
    min_agents: u32,
    max_agents: u32,
    base_rate_limit: u32,
}

impl Default for InMemoryActuator {
    fn default() -> Self {
        Self::new(2, 1, 16)
    }
}

impl InMemoryActuator {
    /// Fleet whose targets start with `initial_agents`, bounded by `[min_agents, max_agents]`.
    #[must_use]
    pub fn new(initial_agents: u32, min_agents: u32, max_agents: u32) -> Self {
        let min_agents = min_agents.max(1);
        let max_agents = max_agents.max(min_agents);
        Self {
            targets: Arc::new(RwLock::new(IndexMap::new())),
            failing: Arc::new(RwLock::new(HashSet::new())),
            latency: Duration::ZERO,
            initial_agents: initial_agents.clamp(min_agents, max_agents),
            min_agents,
            max_agents,
            base_rate_limit: 100,
        }
    }

    /// Simulated duration of every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every call against `target` fail.
    pub fn fail_on(&self, target: impl Into<String>) {
        self.failing.write().insert(target.into());
    }

    /// Current state of `target`, if it was ever touched.
    #[must_use]
    pub fn state(&self, target: &str) -> Option<TargetState> {
        self.targets.read().get(target).cloned()
    }

    /// Current agent count of `target`.
    #[must_use]
    pub fn agents(&self, target: &str) -> u32 {
        self.state(target)
            .map_or(self.initial_agents, |state| state.agents)
    }

    fn fresh(&self) -> TargetState {
        TargetState {
            agents: self.initial_agents,
            circuit_open: false,
            rate_limit: None,
            restarts: 0,
            cache_clears: 0,
            health_checks: 0,
        }
    }

    async fn simulate(&self, target: &str) -> Result<(), RemediationError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.read().contains(target) {
            return Err(RemediationError::Actuator {
                target: target.to_owned(),
                reason: "target unreachable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for InMemoryActuator {
    async fn apply(&self, request: &ActionRequest) -> Result<RollbackToken, RemediationError> {
        self.simulate(&request.target).await?;
        let mut targets = self.targets.write();
        let fresh = self.fresh();
        let state = targets.entry(request.target.clone()).or_insert(fresh);
        let token = match request.kind {
            ActionKind::ScaleUp => {
                let prior = state.agents;
                state.agents = prior.saturating_add(request.step).min(self.max_agents);
                RollbackToken::AgentCount { prior }
            }
            ActionKind::ScaleDown => {
                let prior = state.agents;
                state.agents = prior.saturating_sub(request.step).max(self.min_agents);
                RollbackToken::AgentCount { prior }
            }
            ActionKind::CircuitBreaker => {
                let prior_open = state.circuit_open;
                state.circuit_open = true;
                RollbackToken::Circuit { prior_open }
            }
            ActionKind::ThrottleRequests => {
                let prior = state.rate_limit;
                let current = prior.unwrap_or(self.base_rate_limit);
                state.rate_limit = Some((current / 2).max(1));
                RollbackToken::RateLimit { prior }
            }
            ActionKind::RestartService => {
                state.restarts += 1;
                RollbackToken::Noop
            }
            ActionKind::ClearCache => {
                state.cache_clears += 1;
                RollbackToken::Noop
            }
            ActionKind::HealthCheck => {
                state.health_checks += 1;
                RollbackToken::Noop
            }
        };
        Ok(token)
    }

    async fn revert(&self, target: &str, token: &RollbackToken) -> Result<(), RemediationError> {
        self.simulate(target).await?;
        let mut targets = self.targets.write();
        let fresh = self.fresh();
        let state = targets.entry(target.to_owned()).or_insert(fresh);
        match *token {
            RollbackToken::AgentCount { prior } => state.agents = prior,
            RollbackToken::Circuit { prior_open } => state.circuit_open = prior_open,
            RollbackToken::RateLimit { prior } => state.rate_limit = prior,
            RollbackToken::Noop => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scaling_respects_bounds_and_reverts() {
        let fleet = InMemoryActuator::new(2, 1, 4);
        let up = ActionRequest::new(ActionKind::ScaleUp, "swarm", "load").with_step(5);
        let token = fleet.apply(&up).await.unwrap();
        assert_eq!(token, RollbackToken::AgentCount { prior: 2 });
        assert_eq!(fleet.agents("swarm"), 4);

        fleet.revert("swarm", &token).await.unwrap();
        assert_eq!(fleet.agents("swarm"), 2);

        let down = ActionRequest::new(ActionKind::ScaleDown, "swarm", "idle").with_step(9);
        fleet.apply(&down).await.unwrap();
        assert_eq!(fleet.agents("swarm"), 1);
    }

    #[tokio::test]
    async fn throttle_and_breaker_capture_prior_state() {
        let fleet = InMemoryActuator::default();
        let throttle = ActionRequest::new(ActionKind::ThrottleRequests, "api", "queue");
        let first = fleet.apply(&throttle).await.unwrap();
        let second = fleet.apply(&throttle).await.unwrap();
        assert_eq!(first, RollbackToken::RateLimit { prior: None });
        assert_eq!(second, RollbackToken::RateLimit { prior: Some(50) });
        assert_eq!(fleet.state("api").unwrap().rate_limit, Some(25));

        let breaker = ActionRequest::new(ActionKind::CircuitBreaker, "api", "cascade");
        let token = fleet.apply(&breaker).await.unwrap();
        assert!(fleet.state("api").unwrap().circuit_open);
        fleet.revert("api", &token).await.unwrap();
        assert!(!fleet.state("api").unwrap().circuit_open);
    }

    #[tokio::test]
    async fn failing_targets_error() {
        let fleet = InMemoryActuator::default();
        fleet.fail_on("db");
        let restart = ActionRequest::new(ActionKind::RestartService, "db", "errors");
        assert!(matches!(
            fleet.apply(&restart).await,
            Err(RemediationError::Actuator { .. })
        ));
        assert!(fleet.state("db").is_none());
    }
}
