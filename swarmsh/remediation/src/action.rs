use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::RemediationError;

/// Identifier of a remediation action.
pub type ActionId = Uuid;

/// Fixed remediation vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Restart the target service.
    RestartService,
    /// Add agents to the target.
    ScaleUp,
    /// Remove agents from the target.
    ScaleDown,
    /// Drop cached state.
    ClearCache,
    /// Open the circuit breaker in front of the target.
    CircuitBreaker,
    /// Lower the admitted request rate.
    ThrottleRequests,
    /// Probe the target.
    HealthCheck,
}

impl ActionKind {
    /// Every action kind.
    pub const ALL: [Self; 7] = [
        Self::RestartService,
        Self::ScaleUp,
        Self::ScaleDown,
        Self::ClearCache,
        Self::CircuitBreaker,
        Self::ThrottleRequests,
        Self::HealthCheck,
    ];

    /// Snake-case label, also the span suffix.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::RestartService => "restart_service",
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::ClearCache => "clear_cache",
            Self::CircuitBreaker => "circuit_breaker",
            Self::ThrottleRequests => "throttle_requests",
            Self::HealthCheck => "health_check",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ActionKind {
    type Err = RemediationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label() == value)
            .ok_or_else(|| RemediationError::UnknownKind(value.to_owned()))
    }
}

/// What asked for the action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ActionOrigin {
    /// A decision from the decision engine.
    Decision(Uuid),
    /// A pattern alert.
    Alert(Uuid),
    /// An operator or test.
    Manual,
}

/// Request to perform one action against one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRequest {
    /// Action kind.
    pub kind: ActionKind,
    /// Target the action is applied to.
    pub target: String,
    /// Why the action was requested.
    pub reason: String,
    /// Requester.
    pub origin: ActionOrigin,
    /// Magnitude for scaling actions.
    pub step: u32,
}

impl ActionRequest {
    /// Creates a manual request with step 1.
    #[must_use]
    pub fn new(kind: ActionKind, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            reason: reason.into(),
            origin: ActionOrigin::Manual,
            step: 1,
        }
    }

    /// Sets the origin.
    #[must_use]
    pub const fn with_origin(mut self, origin: ActionOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the scaling step (at least 1).
    #[must_use]
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step.max(1);
        self
    }
}

/// Prior state captured by an action so that it can be inverted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackToken {
    /// Agent count before scaling.
    AgentCount {
        /// Prior count.
        prior: u32,
    },
    /// Circuit state before the breaker tripped.
    Circuit {
        /// Whether it was already open.
        prior_open: bool,
    },
    /// Rate limit before throttling.
    RateLimit {
        /// Prior limit; `None` means unlimited.
        prior: Option<u32>,
    },
    /// Nothing to invert.
    Noop,
}

/// Lifecycle status of an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ActionStatus {
    /// Accepted, waiting for its target and a concurrency slot.
    Pending,
    /// Actuator call in progress.
    Running,
    /// Applied.
    Succeeded,
    /// Actuator call failed.
    Failed(String),
    /// Inverted by `rollback`.
    RolledBack,
    /// Full pipeline ran without the side effect.
    DryRun,
}

impl ActionStatus {
    /// Lowercase label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::RolledBack => "rolled_back",
            Self::DryRun => "dry_run",
        }
    }

    /// Whether the action has finished.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Audit record of one action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    /// Action identifier.
    pub id: ActionId,
    /// Originating request.
    pub request: ActionRequest,
    /// Current status.
    pub status: ActionStatus,
    /// Inverse captured on success.
    pub rollback: Option<RollbackToken>,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Completion time of the last status change.
    pub updated_at: DateTime<Utc>,
}

impl ActionRecord {
    pub(crate) fn pending(request: ActionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            status: ActionStatus::Pending,
            rollback: None,
            submitted_at: now,
            updated_at: now,
        }
    }
}
