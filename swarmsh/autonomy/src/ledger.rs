use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use swarmsh_remediation::ActionId;
use uuid::Uuid;

use crate::rules::Decision;

/// Why a candidate was not executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Confidence under the execution floor.
    BelowConfidence,
    /// The per-cycle cap was already reached.
    CycleCap,
    /// No remediation action carries out this kind.
    Unmapped,
}

/// Lifecycle step of a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum DecisionStage {
    /// Generated by the rules.
    Proposed,
    /// Dropped by the execution policy.
    Rejected {
        /// Reason.
        reason: RejectionReason,
    },
    /// Handed to remediation.
    Executing,
    /// Remediation finished the action.
    Executed {
        /// Resulting action.
        action_id: ActionId,
        /// Final action status label.
        status: String,
    },
    /// Remediation failed.
    Failed {
        /// Failure detail.
        error: String,
    },
}

impl DecisionStage {
    /// Whether the decision is still waiting on execution.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Proposed | Self::Executing)
    }
}

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    /// Cycle that produced the decision.
    pub cycle_id: Uuid,
    /// The decision.
    pub decision: Arc<Decision>,
    /// Lifecycle step recorded.
    pub stage: DecisionStage,
    /// When the step was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record of decision lifecycles.
#[derive(Debug, Clone, Default)]
pub struct DecisionLedger {
    entries: Arc<RwLock<Vec<LedgerEntry>>>,
}

impl DecisionLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one step.
    pub fn record(&self, cycle_id: Uuid, decision: &Arc<Decision>, stage: DecisionStage) {
        self.entries.write().push(LedgerEntry {
            cycle_id,
            decision: Arc::clone(decision),
            stage,
            recorded_at: Utc::now(),
        });
    }

    /// Every entry, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.read().clone()
    }

    /// Latest step per decision, in first-seen order.
    #[must_use]
    pub fn latest(&self) -> Vec<LedgerEntry> {
        let entries = self.entries.read();
        let mut latest: IndexMap<Uuid, LedgerEntry> = IndexMap::new();
        for entry in entries.iter() {
            latest.insert(entry.decision.id, entry.clone());
        }
        latest.into_values().collect()
    }

    /// Decisions whose latest step is not terminal.
    #[must_use]
    pub fn pending(&self) -> Vec<Arc<Decision>> {
        self.latest()
            .into_iter()
            .filter(|entry| entry.stage.is_pending())
            .map(|entry| entry.decision)
            .collect()
    }

    /// Decisions whose latest step is a failure.
    #[must_use]
    pub fn failed(&self) -> Vec<LedgerEntry> {
        self.latest()
            .into_iter()
            .filter(|entry| matches!(entry.stage, DecisionStage::Failed { .. }))
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
