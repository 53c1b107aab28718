use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::action::{ActionId, ActionKind, ActionStatus};

/// Event emitted on every action status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEvent {
    /// Action identifier.
    pub id: ActionId,
    /// Action kind.
    pub kind: ActionKind,
    /// Target.
    pub target: String,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// Status after the change.
    pub status: ActionStatus,
    /// Optional note.
    pub note: Option<String>,
}

impl fmt::Display for ActionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} {} {} -> {}",
            self.id, self.timestamp, self.kind, self.target, self.status
        )
    }
}

/// Append-only audit trail of action transitions.
#[derive(Debug, Clone, Default)]
pub struct ActionJournal {
    entries: Arc<RwLock<Vec<ActionEvent>>>,
}

impl ActionJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: ActionEvent) {
        self.entries.write().push(event);
    }

    /// Copy of every event.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ActionEvent> {
        self.entries.read().clone()
    }

    /// Events for one action, in order.
    #[must_use]
    pub fn history(&self, id: ActionId) -> Vec<ActionEvent> {
        self.entries
            .read()
            .iter()
            .filter(|event| event.id == id)
            .cloned()
            .collect()
    }

    /// Number of recorded events.
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
