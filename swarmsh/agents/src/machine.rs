use std::{fmt, hash::Hash};

use indexmap::IndexMap;
use serde::Serialize;
use span_log::{Command, Span};
use thiserror::Error;

/// Failure raised by a transition handler. The transition is aborted and the
/// agent keeps its current state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// A required span attribute is absent.
    #[error("missing attribute `{0}`")]
    MissingAttribute(String),
    /// An attribute is present but unusable.
    #[error("invalid attribute `{key}`: {reason}")]
    InvalidAttribute {
        /// Attribute key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A persisted state label does not name a state of this machine.
    #[error("unknown state `{0}`")]
    UnknownState(String),
    /// Free-form handler failure.
    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::InvalidAttribute`].
    #[must_use]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// State type usable by [`StateMachine`].
pub trait FsmState: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every state, in declaration order.
    const ALL: &'static [Self];

    /// Stable label used in spans and snapshots.
    fn label(self) -> &'static str;

    /// Inverse of [`FsmState::label`].
    #[must_use]
    fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.label() == label)
    }
}

/// Handler invoked when a trigger fires.
pub type Handler = Box<dyn Fn(&Span) -> Result<Option<Command>, HandlerError> + Send + Sync>;

/// Destination plus handler for one `(state, span name)` entry.
pub struct Trigger<S> {
    /// State entered when the handler succeeds.
    pub to: S,
    handler: Handler,
}

impl<S: fmt::Debug> fmt::Debug for Trigger<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger").field("to", &self.to).finish()
    }
}

/// Enumerable description of a trigger table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    /// Source state label.
    pub from: &'static str,
    /// Span name that fires the trigger.
    pub span_name: String,
    /// Destination state label.
    pub to: &'static str,
}

/// Explicit `(state, span name) -> trigger` lookup table.
pub struct TriggerTable<S> {
    entries: IndexMap<(S, String), Trigger<S>>,
}

impl<S: FsmState> fmt::Debug for TriggerTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.triggers()).finish()
    }
}

impl<S: FsmState> Default for TriggerTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FsmState> TriggerTable<S> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Registers a trigger; a later entry for the same key replaces the earlier one.
    #[must_use]
    pub fn on<F>(mut self, from: S, span_name: impl Into<String>, to: S, handler: F) -> Self
    where
        F: Fn(&Span) -> Result<Option<Command>, HandlerError> + Send + Sync + 'static,
    {
        self.entries.insert(
            (from, span_name.into()),
            Trigger {
                to,
                handler: Box::new(handler),
            },
        );
        self
    }

    /// Registers a trigger whose handler never emits a command.
    #[must_use]
    pub fn on_silent(self, from: S, span_name: impl Into<String>, to: S) -> Self {
        self.on(from, span_name, to, |_| Ok(None))
    }

    /// Looks up the trigger for a state and span name.
    #[must_use]
    pub fn get(&self, state: S, span_name: &str) -> Option<&Trigger<S>> {
        self.entries.get(&(state, span_name.to_owned()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enumerates every entry in registration order.
    pub fn triggers(&self) -> impl Iterator<Item = TriggerInfo> + '_ {
        self.entries.iter().map(|((from, name), trigger)| TriggerInfo {
            from: from.label(),
            span_name: name.clone(),
            to: trigger.to.label(),
        })
    }
}

/// Result of feeding one span to a [`StateMachine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<S> {
    /// No entry for `(state, name)`; state unchanged.
    Unmatched,
    /// Handler succeeded and the machine moved.
    Moved {
        /// Previous state.
        from: S,
        /// New state.
        to: S,
        /// Command returned by the handler.
        command: Option<Command>,
    },
    /// Handler failed; state unchanged.
    Failed(HandlerError),
}

/// Generic finite state machine driven by span names.
#[derive(Debug)]
pub struct StateMachine<S: FsmState> {
    state: S,
    table: TriggerTable<S>,
}

impl<S: FsmState> StateMachine<S> {
    /// Creates a machine in `initial`.
    #[must_use]
    pub const fn new(initial: S, table: TriggerTable<S>) -> Self {
        Self {
            state: initial,
            table,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> S {
        self.state
    }

    /// Trigger table.
    #[must_use]
    pub const fn table(&self) -> &TriggerTable<S> {
        &self.table
    }

    /// Whether the current state has an entry for `span_name`.
    #[must_use]
    pub fn accepts(&self, span_name: &str) -> bool {
        self.table.get(self.state, span_name).is_some()
    }

    /// Runs the matching handler and moves on success.
    pub fn apply(&mut self, span: &Span) -> Step<S> {
        let Some(trigger) = self.table.get(self.state, &span.name) else {
            return Step::Unmatched;
        };
        match (trigger.handler)(span) {
            Ok(command) => {
                let from = self.state;
                self.state = trigger.to;
                Step::Moved {
                    from,
                    to: trigger.to,
                    command,
                }
            }
            Err(err) => Step::Failed(err),
        }
    }

    /// Restores a persisted state label.
    pub fn restore(&mut self, label: &str) -> Result<(), HandlerError> {
        self.state = S::from_label(label).ok_or_else(|| HandlerError::UnknownState(label.into()))?;
        Ok(())
    }
}
