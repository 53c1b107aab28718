use std::{fmt, sync::Arc};

use span_log::{Command, Span};

use crate::{
    machine::{FsmState, HandlerError, StateMachine, Step, TriggerInfo},
    validator::SpanValidator,
};

/// What an agent did with one span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Outside the listen filter or no trigger for the current state.
    Ignored,
    /// The agent moved between states.
    Transitioned {
        /// Previous state label.
        from: &'static str,
        /// New state label.
        to: &'static str,
        /// Follow-on command, if the handler produced one.
        command: Option<Command>,
    },
    /// The validator refused the span; no transition happened.
    Rejected {
        /// Violations reported by the validator.
        violations: Vec<String>,
    },
    /// The handler failed; no transition happened.
    Failed(HandlerError),
}

/// A span-driven agent.
pub trait Agent: Send + Sync + fmt::Debug {
    /// Unique agent id.
    fn id(&self) -> &str;

    /// Agent family (`roberts`, `scrum`, ...).
    fn kind(&self) -> &str;

    /// Span name prefix this agent listens to.
    fn listen_filter(&self) -> &str;

    /// Current state label.
    fn current_state(&self) -> &'static str;

    /// Feeds one span to the agent.
    fn handle(&mut self, span: &Span) -> Outcome;

    /// Restores a persisted state label.
    fn restore(&mut self, state: &str) -> Result<(), HandlerError>;

    /// Every `(state, span name) -> state` entry the agent knows.
    fn triggers(&self) -> Vec<TriggerInfo>;

    /// Whether `span` falls under the listen filter.
    fn interested_in(&self, span: &Span) -> bool {
        let filter = self.listen_filter();
        span.name
            .strip_prefix(filter)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    }
}

/// Agent built by composition over a [`StateMachine`].
pub struct FsmAgent<S: FsmState> {
    id: String,
    kind: String,
    filter: String,
    machine: StateMachine<S>,
    validator: Option<Arc<dyn SpanValidator>>,
}

impl<S: FsmState> fmt::Debug for FsmAgent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmAgent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.machine.state())
            .finish_non_exhaustive()
    }
}

impl<S: FsmState> FsmAgent<S> {
    /// Creates an agent; the id defaults to the kind.
    #[must_use]
    pub fn new(kind: impl Into<String>, filter: impl Into<String>, machine: StateMachine<S>) -> Self {
        let kind = kind.into();
        Self {
            id: kind.clone(),
            kind,
            filter: filter.into(),
            machine,
            validator: None,
        }
    }

    /// Overrides the agent id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Consults `validator` before every transition.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn SpanValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Typed current state.
    #[must_use]
    pub const fn state(&self) -> S {
        self.machine.state()
    }

    /// Boxes the agent for a runner.
    #[must_use]
    pub fn boxed(self) -> Box<dyn Agent> {
        Box::new(self)
    }
}

impl<S: FsmState> Agent for FsmAgent<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn listen_filter(&self) -> &str {
        &self.filter
    }

    fn current_state(&self) -> &'static str {
        self.machine.state().label()
    }

    fn handle(&mut self, span: &Span) -> Outcome {
        if !self.interested_in(span) || !self.machine.accepts(&span.name) {
            return Outcome::Ignored;
        }
        if let Some(validator) = &self.validator {
            let validation = validator.validate(span);
            if !validation.ok {
                return Outcome::Rejected {
                    violations: validation.violations,
                };
            }
        }
        match self.machine.apply(span) {
            Step::Unmatched => Outcome::Ignored,
            Step::Moved { from, to, command } => Outcome::Transitioned {
                from: from.label(),
                to: to.label(),
                command,
            },
            Step::Failed(err) => Outcome::Failed(err),
        }
    }

    fn restore(&mut self, state: &str) -> Result<(), HandlerError> {
        self.machine.restore(state)
    }

    fn triggers(&self) -> Vec<TriggerInfo> {
        self.machine.table().triggers().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builtin::ping_agent, validator::RequiredAttributes};

    #[test]
    fn filter_matches_whole_segments_only() {
        let agent = ping_agent();
        assert!(agent.interested_in(&Span::new("swarmsh.ping.request")));
        assert!(!agent.interested_in(&Span::new("swarmsh.pingx.request")));
        assert!(!agent.interested_in(&Span::new("swarmsh.roberts.open")));
    }

    #[test]
    fn validator_rejection_keeps_state() {
        let validator = RequiredAttributes::new().require("swarmsh.ping.request", ["source"]);
        let mut agent = ping_agent().with_validator(Arc::new(validator));
        let outcome = agent.handle(&Span::new("swarmsh.ping.request"));
        assert!(matches!(outcome, Outcome::Rejected { ref violations } if violations.len() == 1));
        assert_eq!(agent.current_state(), "idle");

        let outcome = agent.handle(&Span::new("swarmsh.ping.request").with_attr("source", "t"));
        assert!(matches!(outcome, Outcome::Transitioned { to: "pinged", .. }));
    }
}
