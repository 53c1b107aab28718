use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use span_log::{Command, Scalar, Span};

use crate::{
    agent::{Agent, FsmAgent},
    machine::{FsmState, HandlerError, StateMachine, TriggerTable},
};

/// Defect rate (percent) above which a sprint review opens a Lean project.
pub const DEFECT_RATE_THRESHOLD: f64 = 3.0;

/// Built-in agent families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    /// Roberts Rules governance.
    Roberts,
    /// Scrum sprint cadence.
    Scrum,
    /// Lean Six Sigma DMAIC.
    Lean,
    /// Liveness ping.
    Ping,
}

impl BuiltinKind {
    /// Every built-in kind.
    pub const ALL: [Self; 4] = [Self::Roberts, Self::Scrum, Self::Lean, Self::Ping];

    /// Builds a fresh agent of this kind under `id`.
    #[must_use]
    pub fn build(self, id: &str) -> Box<dyn Agent> {
        match self {
            Self::Roberts => roberts_agent().with_id(id).boxed(),
            Self::Scrum => scrum_agent().with_id(id).boxed(),
            Self::Lean => lean_agent().with_id(id).boxed(),
            Self::Ping => ping_agent().with_id(id).boxed(),
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Roberts => "roberts",
            Self::Scrum => "scrum",
            Self::Lean => "lean",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BuiltinKind {
    type Err = HandlerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label() == value)
            .ok_or_else(|| HandlerError::Failed(format!("unknown agent kind `{value}`")))
    }
}

fn required(span: &Span, key: &str) -> Result<String, HandlerError> {
    match span.attr(key) {
        Some(Scalar::Str(value)) if value.trim().is_empty() => {
            Err(HandlerError::invalid(key, "empty value"))
        }
        Some(value) => Ok(value.to_string()),
        None => Err(HandlerError::MissingAttribute(key.into())),
    }
}

fn follow_up(span: &Span, target: &str, rationale: impl Into<String>) -> Command {
    Command::new(target, rationale).in_trace(span.trace_id.clone())
}

/// Roberts Rules states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RobertsState {
    /// No motion on the floor.
    Idle,
    /// Motion opened and under debate.
    MotionOpen,
    /// Vote called.
    Voting,
    /// Motion decided.
    Closed,
}

impl FsmState for RobertsState {
    const ALL: &'static [Self] = &[Self::Idle, Self::MotionOpen, Self::Voting, Self::Closed];

    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MotionOpen => "open",
            Self::Voting => "voting",
            Self::Closed => "closed",
        }
    }
}

fn record_vote(span: &Span) -> Result<Option<Command>, HandlerError> {
    let motion_id = required(span, "motion_id")?;
    let result = span.attr_str("result").unwrap_or("failed");
    if result != "passed" {
        return Ok(None);
    }
    let mut command = follow_up(
        span,
        "swarmsh.scrum.plan",
        format!("motion {motion_id} passed"),
    )
    .flag("motion-id", motion_id);
    if let Some(sprint) = span.attr("sprint_number") {
        command = command.flag("sprint-number", sprint.to_string());
    }
    Ok(Some(command))
}

/// Governance agent: `idle -> open -> (voting) -> closed`; a passed vote
/// starts sprint planning.
#[must_use]
pub fn roberts_agent() -> FsmAgent<RobertsState> {
    use RobertsState::{Closed, Idle, MotionOpen, Voting};
    let open = |span: &Span| required(span, "motion_id").map(|_| None);
    let table = TriggerTable::new()
        .on(Idle, "swarmsh.roberts.open", MotionOpen, open)
        .on(Closed, "swarmsh.roberts.open", MotionOpen, open)
        .on(MotionOpen, "swarmsh.roberts.call_vote", Voting, |span| {
            required(span, "motion_id").map(|_| None)
        })
        .on(MotionOpen, "swarmsh.roberts.vote", Closed, record_vote)
        .on(Voting, "swarmsh.roberts.vote", Closed, record_vote);
    FsmAgent::new("roberts", "swarmsh.roberts", StateMachine::new(Idle, table))
}

/// Scrum states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrumState {
    /// Sprint being planned.
    Planning,
    /// Sprint running.
    Executing,
    /// Sprint under review.
    Review,
}

impl FsmState for ScrumState {
    const ALL: &'static [Self] = &[Self::Planning, Self::Executing, Self::Review];

    fn label(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Review => "review",
        }
    }
}

fn has_blockers(span: &Span) -> bool {
    match span.attr("blockers") {
        Some(Scalar::Str(value)) => !value.trim().is_empty(),
        Some(Scalar::Bool(value)) => *value,
        Some(other) => other.as_f64().is_some_and(|count| count > 0.0),
        None => false,
    }
}

fn plan_sprint(span: &Span) -> Result<Option<Command>, HandlerError> {
    let mut command = follow_up(span, "swarmsh.scrum.backlog_populate", "sprint planned");
    if let Some(sprint) = span.attr("sprint_number") {
        command = command.flag("sprint-number", sprint.to_string());
    }
    Ok(Some(command))
}

/// Scrum agent: `planning -> executing -> review -> planning`.
#[must_use]
pub fn scrum_agent() -> FsmAgent<ScrumState> {
    use ScrumState::{Executing, Planning, Review};
    let table = TriggerTable::new()
        .on(Planning, "swarmsh.scrum.plan", Executing, plan_sprint)
        .on(Review, "swarmsh.scrum.plan", Executing, plan_sprint)
        .on(Executing, "swarmsh.scrum.daily", Executing, |span| {
            if !has_blockers(span) {
                return Ok(None);
            }
            let blockers = span
                .attr("blockers")
                .map(ToString::to_string)
                .unwrap_or_default();
            Ok(Some(
                follow_up(span, "swarmsh.scrum.escalate_blockers", "daily standup blockers")
                    .flag("blockers", blockers),
            ))
        })
        .on(Executing, "swarmsh.scrum.review", Review, |span| {
            let Some(scalar) = span.attr("defect_rate") else {
                return Ok(None);
            };
            let defect_rate = scalar
                .as_f64()
                .ok_or_else(|| HandlerError::invalid("defect_rate", "not a number"))?;
            if defect_rate <= DEFECT_RATE_THRESHOLD {
                return Ok(None);
            }
            let sprint = span
                .attr("sprint_number")
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            Ok(Some(
                follow_up(
                    span,
                    "swarmsh.lean.define",
                    format!("defect rate {defect_rate}% above {DEFECT_RATE_THRESHOLD}%"),
                )
                .flag("project-id", format!("defect-sprint{sprint}"))
                .flag("defect-rate", defect_rate.to_string()),
            ))
        })
        .on_silent(Review, "swarmsh.scrum.retro", Planning);
    FsmAgent::new("scrum", "swarmsh.scrum", StateMachine::new(Planning, table))
}

/// Lean Six Sigma DMAIC phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeanState {
    /// Define the problem.
    Define,
    /// Measure the baseline.
    Measure,
    /// Analyze root causes.
    Analyze,
    /// Improve the process.
    Improve,
    /// Control the gains.
    Control,
}

impl FsmState for LeanState {
    const ALL: &'static [Self] = &[
        Self::Define,
        Self::Measure,
        Self::Analyze,
        Self::Improve,
        Self::Control,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Define => "define",
            Self::Measure => "measure",
            Self::Analyze => "analyze",
            Self::Improve => "improve",
            Self::Control => "control",
        }
    }
}

/// Lean agent: one DMAIC phase per span; a validated control phase asks
/// governance to adopt the change.
#[must_use]
pub fn lean_agent() -> FsmAgent<LeanState> {
    use LeanState::{Analyze, Control, Define, Improve, Measure};
    let table = TriggerTable::new()
        .on_silent(Define, "swarmsh.lean.define", Measure)
        .on_silent(Measure, "swarmsh.lean.measure", Analyze)
        .on_silent(Analyze, "swarmsh.lean.analyze", Improve)
        .on_silent(Improve, "swarmsh.lean.improve", Control)
        .on(Control, "swarmsh.lean.control", Define, |span| {
            let validated = span
                .attr("validated")
                .and_then(Scalar::as_bool)
                .unwrap_or(false);
            if !validated {
                return Ok(None);
            }
            let project = required(span, "project_id")?;
            Ok(Some(
                follow_up(
                    span,
                    "swarmsh.roberts.open",
                    format!("adopt controls for {project}"),
                )
                .flag("motion-id", format!("lean-{project}")),
            ))
        });
    FsmAgent::new("lean", "swarmsh.lean", StateMachine::new(Define, table))
}

/// Ping states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PingState {
    /// Waiting for a ping.
    Idle,
    /// Answered at least one ping.
    Pinged,
}

impl FsmState for PingState {
    const ALL: &'static [Self] = &[Self::Idle, Self::Pinged];

    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pinged => "pinged",
        }
    }
}

/// Liveness agent answering `swarmsh.ping.request` with a pong command.
#[must_use]
pub fn ping_agent() -> FsmAgent<PingState> {
    use PingState::{Idle, Pinged};
    let pong = |span: &Span| {
        Ok(Some(
            follow_up(span, "swarmsh.ping.pong", "ping answered").flag("ping-id", span.span_id.clone()),
        ))
    };
    let table = TriggerTable::new()
        .on(Idle, "swarmsh.ping.request", Pinged, pong)
        .on(Pinged, "swarmsh.ping.request", Pinged, pong);
    FsmAgent::new("ping", "swarmsh.ping", StateMachine::new(Idle, table))
}
