#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Span-driven agents: each agent is a finite state machine that reacts to
//! spans under its namespace and may emit a follow-on command.

/// Agent trait and the generic state-machine-backed agent.
pub mod agent;
/// Roberts Rules, Scrum, Lean Six Sigma and Ping agents.
pub mod builtin;
/// Trigger tables and the generic state machine.
pub mod machine;
/// Registry of running agents.
pub mod registry;
/// Task driving one agent from its log cursor.
pub mod runner;
/// Persisted `{state, cursorOffset}` snapshots.
pub mod snapshot;
/// Span validation seam consulted before transitions.
pub mod validator;

pub use agent::{Agent, FsmAgent, Outcome};
pub use builtin::{lean_agent, ping_agent, roberts_agent, scrum_agent, BuiltinKind};
pub use machine::{FsmState, HandlerError, StateMachine, Step, Trigger, TriggerInfo, TriggerTable};
pub use registry::{AgentRegistry, AgentStatus};
pub use runner::{AgentRunner, CommandSink, RunSummary};
pub use snapshot::{AgentSnapshot, SnapshotError, SnapshotStore};
pub use validator::{RequiredAttributes, SpanValidator, Validation};
