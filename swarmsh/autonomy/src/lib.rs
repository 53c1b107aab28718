#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Decision engine: reads the latest window snapshot and the agent registry,
//! ranks rule-based decisions, and hands the best few to remediation.

/// Cycle driver, execution policy and status.
pub mod engine;
/// Append-only decision lifecycle records.
pub mod ledger;
/// System metrics assembled for a cycle.
pub mod metrics;
/// Decision rules.
pub mod rules;

pub use engine::{
    CycleReport, DecisionEngine, DecisionEngineBuilder, DecisionError, DecisionPhase,
    EngineStatus, ExecutedDecision, ExecutionPolicy, ExecutionReport,
};
pub use ledger::{DecisionLedger, DecisionStage, LedgerEntry, RejectionReason};
pub use metrics::SystemMetrics;
pub use rules::{decide, rank, Decision, DecisionKind, DecisionThresholds};
