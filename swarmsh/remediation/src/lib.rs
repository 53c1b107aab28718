#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Remediation engine: maps decisions and alerts onto a fixed action
//! vocabulary, applies them under a global concurrency cap with per-target
//! serialization, and keeps enough state to roll each one back.

/// Action vocabulary, requests and records.
pub mod action;
/// Side-effect boundary and the simulated fleet.
pub mod actuator;
/// Bounded executor with rollback and dry-run.
pub mod engine;
/// Audit trail.
pub mod journal;
/// Decision and alert to action mapping.
pub mod mapping;

pub use action::{
    ActionId, ActionKind, ActionOrigin, ActionRecord, ActionRequest, ActionStatus, RollbackToken,
};
pub use actuator::{Actuator, InMemoryActuator, TargetState};
pub use engine::{
    RemediationEngine, RemediationEngineBuilder, RemediationError, DEFAULT_MAX_CONCURRENT,
};
pub use journal::{ActionEvent, ActionJournal};
pub use mapping::{action_for_alert, action_for_decision, request_for_alert};
