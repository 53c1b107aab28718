#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Coordinator runtime: loads the TOML configuration and runs the span log,
//! agents, dispatcher, window processor, remediation and decision engines as
//! one process.

/// TOML configuration with per-section defaults.
pub mod config;
/// Component wiring and task supervision.
pub mod runtime;

pub use config::{
    AgentSettings, CoordinatorConfig, DecisionSettings, DispatchSettings, LogSettings,
    RemediationSettings, RetrySettings, RouteSettings, TelemetrySettings, WindowSettings,
};
pub use runtime::{AgentRun, Coordinator, CoordinatorStatus, RunReport};
