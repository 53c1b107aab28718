#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Append-only span log: the only coordination primitive shared by agents,
//! the window processor, and the decision/remediation engines.

/// Pattern alerts and alert fan-out.
pub mod alert;
/// Commands emitted by agent handlers.
pub mod command;
/// Cancelable cursors over a log.
pub mod cursor;
/// JSONL file-backed log.
pub mod file;
/// Log trait and in-memory implementation.
pub mod log;
/// Span data model.
pub mod span;
/// Component telemetry (JSON logs + span emission).
pub mod telemetry;

pub use alert::{AlertHub, AlertSink, PatternAlert, SeverityLevel};
pub use command::Command;
pub use cursor::Tail;
pub use file::FileSpanLog;
pub use log::{LogEntry, LogError, MemorySpanLog, Offset, SharedLog, SpanLog};
pub use span::{now_unix, Scalar, Span};
pub use telemetry::{ComponentTelemetry, ComponentTelemetryBuilder};
