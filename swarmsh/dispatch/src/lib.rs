#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Command dispatch: resolves agent commands into synthetic spans, external
//! process invocations, or generation requests, with bounded retry.

/// Generation and workspace collaborators.
pub mod collab;
/// Dispatcher, retry policy and errors.
pub mod dispatcher;
/// External process execution.
pub mod exec;
/// Target-prefix route table.
pub mod route;

pub use collab::{DirWorkspaceProvider, Generator, WorkspaceProvider};
pub use dispatcher::{
    DispatchError, DispatchReceipt, DispatchStats, Dispatcher, DispatcherBuilder, RetryPolicy,
};
pub use exec::{ExecRecord, ExecSpec, ExecStatus};
pub use route::{Route, RouteTable};
