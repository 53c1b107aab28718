use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use span_log::{
    AlertSink, Command, ComponentTelemetry, LogError, Offset, PatternAlert, SeverityLevel,
    SharedLog, Span,
};
use swarmsh_agents::CommandSink;
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle, time::sleep};
use tokio_util::task::TaskTracker;

use crate::{
    collab::{Generator, WorkspaceProvider},
    exec::{self, ExecRecord, ExecSpec, ExecStatus, DEFAULT_TIMEOUT},
    route::{Route, RouteTable},
};

const MAX_GENERATED_CHARS: usize = 8 * 1024;

/// Errors raised while carrying out a command.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No route matches the target.
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    /// The resulting span was rejected or could not be stored.
    #[error(transparent)]
    Log(#[from] LogError),
    /// The external program exited unsuccessfully.
    #[error("`{program}` exited with {code:?}: {stderr}")]
    ExitStatus {
        /// Program name.
        program: String,
        /// Exit code, if any.
        code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },
    /// The external program did not finish in time.
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout {
        /// Program name.
        program: String,
        /// Deadline that expired.
        timeout: Duration,
    },
    /// The external program could not be started.
    #[error("`{program}` could not run: {reason}")]
    Spawn {
        /// Program name.
        program: String,
        /// OS error text.
        reason: String,
    },
    /// The workspace provider failed.
    #[error("workspace unavailable: {0}")]
    Workspace(String),
    /// The generation collaborator failed.
    #[error("generation failed: {0}")]
    Generation(String),
    /// The external program succeeded but its result span could not be stored.
    #[error("result of `{program}` not recorded: {source}")]
    Unrecorded {
        /// Program name.
        program: String,
        /// Final append failure.
        source: LogError,
    },
    /// A route needs a collaborator that was not configured.
    #[error("{0} collaborator not configured")]
    Unavailable(&'static str),
}

impl DispatchError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UnknownTarget(_) | Self::Unavailable(_) | Self::Unrecorded { .. } => false,
            Self::Log(err) => !matches!(err, LogError::MalformedSpan(_)),
            _ => true,
        }
    }
}

/// Exponential backoff between dispatch attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any delay.
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }
}

/// Successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReceipt {
    /// Command target.
    pub target: String,
    /// Route kind used (`span`, `external`, `generate`).
    pub route: &'static str,
    /// Attempts made.
    pub attempts: u32,
    /// Offset of the span appended for the command.
    pub offset: Option<Offset>,
    /// Process record for external routes.
    pub exec: Option<ExecRecord>,
}

/// Counters exposed for status queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Commands received.
    pub submitted: u64,
    /// Commands carried out.
    pub succeeded: u64,
    /// Commands escalated to an alert.
    pub failed: u64,
    /// Retries performed.
    pub retries: u64,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    log: SharedLog,
    routes: RouteTable,
    alerts: Option<Arc<dyn AlertSink>>,
    generator: Option<Arc<dyn Generator>>,
    workspaces: Option<Arc<dyn WorkspaceProvider>>,
    retry: RetryPolicy,
    timeout: Duration,
    telemetry: Option<ComponentTelemetry>,
}

impl DispatcherBuilder {
    /// Starts a builder appending to `log`, routing `swarmsh.*` to spans.
    #[must_use]
    pub fn new(log: SharedLog) -> Self {
        Self {
            log,
            routes: RouteTable::swarmsh_default(),
            alerts: None,
            generator: None,
            workspaces: None,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            telemetry: None,
        }
    }

    /// Replaces the route table.
    #[must_use]
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Sets the alert sink for escalated failures.
    #[must_use]
    pub fn alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Sets the generation collaborator.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets the workspace provider.
    #[must_use]
    pub fn workspaces(mut self, workspaces: Arc<dyn WorkspaceProvider>) -> Self {
        self.workspaces = Some(workspaces);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the default external call timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: ComponentTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Finalizes the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            inner: Arc::new(Inner {
                log: self.log,
                routes: self.routes,
                alerts: self.alerts,
                generator: self.generator,
                workspaces: self.workspaces,
                retry: self.retry,
                timeout: self.timeout,
                telemetry: self.telemetry,
                tasks: TaskTracker::new(),
                submitted: AtomicU64::new(0),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                retries: AtomicU64::new(0),
            }),
        }
    }
}

struct Inner {
    log: SharedLog,
    routes: RouteTable,
    alerts: Option<Arc<dyn AlertSink>>,
    generator: Option<Arc<dyn Generator>>,
    workspaces: Option<Arc<dyn WorkspaceProvider>>,
    retry: RetryPolicy,
    timeout: Duration,
    telemetry: Option<ComponentTelemetry>,
    tasks: TaskTracker,
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// Turns commands into spans, external invocations, or generations.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.inner.routes)
            .field("retry", &self.inner.retry)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Returns a builder.
    #[must_use]
    pub fn builder(log: SharedLog) -> DispatcherBuilder {
        DispatcherBuilder::new(log)
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            succeeded: self.inner.succeeded.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
        }
    }

    /// Fire-and-forget dispatch on its own tracked task.
    pub fn dispatch(
        &self,
        source: &str,
        command: Command,
    ) -> JoinHandle<Result<DispatchReceipt, DispatchError>> {
        let dispatcher = self.clone();
        let source = source.to_owned();
        self.inner
            .tasks
            .spawn(async move { dispatcher.dispatch_now(&source, &command).await })
    }

    /// Dispatch tasks still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Waits until every spawned dispatch, including ones still backing off,
    /// has finished.
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Dispatches with retry; a final failure is escalated to an alert.
    pub async fn dispatch_now(
        &self,
        source: &str,
        command: &Command,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.log(
            LogLevel::Debug,
            "dispatch.command.received",
            json!({ "target": command.target, "source": source }),
        );
        let result = self.dispatch_with_retry(source, command).await;
        match &result {
            Ok(receipt) => {
                self.inner.succeeded.fetch_add(1, Ordering::Relaxed);
                self.log(
                    LogLevel::Info,
                    "dispatch.command.completed",
                    json!({
                        "target": receipt.target,
                        "route": receipt.route,
                        "attempts": receipt.attempts,
                        "source": source,
                    }),
                );
            }
            Err(err) => {
                self.inner.failed.fetch_add(1, Ordering::Relaxed);
                self.log(
                    LogLevel::Error,
                    "dispatch.command.failed",
                    json!({ "target": command.target, "source": source, "error": err.to_string() }),
                );
                self.escalate(source, command, err).await;
            }
        }
        result
    }

    async fn dispatch_with_retry(
        &self,
        source: &str,
        command: &Command,
    ) -> Result<DispatchReceipt, DispatchError> {
        let route = self
            .inner
            .routes
            .resolve(&command.target)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownTarget(command.target.clone()))?;
        let max_attempts = self.inner.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(source, command, &route).await {
                Ok(mut receipt) => {
                    receipt.attempts = attempt;
                    return Ok(receipt);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.inner.retry.backoff(attempt);
                    tracing::warn!(
                        target_name = %command.target,
                        attempt,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "dispatch attempt failed, retrying"
                    );
                    self.inner.retries.fetch_add(1, Ordering::Relaxed);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        source: &str,
        command: &Command,
        route: &Route,
    ) -> Result<DispatchReceipt, DispatchError> {
        match route {
            Route::Span => {
                let offset = self.inner.log.append(command_span(source, command)).await?;
                Ok(receipt(command, "span", Some(offset), None))
            }
            Route::External {
                program,
                args,
                timeout_ms,
            } => {
                let cwd = self
                    .inner
                    .workspaces
                    .as_ref()
                    .map(|provider| provider.workspace_for(source))
                    .transpose()?;
                let spec = ExecSpec {
                    program: program.clone(),
                    args: args.iter().chain(&command.args).cloned().collect(),
                    cwd,
                    timeout: timeout_ms.map_or(self.inner.timeout, Duration::from_millis),
                };
                let record = exec::execute(&spec).await;
                match record.status {
                    ExecStatus::Success => {
                        let span = command_span(source, command)
                            .with_attr("dispatch.program", record.program.clone())
                            .with_attr(
                                "duration_ms",
                                i64::try_from(record.duration_ms).unwrap_or(i64::MAX),
                            )
                            .with_attr("exit_code", i64::from(record.exit_code.unwrap_or_default()));
                        let offset = self.append_result(span).await.map_err(|source| {
                            DispatchError::Unrecorded {
                                program: record.program.clone(),
                                source,
                            }
                        })?;
                        Ok(receipt(command, "external", Some(offset), Some(record)))
                    }
                    ExecStatus::Failed => Err(DispatchError::ExitStatus {
                        program: record.program,
                        code: record.exit_code,
                        stderr: record.stderr,
                    }),
                    ExecStatus::Timeout => Err(DispatchError::Timeout {
                        program: record.program,
                        timeout: spec.timeout,
                    }),
                    ExecStatus::Error => Err(DispatchError::Spawn {
                        program: record.program,
                        reason: record.error.unwrap_or_default(),
                    }),
                }
            }
            Route::Generate => {
                let generator = self
                    .inner
                    .generator
                    .as_ref()
                    .ok_or(DispatchError::Unavailable("generator"))?;
                let prompt = if command.args.is_empty() {
                    format!("{}: {}", command.target, command.rationale)
                } else {
                    format!(
                        "{}: {} ({})",
                        command.target,
                        command.rationale,
                        command.args.join(" ")
                    )
                };
                let mut text = generator.generate(&prompt).await?;
                if text.chars().count() > MAX_GENERATED_CHARS {
                    text = text.chars().take(MAX_GENERATED_CHARS).collect();
                }
                let span = command_span(source, command).with_attr("generation.text", text);
                let offset = self.inner.log.append(span).await?;
                Ok(receipt(command, "generate", Some(offset), None))
            }
        }
    }

    /// Appends the result of a side-effecting run, retrying only the append.
    async fn append_result(&self, span: Span) -> Result<Offset, LogError> {
        let max_attempts = self.inner.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.log.append(span.clone()).await {
                Ok(offset) => return Ok(offset),
                Err(err) if !matches!(err, LogError::MalformedSpan(_)) && attempt < max_attempts => {
                    let delay = self.inner.retry.backoff(attempt);
                    tracing::warn!(
                        span_name = %span.name,
                        attempt,
                        error = %err,
                        "result append failed, retrying"
                    );
                    self.inner.retries.fetch_add(1, Ordering::Relaxed);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn escalate(&self, source: &str, command: &Command, err: &DispatchError) {
        let Some(alerts) = &self.inner.alerts else {
            tracing::error!(target_name = %command.target, error = %err, "dispatch failed with no alert sink");
            return;
        };
        let level = if err.is_retryable() {
            SeverityLevel::High
        } else {
            SeverityLevel::Medium
        };
        let alert = PatternAlert::new(
            "dispatcher",
            "dispatch_failure",
            1.0,
            format!("{source} -> {}: {err}", command.target),
        )
        .with_level(level);
        alerts.raise(alert).await;
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(tel) = &self.inner.telemetry {
            tel.record(level, message, metadata);
        }
    }
}

impl CommandSink for Dispatcher {
    fn submit(&self, source: &str, command: Command) {
        if Handle::try_current().is_err() {
            tracing::error!(
                target_name = %command.target,
                source,
                "no async runtime available, command not dispatched"
            );
            self.inner.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(self.dispatch(source, command));
    }
}

fn receipt(
    command: &Command,
    route: &'static str,
    offset: Option<Offset>,
    exec: Option<ExecRecord>,
) -> DispatchReceipt {
    DispatchReceipt {
        target: command.target.clone(),
        route,
        attempts: 1,
        offset,
        exec,
    }
}

/// Span carrying a command: named after the target, attributes from the
/// parsed arguments plus rationale and issuing agent.
fn command_span(source: &str, command: &Command) -> Span {
    let mut span = Span::new(command.target.clone());
    if let Some(trace_id) = &command.trace_id {
        span = span.in_trace(trace_id.clone());
    }
    span.attributes.extend(command.parsed_args());
    span.with_attr("command.rationale", command.rationale.clone())
        .with_attr("command.source", source)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use span_log::{AlertHub, MemorySpanLog, Scalar, SpanLog};

    use super::*;

    struct FlakyGenerator {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Generator for FlakyGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, DispatchError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(DispatchError::Generation("model busy".into()));
            }
            Ok(format!("generated for {prompt}"))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(20), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn span_route_maps_args_to_attributes() {
        let log = MemorySpanLog::shared();
        let dispatcher = Dispatcher::builder(log.clone()).build();
        let command = Command::new("swarmsh.scrum.plan", "motion m1 passed")
            .flag("motion-id", "m1")
            .arg("--urgent")
            .in_trace("trace-1");
        let receipt = dispatcher
            .dispatch("roberts", command)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.route, "span");
        let span = log.read_from(0, 1).remove(0).span;
        assert_eq!(span.name, "swarmsh.scrum.plan");
        assert_eq!(span.trace_id, "trace-1");
        assert_eq!(span.attr_str("motion_id"), Some("m1"));
        assert_eq!(span.attr("urgent"), Some(&Scalar::Bool(true)));
        assert_eq!(span.attr_str("command.source"), Some("roberts"));
        assert_eq!(span.attr_str("command.rationale"), Some("motion m1 passed"));
    }

    #[tokio::test]
    async fn unknown_target_raises_alert_without_retry() {
        let log = MemorySpanLog::shared();
        let hub = Arc::new(AlertHub::new(8));
        let dispatcher = Dispatcher::builder(log.clone())
            .alerts(hub.clone())
            .retry(fast_retry())
            .build();
        let err = dispatcher
            .dispatch_now("scrum", &Command::new("elsewhere.ops.run", "r"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTarget(_)));
        assert_eq!(dispatcher.stats().retries, 0);
        assert_eq!(hub.of_kind("dispatch_failure").len(), 1);
    }

    #[tokio::test]
    async fn generation_is_retried_then_appended() {
        let log = MemorySpanLog::shared();
        let dispatcher = Dispatcher::builder(log.clone())
            .routes(RouteTable::swarmsh_default().route("swarmsh.generate", Route::Generate))
            .generator(Arc::new(FlakyGenerator {
                failures_left: AtomicU32::new(2),
            }))
            .retry(fast_retry())
            .build();
        let receipt = dispatcher
            .dispatch_now("lean", &Command::new("swarmsh.generate.summary", "summarize"))
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 3);
        let span = log.read_from(0, 1).remove(0).span;
        assert!(span
            .attr_str("generation.text")
            .unwrap()
            .contains("swarmsh.generate.summary"));
    }

    #[tokio::test]
    async fn exhausted_retries_escalate() {
        let log = MemorySpanLog::shared();
        let hub = Arc::new(AlertHub::new(8).with_log(log.clone()));
        let dispatcher = Dispatcher::builder(log.clone())
            .routes(RouteTable::swarmsh_default().route("swarmsh.generate", Route::Generate))
            .generator(Arc::new(FlakyGenerator {
                failures_left: AtomicU32::new(10),
            }))
            .alerts(hub.clone())
            .retry(fast_retry())
            .build();
        let err = dispatcher
            .dispatch_now("lean", &Command::new("swarmsh.generate.summary", "summarize"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Generation(_)));
        assert_eq!(dispatcher.stats().retries, 2);
        assert_eq!(dispatcher.stats().failed, 1);
        let alerts = hub.of_kind("dispatch_failure");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, SeverityLevel::High);
        assert_eq!(log.head(), 1, "only the alert span was appended");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_route_runs_in_agent_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let log = MemorySpanLog::shared();
        let dispatcher = Dispatcher::builder(log.clone())
            .routes(RouteTable::swarmsh_default().route(
                "swarmsh.ops",
                Route::External {
                    program: "touch".into(),
                    args: vec![],
                    timeout_ms: Some(5_000),
                },
            ))
            .workspaces(Arc::new(crate::collab::DirWorkspaceProvider::new(tmp.path())))
            .build();
        let receipt = dispatcher
            .dispatch_now("scrum", &Command::new("swarmsh.ops.mark", "mark").arg("done.flag"))
            .await
            .unwrap();
        assert_eq!(receipt.route, "external");
        assert!(tmp.path().join("scrum").join("done.flag").exists());
        let span = log.read_from(0, 1).remove(0).span;
        assert_eq!(span.attr_str("dispatch.program"), Some("touch"));
    }

    struct StallingLog {
        inner: MemorySpanLog,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl SpanLog for StallingLog {
        async fn append(&self, span: Span) -> Result<Offset, LogError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(LogError::Io(std::io::Error::other("disk busy")));
            }
            self.inner.append(span).await
        }

        fn read_from(&self, after: Offset, limit: usize) -> Vec<span_log::LogEntry> {
            self.inner.read_from(after, limit)
        }

        fn head(&self) -> Offset {
            self.inner.head()
        }

        fn watch(&self) -> tokio::sync::watch::Receiver<Offset> {
            self.inner.watch()
        }
    }

    #[tokio::test]
    async fn drain_waits_for_dispatches_in_backoff() {
        let log = MemorySpanLog::shared();
        let dispatcher = Dispatcher::builder(log.clone())
            .routes(RouteTable::swarmsh_default().route("swarmsh.generate", Route::Generate))
            .generator(Arc::new(FlakyGenerator {
                failures_left: AtomicU32::new(1),
            }))
            .retry(RetryPolicy {
                initial_backoff: Duration::from_millis(200),
                ..RetryPolicy::default()
            })
            .build();
        dispatcher.submit("lean", Command::new("swarmsh.generate.summary", "summarize"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.in_flight(), 1);
        assert_eq!(log.head(), 0);

        dispatcher.drain().await;
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(log.head(), 1);
        assert_eq!(dispatcher.stats().succeeded, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_run_is_not_repeated_when_only_the_append_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let log: SharedLog = Arc::new(StallingLog {
            inner: MemorySpanLog::new(),
            failures_left: AtomicU32::new(1),
        });
        let dispatcher = Dispatcher::builder(Arc::clone(&log))
            .routes(RouteTable::swarmsh_default().route(
                "swarmsh.ops",
                Route::External {
                    program: "sh".into(),
                    args: vec!["-c".into(), "echo run >> runs.txt".into()],
                    timeout_ms: Some(5_000),
                },
            ))
            .workspaces(Arc::new(crate::collab::DirWorkspaceProvider::new(tmp.path())))
            .retry(fast_retry())
            .build();
        let receipt = dispatcher
            .dispatch_now("scrum", &Command::new("swarmsh.ops.count", "count"))
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 1);
        assert_eq!(dispatcher.stats().retries, 1);
        let runs = std::fs::read_to_string(tmp.path().join("scrum").join("runs.txt")).unwrap();
        assert_eq!(runs.lines().count(), 1);
        assert_eq!(log.head(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unrecorded_external_result_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let log: SharedLog = Arc::new(StallingLog {
            inner: MemorySpanLog::new(),
            failures_left: AtomicU32::new(10),
        });
        let dispatcher = Dispatcher::builder(Arc::clone(&log))
            .routes(RouteTable::swarmsh_default().route(
                "swarmsh.ops",
                Route::External {
                    program: "sh".into(),
                    args: vec!["-c".into(), "echo run >> runs.txt".into()],
                    timeout_ms: Some(5_000),
                },
            ))
            .workspaces(Arc::new(crate::collab::DirWorkspaceProvider::new(tmp.path())))
            .retry(fast_retry())
            .build();
        let err = dispatcher
            .dispatch_now("scrum", &Command::new("swarmsh.ops.count", "count"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unrecorded { .. }));
        let runs = std::fs::read_to_string(tmp.path().join("scrum").join("runs.txt")).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }
}
