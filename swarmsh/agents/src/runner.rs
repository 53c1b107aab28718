use std::sync::Arc;

use serde::Serialize;
use span_log::{
    AlertSink, Command, LogEntry, Offset, PatternAlert, SeverityLevel, SharedLog, Span, Tail,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    agent::{Agent, Outcome},
    registry::AgentRegistry,
    snapshot::{AgentSnapshot, SnapshotError, SnapshotStore},
};

/// Spans processed between snapshots while the cursor is still behind the head.
const SNAPSHOT_EVERY: u64 = 64;

/// Receiver of commands produced by agent handlers. Must not block.
pub trait CommandSink: Send + Sync {
    /// Hands off a command issued by `source`.
    fn submit(&self, source: &str, command: Command);
}

/// Counters for one runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Spans read from the cursor.
    pub processed: u64,
    /// Successful transitions.
    pub transitions: u64,
    /// Handler failures and validator rejections.
    pub failures: u64,
    /// Offset of the last span read.
    pub last_offset: Offset,
}

/// Drives one agent from its private cursor, strictly sequentially.
pub struct AgentRunner {
    agent: Box<dyn Agent>,
    log: SharedLog,
    commands: Arc<dyn CommandSink>,
    alerts: Arc<dyn AlertSink>,
    registry: AgentRegistry,
    snapshots: Option<SnapshotStore>,
    offset: Offset,
    summary: RunSummary,
    unsaved: u64,
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("agent", &self.agent)
            .field("offset", &self.offset)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl AgentRunner {
    /// Creates a runner starting before the first span.
    #[must_use]
    pub fn new(
        agent: Box<dyn Agent>,
        log: SharedLog,
        commands: Arc<dyn CommandSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            agent,
            log,
            commands,
            alerts,
            registry: AgentRegistry::new(),
            snapshots: None,
            offset: 0,
            summary: RunSummary::default(),
            unsaved: 0,
        }
    }

    /// Reports status into a shared registry.
    #[must_use]
    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Persists `{state, cursorOffset}` into `store`.
    #[must_use]
    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// The driven agent.
    #[must_use]
    pub fn agent(&self) -> &dyn Agent {
        self.agent.as_ref()
    }

    /// Offset of the last processed span.
    #[must_use]
    pub const fn offset(&self) -> Offset {
        self.offset
    }

    /// Counters so far.
    #[must_use]
    pub const fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Restores state and cursor from the snapshot store and registers the agent.
    ///
    /// A bad snapshot is discarded and the agent replays the log from the
    /// beginning. Bad means unreadable, naming an unknown state, or pointing
    /// past the log head.
    pub async fn resume(&mut self) {
        if let Some(snapshot) = self.load_snapshot().await {
            let head = self.log.head();
            if snapshot.cursor_offset > head {
                warn!(
                    agent = self.agent.id(),
                    offset = snapshot.cursor_offset,
                    head,
                    "snapshot cursor beyond log head, replaying log"
                );
            } else {
                match self.agent.restore(&snapshot.state) {
                    Ok(()) => {
                        self.offset = snapshot.cursor_offset;
                        info!(
                            agent = self.agent.id(),
                            state = %snapshot.state,
                            offset = snapshot.cursor_offset,
                            "agent resumed from snapshot"
                        );
                    }
                    Err(err) => warn!(
                        agent = self.agent.id(),
                        error = %err,
                        "discarding snapshot, replaying log"
                    ),
                }
            }
        }
        self.summary.last_offset = self.offset;
        self.registry.register(
            self.agent.id(),
            self.agent.kind(),
            self.agent.current_state(),
        );
    }

    async fn load_snapshot(&self) -> Option<AgentSnapshot> {
        let store = self.snapshots.as_ref()?;
        match store.load(self.agent.id()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    agent = self.agent.id(),
                    error = %err,
                    "unreadable snapshot, replaying log"
                );
                None
            }
        }
    }

    /// Processes everything currently in the log, then saves a snapshot.
    pub async fn catch_up(&mut self) -> Result<usize, SnapshotError> {
        let mut tail = Tail::new(Arc::clone(&self.log), self.offset);
        let mut count = 0;
        while let Some(entry) = tail.next().await {
            self.process(&entry).await;
            count += 1;
        }
        self.save_snapshot().await?;
        Ok(count)
    }

    /// Follows the log until `cancel` fires, then flushes the snapshot.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunSummary, SnapshotError> {
        self.resume().await;
        info!(
            agent = self.agent.id(),
            filter = self.agent.listen_filter(),
            offset = self.offset,
            "agent runner started"
        );
        let mut tail = Tail::follow(Arc::clone(&self.log), self.offset, cancel);
        while let Some(entry) = tail.next().await {
            self.process(&entry).await;
            let caught_up = entry.offset >= self.log.head();
            if caught_up || self.unsaved >= SNAPSHOT_EVERY {
                if let Err(err) = self.save_snapshot().await {
                    warn!(agent = self.agent.id(), error = %err, "snapshot save failed");
                }
            }
        }
        self.save_snapshot().await?;
        info!(
            agent = self.agent.id(),
            processed = self.summary.processed,
            transitions = self.summary.transitions,
            "agent runner stopped"
        );
        Ok(self.summary)
    }

    /// Feeds one entry to the agent and publishes the consequences.
    pub async fn process(&mut self, entry: &LogEntry) -> Outcome {
        self.offset = entry.offset;
        self.summary.processed += 1;
        self.summary.last_offset = entry.offset;
        self.unsaved += 1;

        let span = entry.span.as_ref();
        let outcome = self.agent.handle(span);
        match &outcome {
            Outcome::Ignored => {}
            Outcome::Transitioned { from, to, command } => {
                self.summary.transitions += 1;
                self.registry.record_transition(self.agent.id(), to);
                debug!(agent = self.agent.id(), from = *from, to = *to, trigger = %span.name, "transition");
                self.append_transition(entry, from, to).await;
                if let Some(command) = command {
                    let mut command = command.clone();
                    if command.trace_id.is_none() {
                        command.trace_id = Some(span.trace_id.clone());
                    }
                    self.commands.submit(self.agent.id(), command);
                }
            }
            Outcome::Rejected { violations } => {
                self.summary.failures += 1;
                self.registry.record_failure(self.agent.id());
                let alert = PatternAlert::new(
                    format!("agent:{}", self.agent.id()),
                    "semconv_violation",
                    1.0,
                    format!(
                        "{} rejected {}: {}",
                        self.agent.id(),
                        span.name,
                        violations.join("; ")
                    ),
                )
                .with_evidence([span.span_id.clone()])
                .with_level(SeverityLevel::Medium);
                self.alerts.raise(alert).await;
            }
            Outcome::Failed(err) => {
                self.summary.failures += 1;
                self.registry.record_failure(self.agent.id());
                let alert = PatternAlert::new(
                    format!("agent:{}", self.agent.id()),
                    "agent_error",
                    1.0,
                    format!("{} failed on {}: {err}", self.agent.id(), span.name),
                )
                .with_evidence([span.span_id.clone()])
                .with_level(SeverityLevel::High);
                self.alerts.raise(alert).await;
            }
        }
        if matches!(outcome, Outcome::Ignored) {
            self.registry.touch(self.agent.id());
        }
        outcome
    }

    async fn append_transition(&self, entry: &LogEntry, from: &str, to: &str) {
        let trigger = entry.span.as_ref();
        let span = Span::new("swarmsh.agent.transition")
            .in_trace(trigger.trace_id.clone())
            .with_attr("agent.name", self.agent.id())
            .with_attr("agent.kind", self.agent.kind())
            .with_attr("transition.from", from)
            .with_attr("transition.to", to)
            .with_attr("trigger.name", trigger.name.clone())
            .with_attr("trigger.span_id", trigger.span_id.clone())
            .with_attr(
                "trigger.offset",
                i64::try_from(entry.offset).unwrap_or(i64::MAX),
            );
        if let Err(err) = self.log.append(span).await {
            warn!(agent = self.agent.id(), error = %err, "failed to append transition span");
        }
    }

    async fn save_snapshot(&mut self) -> Result<(), SnapshotError> {
        let Some(store) = &self.snapshots else {
            return Ok(());
        };
        let snapshot = AgentSnapshot {
            state: self.agent.current_state().to_owned(),
            cursor_offset: self.offset,
        };
        store.save(self.agent.id(), &snapshot).await?;
        self.unsaved = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use span_log::{AlertHub, MemorySpanLog, SpanLog};
    use tempfile::tempdir;

    use super::*;
    use crate::builtin::{ping_agent, roberts_agent};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Command)>>,
    }

    impl CommandSink for Recorder {
        fn submit(&self, source: &str, command: Command) {
            self.seen.lock().push((source.to_owned(), command));
        }
    }

    async fn governance_log() -> SharedLog {
        let log = MemorySpanLog::shared();
        log.append(Span::new("swarmsh.roberts.open").with_attr("motion_id", "m1"))
            .await
            .unwrap();
        log.append(Span::new("swarmsh.roberts.bogus")).await.unwrap();
        log.append(
            Span::new("swarmsh.roberts.vote")
                .with_attr("motion_id", "m1")
                .with_attr("result", "passed"),
        )
        .await
        .unwrap();
        log
    }

    #[tokio::test]
    async fn catch_up_transitions_and_submits_commands() {
        let log = governance_log().await;
        let recorder = Arc::new(Recorder::default());
        let hub = Arc::new(AlertHub::new(8));
        let registry = AgentRegistry::new();
        let mut runner = AgentRunner::new(
            roberts_agent().boxed(),
            Arc::clone(&log),
            recorder.clone(),
            hub.clone(),
        )
        .with_registry(registry.clone());
        runner.resume().await;
        assert_eq!(runner.catch_up().await.unwrap(), 3);

        assert_eq!(runner.agent().current_state(), "closed");
        assert_eq!(runner.summary().transitions, 2);
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "roberts");
        assert_eq!(seen[0].1.target, "swarmsh.scrum.plan");

        let transitions: Vec<_> = log
            .read_from(3, 10)
            .into_iter()
            .filter(|entry| entry.span.name == "swarmsh.agent.transition")
            .collect();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[1].span.attr_str("transition.to"), Some("closed"));
        assert_eq!(registry.get("roberts").unwrap().state, "closed");
        assert!(hub.recent().is_empty());
    }

    #[tokio::test]
    async fn handler_failure_raises_agent_error_with_evidence() {
        let log = MemorySpanLog::shared();
        let offset = log.append(Span::new("swarmsh.roberts.open")).await.unwrap();
        let hub = Arc::new(AlertHub::new(8));
        let mut runner = AgentRunner::new(
            roberts_agent().boxed(),
            Arc::clone(&log),
            Arc::new(Recorder::default()),
            hub.clone(),
        );
        runner.catch_up().await.unwrap();
        assert_eq!(runner.agent().current_state(), "idle");
        let alerts = hub.of_kind("agent_error");
        assert_eq!(alerts.len(), 1);
        let span_id = log.read_from(offset - 1, 1)[0].span.span_id.clone();
        assert_eq!(alerts[0].evidence_span_ids, vec![span_id]);
    }

    #[tokio::test]
    async fn run_persists_snapshot_and_resumes() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let log = MemorySpanLog::shared();
        log.append(Span::new("swarmsh.ping.request")).await.unwrap();

        let cancel = CancellationToken::new();
        let runner = AgentRunner::new(
            ping_agent().boxed(),
            Arc::clone(&log),
            Arc::new(Recorder::default()),
            Arc::new(AlertHub::new(8)),
        )
        .with_snapshots(store.clone());
        let handle = tokio::spawn(runner.run(cancel.clone()));
        while log.head() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.transitions, 1);

        let snapshot = store.load("ping").await.unwrap().unwrap();
        assert_eq!(snapshot.state, "pinged");
        assert_eq!(snapshot.cursor_offset, 2);

        let mut resumed = AgentRunner::new(
            ping_agent().boxed(),
            Arc::clone(&log),
            Arc::new(Recorder::default()),
            Arc::new(AlertHub::new(8)),
        )
        .with_snapshots(store);
        resumed.resume().await;
        assert_eq!(resumed.agent().current_state(), "pinged");
        assert_eq!(resumed.catch_up().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_discarded_and_log_replayed() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        std::fs::write(store.path_for("roberts"), "{not json").unwrap();
        let log = governance_log().await;

        let cancel = CancellationToken::new();
        let recorder = Arc::new(Recorder::default());
        let runner = AgentRunner::new(
            roberts_agent().boxed(),
            Arc::clone(&log),
            recorder.clone(),
            Arc::new(AlertHub::new(8)),
        )
        .with_snapshots(store.clone());
        let handle = tokio::spawn(runner.run(cancel.clone()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.seen.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.transitions, 2);
        assert_eq!(store.load("roberts").await.unwrap().unwrap().state, "closed");
    }

    #[tokio::test]
    async fn snapshot_beyond_head_replays_from_start() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .save(
                "roberts",
                &AgentSnapshot {
                    state: "open".into(),
                    cursor_offset: 120,
                },
            )
            .await
            .unwrap();
        let log = governance_log().await;

        let mut runner = AgentRunner::new(
            roberts_agent().boxed(),
            Arc::clone(&log),
            Arc::new(Recorder::default()),
            Arc::new(AlertHub::new(8)),
        )
        .with_snapshots(store);
        runner.resume().await;
        assert_eq!(runner.offset(), 0);
        assert_eq!(runner.agent().current_state(), "idle");
        assert_eq!(runner.catch_up().await.unwrap(), 3);
        assert_eq!(runner.agent().current_state(), "closed");
    }
}
