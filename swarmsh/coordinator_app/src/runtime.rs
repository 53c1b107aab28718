use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use span_log::{
    AlertHub, ComponentTelemetry, FileSpanLog, MemorySpanLog, Offset, PatternAlert, SharedLog,
};
use swarmsh_agents::{AgentRegistry, AgentRunner, AgentStatus, RunSummary, SnapshotStore};
use swarmsh_autonomy::{DecisionEngine, EngineStatus};
use swarmsh_dispatch::{DirWorkspaceProvider, DispatchStats, Dispatcher};
use swarmsh_remediation::{InMemoryActuator, RemediationEngine};
use swarmsh_window::{DetectorRegistry, SnapshotBoard, WindowProcessor};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CoordinatorConfig;

/// Final state of one agent runner.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    /// Agent id.
    pub id: String,
    /// Counters, when the runner stopped cleanly.
    pub summary: Option<RunSummary>,
    /// Failure detail otherwise.
    pub error: Option<String>,
}

/// What a coordinator run did before shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Per-agent outcome.
    pub agents: Vec<AgentRun>,
    /// Dispatcher counters.
    pub dispatch: DispatchStats,
    /// Completed decision cycles.
    pub decision_cycles: u64,
    /// Remediation actions recorded.
    pub actions: usize,
    /// Offset of the last span in the log.
    pub log_head: Offset,
}

/// Operator view across every component.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    /// Decision engine phase, health, pending and failed decisions, action history.
    pub engine: EngineStatus,
    /// Registered agents.
    pub agents: Vec<AgentStatus>,
    /// Dispatcher counters.
    pub dispatch: DispatchStats,
    /// Retained alerts, oldest first.
    pub alerts: Vec<PatternAlert>,
    /// Offset of the last span in the log.
    pub log_head: Offset,
}

/// Wires the span log, agents, dispatcher, window processor and both engines,
/// and runs one task per component until cancelled.
pub struct Coordinator {
    config: CoordinatorConfig,
    log: SharedLog,
    file_log: Option<Arc<FileSpanLog>>,
    alerts: AlertHub,
    registry: AgentRegistry,
    dispatcher: Dispatcher,
    window: Arc<WindowProcessor>,
    actuator: Arc<InMemoryActuator>,
    remediation: RemediationEngine,
    decisions: DecisionEngine,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("agents", &self.config.agents.len())
            .field("log_head", &self.log.head())
            .field("dry_run", &self.remediation.is_dry_run())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Opens the configured log (file-backed or in-memory) and assembles every component.
    pub async fn bootstrap(config: CoordinatorConfig) -> Result<Self> {
        match config.log.path.clone() {
            Some(path) => {
                let file = Arc::new(
                    FileSpanLog::open(&path)
                        .await
                        .with_context(|| format!("opening span log {}", path.display()))?,
                );
                let log: SharedLog = file.clone();
                Self::assemble(config, log, Some(file))
            }
            None => Self::assemble(config, MemorySpanLog::shared(), None),
        }
    }

    /// Assembles every component around an existing log.
    pub fn with_log(config: CoordinatorConfig, log: SharedLog) -> Result<Self> {
        Self::assemble(config, log, None)
    }

    fn assemble(
        config: CoordinatorConfig,
        log: SharedLog,
        file_log: Option<Arc<FileSpanLog>>,
    ) -> Result<Self> {
        let alerts = AlertHub::new(config.telemetry.alert_backlog).with_log(Arc::clone(&log));
        let registry = AgentRegistry::new();

        let mut dispatcher = Dispatcher::builder(Arc::clone(&log))
            .routes(config.dispatch.route_table())
            .alerts(Arc::new(alerts.clone()))
            .retry(config.dispatch.retry.to_policy())
            .timeout(std::time::Duration::from_millis(config.dispatch.timeout_ms))
            .telemetry(component_telemetry(&config, &log, "dispatch")?);
        if let Some(root) = &config.dispatch.workspace_root {
            dispatcher = dispatcher.workspaces(Arc::new(DirWorkspaceProvider::new(root)));
        }
        let dispatcher = dispatcher.build();

        let board = SnapshotBoard::default();
        let window = WindowProcessor::new(
            Arc::clone(&log),
            config.window.to_config(),
            DetectorRegistry::with_defaults(&config.detectors),
            board.clone(),
            Arc::new(alerts.clone()),
        )
        .with_telemetry(component_telemetry(&config, &log, "window")?);

        let actuator = Arc::new(InMemoryActuator::new(
            config.remediation.initial_agents,
            config.remediation.min_agents,
            config.remediation.max_agents,
        ));
        let remediation = RemediationEngine::builder(actuator.clone())
            .max_concurrent(config.remediation.max_concurrent)
            .dry_run(config.remediation.dry_run)
            .log(Arc::clone(&log))
            .telemetry(component_telemetry(&config, &log, "remediation")?)
            .build();

        let decisions = DecisionEngine::builder(board, registry.clone(), remediation.clone())
            .thresholds(config.decision.thresholds.clone())
            .policy(config.decision.policy)
            .target(config.decision.target.clone())
            .active_within(chrono::Duration::seconds(config.decision.active_within_secs))
            .cycle_interval(std::time::Duration::from_secs(
                config.decision.cycle_interval_secs,
            ))
            .log(Arc::clone(&log))
            .telemetry(component_telemetry(&config, &log, "decision")?)
            .build();

        Ok(Self {
            config,
            log,
            file_log,
            alerts,
            registry,
            dispatcher,
            window: Arc::new(window),
            actuator,
            remediation,
            decisions,
            cancel: CancellationToken::new(),
        })
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The span log.
    #[must_use]
    pub fn log(&self) -> SharedLog {
        Arc::clone(&self.log)
    }

    /// Alert hub shared by agents, dispatcher and window.
    #[must_use]
    pub const fn alerts(&self) -> &AlertHub {
        &self.alerts
    }

    /// Registry of running agents.
    #[must_use]
    pub const fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Command dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Window processor.
    #[must_use]
    pub fn window(&self) -> &WindowProcessor {
        &self.window
    }

    /// Managed target state.
    #[must_use]
    pub const fn actuator(&self) -> &Arc<InMemoryActuator> {
        &self.actuator
    }

    /// Remediation engine.
    #[must_use]
    pub const fn remediation(&self) -> &RemediationEngine {
        &self.remediation
    }

    /// Decision engine.
    #[must_use]
    pub const fn decisions(&self) -> &DecisionEngine {
        &self.decisions
    }

    /// Token that stops [`Coordinator::run`] when cancelled.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Operator view across every component.
    #[must_use]
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            engine: self.decisions.status(),
            agents: self.registry.snapshot(),
            dispatch: self.dispatcher.stats(),
            alerts: self.alerts.recent(),
            log_head: self.log.head(),
        }
    }

    /// Spawns one task per agent plus the window, remediation and decision
    /// loops, then waits for cancellation and drains them.
    pub async fn run(&self) -> Result<RunReport> {
        let cancel = self.cancel.clone();
        let agents: Vec<JoinHandle<AgentRun>> = self
            .config
            .agents
            .iter()
            .map(|settings| {
                let mut runner = AgentRunner::new(
                    settings.kind.build(&settings.id),
                    Arc::clone(&self.log),
                    Arc::new(self.dispatcher.clone()),
                    Arc::new(self.alerts.clone()),
                )
                .with_registry(self.registry.clone());
                if let Some(dir) = &self.config.log.snapshot_dir {
                    runner = runner.with_snapshots(SnapshotStore::new(dir));
                }
                let id = settings.id.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    match runner.run(cancel).await {
                        Ok(summary) => AgentRun {
                            id,
                            summary: Some(summary),
                            error: None,
                        },
                        Err(err) => AgentRun {
                            id,
                            summary: None,
                            error: Some(err.to_string()),
                        },
                    }
                })
            })
            .collect();

        let window = {
            let window = Arc::clone(&self.window);
            let cancel = cancel.clone();
            tokio::spawn(async move { window.run(cancel).await })
        };
        let remediation = {
            let engine = self.remediation.clone();
            let receiver = self.alerts.subscribe();
            let level = self.config.remediation.alert_min_level;
            let target = self.config.decision.target.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run_alerts(receiver, level, target, cancel).await })
        };
        let decisions = {
            let engine = self.decisions.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(cancel).await })
        };
        info!(
            agents = agents.len(),
            dry_run = self.remediation.is_dry_run(),
            "coordinator started"
        );

        cancel.cancelled().await;

        let mut runs = Vec::with_capacity(agents.len());
        for joined in join_all(agents).await {
            match joined {
                Ok(run) => {
                    if let Some(err) = &run.error {
                        warn!(agent = %run.id, error = %err, "agent runner failed");
                    }
                    runs.push(run);
                }
                Err(err) => warn!(error = %err, "agent task panicked"),
            }
        }
        if self.dispatcher.in_flight() > 0 {
            info!(
                pending = self.dispatcher.in_flight(),
                "waiting for in-flight dispatches"
            );
        }
        self.dispatcher.drain().await;
        for (component, joined) in [
            ("window", window.await),
            ("remediation", remediation.await),
            ("decision", decisions.await),
        ] {
            if let Err(err) = joined {
                warn!(component, error = %err, "component task panicked");
            }
        }
        self.remediation.drain().await;
        if let Some(file) = &self.file_log {
            file.flush().await.context("flushing span log")?;
        }

        let report = RunReport {
            agents: runs,
            dispatch: self.dispatcher.stats(),
            decision_cycles: self.decisions.status().cycles,
            actions: self.remediation.records().len(),
            log_head: self.log.head(),
        };
        info!(
            log_head = report.log_head,
            cycles = report.decision_cycles,
            "coordinator stopped"
        );
        Ok(report)
    }
}

fn component_telemetry(
    config: &CoordinatorConfig,
    log: &SharedLog,
    component: &str,
) -> Result<ComponentTelemetry> {
    let mut builder = ComponentTelemetry::builder(format!("swarmsh.{component}"));
    if let Some(dir) = &config.telemetry.log_dir {
        builder = builder.log_path(dir.join(format!("{component}.log")));
    }
    if config.telemetry.emit_spans {
        builder = builder.span_log(Arc::clone(log));
    }
    builder
        .build()
        .with_context(|| format!("building {component} telemetry"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use span_log::{Command, Span, SpanLog};
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn run_stops_on_cancel_and_reports_agents() {
        let coordinator =
            Coordinator::with_log(CoordinatorConfig::default(), MemorySpanLog::shared()).unwrap();
        let cancel = coordinator.cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let report = coordinator.run().await.unwrap();
        assert_eq!(report.agents.len(), 4);
        assert!(report.agents.iter().all(|run| run.error.is_none()));
    }

    #[tokio::test]
    async fn bootstrap_opens_file_log_and_telemetry() {
        let dir = tempdir().unwrap();
        let raw = "[log]\npath = \"spans.jsonl\"\n[telemetry]\nlog_dir = \"logs\"\n";
        let config = CoordinatorConfig::parse(raw, dir.path()).unwrap();
        let coordinator = Coordinator::bootstrap(config).await.unwrap();
        coordinator
            .log()
            .append(Span::new("swarmsh.ping.request"))
            .await
            .unwrap();
        coordinator.window().tick().await;
        assert!(dir.path().join("spans.jsonl").exists());
        assert!(dir.path().join("logs").join("window.log").exists());
        assert!(coordinator.status().log_head >= 2);
    }

    #[tokio::test]
    async fn dry_run_is_carried_to_remediation() {
        let config = CoordinatorConfig::parse("[remediation]\ndry_run = true", ".").unwrap();
        let coordinator = Coordinator::with_log(config, MemorySpanLog::shared()).unwrap();
        assert!(coordinator.remediation().is_dry_run());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_waits_for_dispatch_in_backoff() {
        let dir = tempdir().unwrap();
        let raw = r#"
            [dispatch]
            workspace_root = "work"

            [dispatch.retry]
            initial_backoff_ms = 300

            [[dispatch.routes]]
            prefix = "ops.flaky"
            kind = "external"
            program = "sh"
            args = ["-c", "test -e marker || { touch marker; exit 1; }"]

            [[agents]]
            id = "ping"
            kind = "ping"
        "#;
        let config = CoordinatorConfig::parse(raw, dir.path()).unwrap();
        let log = MemorySpanLog::shared();
        let coordinator = Arc::new(Coordinator::with_log(config, Arc::clone(&log)).unwrap());
        let running = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run().await })
        };

        drop(
            coordinator
                .dispatcher()
                .dispatch("ping", Command::new("ops.flaky.run", "retry after first failure")),
        );
        let marker = dir.path().join("work").join("ping").join("marker");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !marker.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        coordinator.shutdown();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.dispatch.succeeded, 1);
        assert_eq!(report.dispatch.retries, 1);
        assert!(log
            .read_from(0, usize::MAX)
            .iter()
            .any(|entry| entry.span.name == "ops.flaky.run"));
    }
}
