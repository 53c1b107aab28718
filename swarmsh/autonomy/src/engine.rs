use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use span_log::{ComponentTelemetry, SharedLog, Span};
use swarmsh_agents::AgentRegistry;
use swarmsh_remediation::{
    action_for_decision, ActionOrigin, ActionRecord, ActionRequest, ActionStatus,
    RemediationEngine, RemediationError,
};
use swarmsh_window::{HealthBand, SnapshotBoard};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    ledger::{DecisionLedger, DecisionStage, LedgerEntry, RejectionReason},
    metrics::SystemMetrics,
    rules::{self, Decision, DecisionThresholds},
};

/// Errors raised by the decision engine.
#[derive(Debug, Error)]
pub enum DecisionError {
    /// The window processor has not published a snapshot yet.
    #[error("no metric snapshot published yet")]
    NoSnapshot,
    /// Remediation refused the action.
    #[error(transparent)]
    Remediation(#[from] RemediationError),
}

/// Step of the decision cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPhase {
    /// Between cycles.
    Idle,
    /// Building system metrics.
    Analyzing,
    /// Running the rules.
    Deciding,
    /// Handing decisions to remediation.
    Executing,
    /// Writing the cycle report.
    Reporting,
}

impl fmt::Display for DecisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Deciding => "deciding",
            Self::Executing => "executing",
            Self::Reporting => "reporting",
        };
        f.write_str(label)
    }
}

/// Which candidates run in a cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Maximum decisions executed per cycle.
    pub max_count: usize,
    /// Decisions below this confidence are skipped.
    pub min_confidence: f64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_count: 3,
            min_confidence: 0.6,
        }
    }
}

impl ExecutionPolicy {
    /// Splits candidates into the ones to run and the rejected ones, in
    /// descending (priority, confidence) order.
    #[must_use]
    pub fn select(
        &self,
        decisions: &[Arc<Decision>],
    ) -> (Vec<Arc<Decision>>, Vec<(Arc<Decision>, RejectionReason)>) {
        let mut ranked: Vec<Arc<Decision>> = decisions.to_vec();
        ranked.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        let mut selected = Vec::new();
        let mut rejected = Vec::new();
        for decision in ranked {
            if decision.confidence < self.min_confidence {
                rejected.push((decision, RejectionReason::BelowConfidence));
            } else if selected.len() >= self.max_count {
                rejected.push((decision, RejectionReason::CycleCap));
            } else if action_for_decision(decision.kind.label()).is_none() {
                rejected.push((decision, RejectionReason::Unmapped));
            } else {
                selected.push(decision);
            }
        }
        (selected, rejected)
    }
}

/// Outcome of one executed decision.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedDecision {
    /// The decision.
    pub decision: Arc<Decision>,
    /// Resulting action record, when remediation accepted it.
    pub action: Option<ActionRecord>,
    /// Failure detail, when the action failed or was refused.
    pub error: Option<String>,
}

impl ExecutedDecision {
    /// Whether the action went through.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of an execution pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Decisions handed to remediation, in execution order.
    pub executed: Vec<ExecutedDecision>,
    /// Decisions dropped by the policy.
    pub rejected: Vec<(Arc<Decision>, RejectionReason)>,
}

/// Summary of a full analyze/decide/execute/report cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Cycle identifier, also the trace id of its spans.
    pub cycle_id: Uuid,
    /// Metrics the cycle acted on.
    pub metrics: Option<SystemMetrics>,
    /// Every candidate generated.
    pub decisions: Vec<Arc<Decision>>,
    /// Execution outcome.
    pub execution: ExecutionReport,
    /// Why the cycle did nothing, if it did nothing.
    pub skipped: Option<String>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// Point-in-time status for operators.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Current phase.
    pub phase: DecisionPhase,
    /// Band of the last analyzed metrics.
    pub health: Option<HealthBand>,
    /// Last analyzed metrics.
    pub metrics: Option<SystemMetrics>,
    /// Decisions not yet executed.
    pub pending: Vec<Arc<Decision>>,
    /// Decisions whose execution failed.
    pub failed: Vec<LedgerEntry>,
    /// Remediation action history.
    pub actions: Vec<ActionRecord>,
    /// Completed cycles.
    pub cycles: u64,
}

/// Builder for [`DecisionEngine`].
pub struct DecisionEngineBuilder {
    board: SnapshotBoard,
    registry: AgentRegistry,
    remediation: RemediationEngine,
    thresholds: DecisionThresholds,
    policy: ExecutionPolicy,
    target: String,
    active_within: Duration,
    cycle_interval: StdDuration,
    log: Option<SharedLog>,
    telemetry: Option<ComponentTelemetry>,
}

impl DecisionEngineBuilder {
    /// Starts a builder from its collaborators.
    #[must_use]
    pub fn new(
        board: SnapshotBoard,
        registry: AgentRegistry,
        remediation: RemediationEngine,
    ) -> Self {
        Self {
            board,
            registry,
            remediation,
            thresholds: DecisionThresholds::default(),
            policy: ExecutionPolicy::default(),
            target: "swarm".into(),
            active_within: Duration::minutes(5),
            cycle_interval: StdDuration::from_secs(30),
            log: None,
            telemetry: None,
        }
    }

    /// Overrides the rule thresholds.
    #[must_use]
    pub fn thresholds(mut self, thresholds: DecisionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Overrides the execution policy.
    #[must_use]
    pub const fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Target handed to remediation.
    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// How recently a registered agent must have been seen to count as active.
    #[must_use]
    pub const fn active_within(mut self, within: Duration) -> Self {
        self.active_within = within;
        self
    }

    /// Period of the run loop.
    #[must_use]
    pub const fn cycle_interval(mut self, every: StdDuration) -> Self {
        self.cycle_interval = every;
        self
    }

    /// Log receiving `swarmsh.decision.*` spans.
    #[must_use]
    pub fn log(mut self, log: SharedLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: ComponentTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Finalizes the engine.
    #[must_use]
    pub fn build(self) -> DecisionEngine {
        DecisionEngine {
            inner: Arc::new(Inner {
                board: self.board,
                registry: self.registry,
                remediation: self.remediation,
                thresholds: self.thresholds,
                policy: self.policy,
                target: self.target,
                active_within: self.active_within,
                cycle_interval: self.cycle_interval,
                log: self.log,
                telemetry: self.telemetry,
                ledger: DecisionLedger::new(),
                phase: Mutex::new(DecisionPhase::Idle),
                last_metrics: RwLock::new(None),
                cycle_lock: tokio::sync::Mutex::new(()),
                cycles: AtomicU64::new(0),
            }),
        }
    }
}

struct Inner {
    board: SnapshotBoard,
    registry: AgentRegistry,
    remediation: RemediationEngine,
    thresholds: DecisionThresholds,
    policy: ExecutionPolicy,
    target: String,
    active_within: Duration,
    cycle_interval: StdDuration,
    log: Option<SharedLog>,
    telemetry: Option<ComponentTelemetry>,
    ledger: DecisionLedger,
    phase: Mutex<DecisionPhase>,
    last_metrics: RwLock<Option<SystemMetrics>>,
    cycle_lock: tokio::sync::Mutex<()>,
    cycles: AtomicU64,
}

/// Health-driven decision loop. Only one instance should run against a log.
#[derive(Clone)]
pub struct DecisionEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("phase", &self.phase())
            .field("policy", &self.inner.policy)
            .field("target", &self.inner.target)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Returns a builder.
    #[must_use]
    pub fn builder(
        board: SnapshotBoard,
        registry: AgentRegistry,
        remediation: RemediationEngine,
    ) -> DecisionEngineBuilder {
        DecisionEngineBuilder::new(board, registry, remediation)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> DecisionPhase {
        *self.inner.phase.lock()
    }

    /// Decision ledger.
    #[must_use]
    pub fn ledger(&self) -> DecisionLedger {
        self.inner.ledger.clone()
    }

    /// Builds system metrics from the latest snapshot and the agent registry.
    pub fn analyze(&self) -> Result<SystemMetrics, DecisionError> {
        let snapshot = self.inner.board.latest().ok_or(DecisionError::NoSnapshot)?;
        let metrics =
            SystemMetrics::combine(&snapshot, &self.inner.registry, self.inner.active_within);
        *self.inner.last_metrics.write() = Some(metrics.clone());
        Ok(metrics)
    }

    /// Ranked candidates for `metrics`.
    #[must_use]
    pub fn decide(&self, metrics: &SystemMetrics) -> Vec<Decision> {
        rules::decide(metrics, &self.inner.thresholds)
    }

    /// Applies the execution policy and runs the selected decisions concurrently.
    pub async fn execute(&self, decisions: Vec<Decision>) -> ExecutionReport {
        let cycle_id = Uuid::new_v4();
        let decisions: Vec<Arc<Decision>> = decisions.into_iter().map(Arc::new).collect();
        for decision in &decisions {
            self.inner
                .ledger
                .record(cycle_id, decision, DecisionStage::Proposed);
        }
        self.execute_in(cycle_id, &decisions).await
    }

    /// Runs one full cycle.
    #[instrument(skip(self), fields(cycle = tracing::field::Empty))]
    pub async fn run_cycle(&self) -> CycleReport {
        let _leader = self.inner.cycle_lock.lock().await;
        let cycle_id = Uuid::new_v4();
        tracing::Span::current().record("cycle", tracing::field::display(cycle_id));

        self.set_phase(DecisionPhase::Analyzing);
        let metrics = match self.analyze() {
            Ok(metrics) => metrics,
            Err(err) => {
                self.set_phase(DecisionPhase::Idle);
                tracing::debug!(error = %err, "decision cycle skipped");
                return CycleReport {
                    cycle_id,
                    metrics: None,
                    decisions: Vec::new(),
                    execution: ExecutionReport::default(),
                    skipped: Some(err.to_string()),
                    completed_at: Utc::now(),
                };
            }
        };

        self.set_phase(DecisionPhase::Deciding);
        let decisions: Vec<Arc<Decision>> =
            self.decide(&metrics).into_iter().map(Arc::new).collect();
        for decision in &decisions {
            self.inner
                .ledger
                .record(cycle_id, decision, DecisionStage::Proposed);
        }

        self.set_phase(DecisionPhase::Executing);
        let execution = self.execute_in(cycle_id, &decisions).await;

        self.set_phase(DecisionPhase::Reporting);
        let report = CycleReport {
            cycle_id,
            metrics: Some(metrics),
            decisions,
            execution,
            skipped: None,
            completed_at: Utc::now(),
        };
        self.report(&report).await;
        self.inner.cycles.fetch_add(1, Ordering::Relaxed);
        self.set_phase(DecisionPhase::Idle);
        report
    }

    /// Operator view: phase, health, pending and failed decisions, action history.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let metrics = self.inner.last_metrics.read().clone();
        EngineStatus {
            phase: self.phase(),
            health: metrics.as_ref().map(|metrics| metrics.band),
            metrics,
            pending: self.inner.ledger.pending(),
            failed: self.inner.ledger.failed(),
            actions: self.inner.remediation.records(),
            cycles: self.inner.cycles.load(Ordering::Relaxed),
        }
    }

    /// Runs a cycle every `cycle_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.inner.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval = ?self.inner.cycle_interval, "decision engine started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        tracing::info!(
            cycles = self.inner.cycles.load(Ordering::Relaxed),
            "decision engine stopped"
        );
    }

    async fn execute_in(&self, cycle_id: Uuid, decisions: &[Arc<Decision>]) -> ExecutionReport {
        let (selected, rejected) = self.inner.policy.select(decisions);
        for (decision, reason) in &rejected {
            self.inner.ledger.record(
                cycle_id,
                decision,
                DecisionStage::Rejected { reason: *reason },
            );
        }
        let mut executed = Vec::with_capacity(selected.len());
        for decision in selected {
            executed.push(self.apply(cycle_id, decision).await);
        }
        ExecutionReport { executed, rejected }
    }

    async fn apply(&self, cycle_id: Uuid, decision: Arc<Decision>) -> ExecutedDecision {
        let ledger = &self.inner.ledger;
        ledger.record(cycle_id, &decision, DecisionStage::Executing);
        let Some(kind) = action_for_decision(decision.kind.label()) else {
            let error = format!("no action for {}", decision.kind);
            ledger.record(
                cycle_id,
                &decision,
                DecisionStage::Failed {
                    error: error.clone(),
                },
            );
            return ExecutedDecision {
                decision,
                action: None,
                error: Some(error),
            };
        };
        let request = ActionRequest::new(kind, &self.inner.target, decision.description.clone())
            .with_origin(ActionOrigin::Decision(decision.id));
        let outcome = match self.inner.remediation.submit(request).await {
            Ok(record) => match &record.status {
                ActionStatus::Failed(reason) => {
                    let error = reason.clone();
                    ledger.record(
                        cycle_id,
                        &decision,
                        DecisionStage::Failed {
                            error: error.clone(),
                        },
                    );
                    ExecutedDecision {
                        decision,
                        action: Some(record),
                        error: Some(error),
                    }
                }
                status => {
                    ledger.record(
                        cycle_id,
                        &decision,
                        DecisionStage::Executed {
                            action_id: record.id,
                            status: status.label().to_owned(),
                        },
                    );
                    ExecutedDecision {
                        decision,
                        action: Some(record),
                        error: None,
                    }
                }
            },
            Err(err) => {
                let error = DecisionError::from(err).to_string();
                ledger.record(
                    cycle_id,
                    &decision,
                    DecisionStage::Failed {
                        error: error.clone(),
                    },
                );
                ExecutedDecision {
                    decision,
                    action: None,
                    error: Some(error),
                }
            }
        };
        self.decision_span(cycle_id, &outcome).await;
        outcome
    }

    async fn decision_span(&self, cycle_id: Uuid, outcome: &ExecutedDecision) {
        let Some(log) = &self.inner.log else {
            return;
        };
        let decision = &outcome.decision;
        let mut span = Span::new(format!("swarmsh.decision.{}", decision.kind))
            .in_trace(cycle_id.simple().to_string())
            .with_attr("decision.id", decision.id.to_string())
            .with_attr("decision.priority", i64::from(decision.priority))
            .with_attr("decision.confidence", decision.confidence)
            .with_attr("decision.description", decision.description.clone())
            .with_attr("decision.succeeded", outcome.succeeded());
        if let Some(action) = &outcome.action {
            span = span
                .with_attr("action.id", action.id.to_string())
                .with_attr("action.status", action.status.label());
        }
        if let Some(error) = &outcome.error {
            span = span.with_attr("decision.error", error.clone());
        }
        if let Err(err) = log.append(span).await {
            tracing::error!(error = %err, "failed to append decision span");
        }
    }

    async fn report(&self, report: &CycleReport) {
        let executed = report.execution.executed.len();
        let failed = report
            .execution
            .executed
            .iter()
            .filter(|outcome| !outcome.succeeded())
            .count();
        let (health, band) = report
            .metrics
            .as_ref()
            .map_or((0.0, "unknown"), |metrics| {
                (metrics.health_score, metrics.band.label())
            });
        tracing::info!(
            health,
            band,
            generated = report.decisions.len(),
            executed,
            failed,
            "decision cycle completed"
        );
        if let Some(tel) = &self.inner.telemetry {
            tel.record(
                LogLevel::Info,
                "autonomy.cycle.completed",
                json!({
                    "cycle_id": report.cycle_id,
                    "health_score": health,
                    "band": band,
                    "generated": report.decisions.len(),
                    "executed": executed,
                    "failed": failed,
                }),
            );
        }
        if let Some(log) = &self.inner.log {
            let span = Span::new("swarmsh.decision.cycle")
                .in_trace(report.cycle_id.simple().to_string())
                .with_attr("health.score", health)
                .with_attr("health.band", band)
                .with_attr("decisions.generated", count(report.decisions.len()))
                .with_attr("decisions.executed", count(executed))
                .with_attr("decisions.failed", count(failed))
                .with_attr("decisions.rejected", count(report.execution.rejected.len()));
            if let Err(err) = log.append(span).await {
                tracing::error!(error = %err, "failed to append cycle span");
            }
        }
    }

    fn set_phase(&self, phase: DecisionPhase) {
        *self.inner.phase.lock() = phase;
    }
}

fn count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use span_log::{MemorySpanLog, SpanLog};
    use swarmsh_remediation::{ActionKind, InMemoryActuator};
    use swarmsh_window::MetricSnapshot;

    use super::*;
    use crate::rules::DecisionKind;

    fn decision(kind: DecisionKind, priority: u8, confidence: f64) -> Decision {
        Decision {
            id: Uuid::new_v4(),
            kind,
            description: format!("{kind} test"),
            priority,
            confidence,
            parameters: IndexMap::new(),
            created_at: Utc::now(),
        }
    }

    fn snapshot(completion: f64, agents: usize, queue: u64, error_rate: f64) -> MetricSnapshot {
        let health = swarmsh_window::health_score(completion, agents, queue, 40);
        MetricSnapshot {
            taken_at: 0.0,
            window_secs: 60.0,
            span_count: 100,
            event_rate: 1.0,
            category_counts: IndexMap::new(),
            error_count: 0,
            error_rate,
            error_categories: IndexMap::new(),
            error_span_ids: Vec::new(),
            mean_latency_ms: None,
            completion_rate: completion,
            active_agents: agents,
            queue_size: queue,
            telemetry_volume: 40,
            health_score: health,
            band: HealthBand::from_score(health),
        }
    }

    fn engine(fleet: &InMemoryActuator, board: &SnapshotBoard) -> DecisionEngine {
        let remediation = RemediationEngine::builder(Arc::new(fleet.clone())).build();
        DecisionEngine::builder(board.clone(), AgentRegistry::new(), remediation).build()
    }

    #[test]
    fn policy_caps_count_and_confidence() {
        let decisions: Vec<Arc<Decision>> = vec![
            decision(DecisionKind::Optimize, 4, 0.9),
            decision(DecisionKind::ScaleUp, 7, 0.55),
            decision(DecisionKind::RestartService, 9, 0.8),
            decision(DecisionKind::CoordinationImprove, 6, 0.7),
            decision(DecisionKind::HealthCheck, 8, 0.65),
            decision(DecisionKind::TelemetryEnhance, 1, 0.99),
        ]
        .into_iter()
        .map(Arc::new)
        .collect();
        let (selected, rejected) = ExecutionPolicy::default().select(&decisions);
        let kinds: Vec<DecisionKind> = selected.iter().map(|decision| decision.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DecisionKind::RestartService,
                DecisionKind::HealthCheck,
                DecisionKind::CoordinationImprove
            ]
        );
        assert!(selected.iter().all(|decision| decision.confidence >= 0.6));
        assert!(rejected
            .iter()
            .any(|(decision, reason)| decision.kind == DecisionKind::ScaleUp
                && *reason == RejectionReason::BelowConfidence));
        assert_eq!(
            rejected
                .iter()
                .filter(|(_, reason)| *reason == RejectionReason::CycleCap)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn cycle_without_snapshot_is_skipped() {
        let board = SnapshotBoard::default();
        let engine = engine(&InMemoryActuator::default(), &board);
        let report = engine.run_cycle().await;
        assert!(report.skipped.is_some());
        assert_eq!(engine.phase(), DecisionPhase::Idle);
        assert_eq!(engine.status().cycles, 0);
    }

    #[tokio::test]
    async fn cycle_executes_and_reports() {
        let log = MemorySpanLog::shared();
        let board = SnapshotBoard::default();
        board.publish(snapshot(0.9, 3, 0, 0.15));
        let fleet = InMemoryActuator::default();
        let remediation = RemediationEngine::builder(Arc::new(fleet.clone())).build();
        let engine = DecisionEngine::builder(board, AgentRegistry::new(), remediation)
            .log(Arc::clone(&log))
            .build();

        let report = engine.run_cycle().await;
        assert_eq!(report.decisions[0].kind, DecisionKind::RestartService);
        assert_eq!(report.execution.executed.len(), 1);
        assert!(report.execution.executed[0].succeeded());
        assert_eq!(fleet.state("swarm").unwrap().restarts, 1);

        let names: Vec<String> = log
            .read_from(0, 10)
            .iter()
            .map(|entry| entry.span.name.clone())
            .collect();
        assert_eq!(
            names,
            vec!["swarmsh.decision.restart_service", "swarmsh.decision.cycle"]
        );

        let status = engine.status();
        assert_eq!(status.cycles, 1);
        assert_eq!(status.actions.len(), 1);
        assert!(status.pending.is_empty());
        assert_eq!(status.health, Some(HealthBand::Healthy));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let board = SnapshotBoard::default();
        let fleet = InMemoryActuator::default();
        fleet.fail_on("broken");
        let remediation = RemediationEngine::builder(Arc::new(fleet.clone())).build();
        let engine = DecisionEngine::builder(board, AgentRegistry::new(), remediation)
            .target("broken")
            .build();
        let report = engine
            .execute(vec![
                decision(DecisionKind::RestartService, 9, 0.9),
                decision(DecisionKind::HealthCheck, 8, 0.9),
            ])
            .await;
        assert_eq!(report.executed.len(), 2);
        assert!(report.executed.iter().all(|outcome| !outcome.succeeded()));
        assert_eq!(engine.status().failed.len(), 2);
        assert_eq!(engine.status().actions.len(), 2);
    }

    #[tokio::test]
    async fn selected_decisions_run_one_after_another_in_rank_order() {
        let board = SnapshotBoard::default();
        let fleet = InMemoryActuator::default().with_latency(std::time::Duration::from_millis(5));
        let remediation = RemediationEngine::builder(Arc::new(fleet)).build();
        let journal = remediation.journal();
        let engine = DecisionEngine::builder(board, AgentRegistry::new(), remediation).build();
        let report = engine
            .execute(vec![
                decision(DecisionKind::Optimize, 4, 0.9),
                decision(DecisionKind::RestartService, 9, 0.8),
                decision(DecisionKind::HealthCheck, 7, 0.9),
            ])
            .await;
        let kinds: Vec<DecisionKind> = report
            .executed
            .iter()
            .map(|outcome| outcome.decision.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                DecisionKind::RestartService,
                DecisionKind::HealthCheck,
                DecisionKind::Optimize
            ]
        );

        let trail: Vec<(ActionKind, &str)> = journal
            .snapshot()
            .iter()
            .map(|event| (event.kind, event.status.label()))
            .collect();
        let mut expected = Vec::new();
        for kind in [
            ActionKind::RestartService,
            ActionKind::HealthCheck,
            ActionKind::ClearCache,
        ] {
            expected.extend([(kind, "pending"), (kind, "running"), (kind, "succeeded")]);
        }
        assert_eq!(trail, expected);
    }
}
