use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use shared_logging::LogLevel;
use span_log::{ComponentTelemetry, PatternAlert, SeverityLevel, SharedLog, Span};
use thiserror::Error;
use tokio::sync::{
    broadcast, Mutex as TargetLock, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    action::{ActionId, ActionOrigin, ActionRecord, ActionRequest, ActionStatus, RollbackToken},
    actuator::Actuator,
    journal::{ActionEvent, ActionJournal},
    mapping,
};

/// Default number of actions allowed in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Errors surfaced by the remediation engine.
#[derive(Debug, Error)]
pub enum RemediationError {
    /// No record with that id.
    #[error("unknown action {0}")]
    UnknownAction(ActionId),
    /// The action is not in a state that can be inverted.
    #[error("action {id} cannot be rolled back from status {status}")]
    NotRollbackable {
        /// Action id.
        id: ActionId,
        /// Status at the time of the request.
        status: ActionStatus,
    },
    /// The actuator rejected the call.
    #[error("actuator failed on `{target}`: {reason}")]
    Actuator {
        /// Target.
        target: String,
        /// Failure detail.
        reason: String,
    },
    /// Unrecognized action label.
    #[error("unknown action kind `{0}`")]
    UnknownKind(String),
    /// The engine was shut down.
    #[error("remediation engine closed")]
    Closed,
}

/// Builder for [`RemediationEngine`].
pub struct RemediationEngineBuilder {
    actuator: Arc<dyn Actuator>,
    max_concurrent: usize,
    dry_run: bool,
    log: Option<SharedLog>,
    telemetry: Option<ComponentTelemetry>,
}

impl RemediationEngineBuilder {
    /// Starts a builder around `actuator`.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            actuator,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            dry_run: false,
            log: None,
            telemetry: None,
        }
    }

    /// Global in-flight cap.
    #[must_use]
    pub const fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Runs the pipeline without calling the actuator.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Log receiving `swarmsh.remediation.*` spans.
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
    pub fn build(self) -> RemediationEngine {
        let max_concurrent = self.max_concurrent.max(1);
        RemediationEngine {
            inner: Arc::new(Inner {
                actuator: self.actuator,
                permits: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                dry_run: self.dry_run,
                log: self.log,
                telemetry: self.telemetry,
                targets: Mutex::new(HashMap::new()),
                records: RwLock::new(IndexMap::new()),
                journal: ActionJournal::new(),
                tasks: TaskTracker::new(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }
}

struct Inner {
    actuator: Arc<dyn Actuator>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    dry_run: bool,
    log: Option<SharedLog>,
    telemetry: Option<ComponentTelemetry>,
    targets: Mutex<HashMap<String, Arc<TargetLock<()>>>>,
    records: RwLock<IndexMap<ActionId, ActionRecord>>,
    journal: ActionJournal,
    tasks: TaskTracker,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Applies bounded, per-target serialized, reversible actions.
#[derive(Clone)]
pub struct RemediationEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RemediationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationEngine")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("dry_run", &self.inner.dry_run)
            .field("actions", &self.inner.records.read().len())
            .finish_non_exhaustive()
    }
}

/// Releases a slot and the target on drop.
struct Slot<'a> {
    engine: &'a Inner,
    _target: OwnedMutexGuard<()>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.engine.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemediationEngine {
    /// Returns a builder.
    #[must_use]
    pub fn builder(actuator: Arc<dyn Actuator>) -> RemediationEngineBuilder {
        RemediationEngineBuilder::new(actuator)
    }

    /// Whether side effects are skipped.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.inner.dry_run
    }

    /// Audit trail.
    #[must_use]
    pub fn journal(&self) -> ActionJournal {
        self.inner.journal.clone()
    }

    /// Every record, in submission order.
    #[must_use]
    pub fn records(&self) -> Vec<ActionRecord> {
        self.inner.records.read().values().cloned().collect()
    }

    /// One record.
    #[must_use]
    pub fn record(&self, id: ActionId) -> Option<ActionRecord> {
        self.inner.records.read().get(&id).cloned()
    }

    /// Actions currently holding a concurrency slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Runs `request` to completion. Waits for earlier actions on the same
    /// target and for a free slot. Actuator failures are recorded on the
    /// returned record, not returned as errors.
    pub async fn submit(&self, request: ActionRequest) -> Result<ActionRecord, RemediationError> {
        let record = ActionRecord::pending(request);
        let id = record.id;
        self.inner.records.write().insert(id, record.clone());
        self.record_event(&record, None);
        self.log(
            LogLevel::Debug,
            "remediation.action.accepted",
            json!({ "action_id": id, "kind": record.request.kind, "target": record.request.target }),
        );

        let slot = self.acquire(&record.request.target).await?;
        self.transition(id, ActionStatus::Running, None, None);

        let (status, rollback) = if self.inner.dry_run {
            (ActionStatus::DryRun, None)
        } else {
            match self.inner.actuator.apply(&record.request).await {
                Ok(token) => (ActionStatus::Succeeded, Some(token)),
                Err(err) => (ActionStatus::Failed(err.to_string()), None),
            }
        };
        drop(slot);

        let record = self
            .transition(id, status, rollback, None)
            .ok_or(RemediationError::UnknownAction(id))?;
        match &record.status {
            ActionStatus::Failed(reason) => {
                tracing::warn!(action = %id, kind = %record.request.kind, target = %record.request.target, %reason, "remediation failed");
                self.log(
                    LogLevel::Error,
                    "remediation.action.failed",
                    json!({ "action_id": id, "kind": record.request.kind, "error": reason }),
                );
            }
            status => {
                tracing::info!(action = %id, kind = %record.request.kind, target = %record.request.target, %status, "remediation applied");
                self.log(
                    LogLevel::Info,
                    "remediation.action.completed",
                    json!({ "action_id": id, "kind": record.request.kind, "status": status.label() }),
                );
            }
        }
        self.append_span(&record, record.request.kind.label()).await;
        Ok(record)
    }

    /// Reapplies the inverse of a succeeded action and marks it rolled back.
    pub async fn rollback(&self, id: ActionId) -> Result<ActionRecord, RemediationError> {
        let record = self.record(id).ok_or(RemediationError::UnknownAction(id))?;
        let token = match (&record.status, record.rollback) {
            (ActionStatus::Succeeded, Some(token)) => token,
            (status, _) => {
                return Err(RemediationError::NotRollbackable {
                    id,
                    status: status.clone(),
                })
            }
        };

        let slot = self.acquire(&record.request.target).await?;
        let current = self.record(id).ok_or(RemediationError::UnknownAction(id))?;
        if current.status != ActionStatus::Succeeded {
            return Err(RemediationError::NotRollbackable {
                id,
                status: current.status,
            });
        }
        let reverted = if token == RollbackToken::Noop {
            Ok(())
        } else {
            self.inner.actuator.revert(&record.request.target, &token).await
        };
        drop(slot);
        reverted?;

        let record = self
            .transition(id, ActionStatus::RolledBack, Some(token), Some("rollback".into()))
            .ok_or(RemediationError::UnknownAction(id))?;
        tracing::info!(action = %id, kind = %record.request.kind, target = %record.request.target, "remediation rolled back");
        self.append_span(&record, "rollback").await;
        Ok(record)
    }

    /// Remediates `alert` against `target` when its kind has a remedy.
    pub async fn remediate_alert(
        &self,
        alert: &PatternAlert,
        target: &str,
    ) -> Option<Result<ActionRecord, RemediationError>> {
        let request = mapping::request_for_alert(alert, target)?;
        Some(self.submit(request).await)
    }

    /// Remediates every alert at or above `min_level` until `cancel` fires.
    pub async fn run_alerts(
        &self,
        mut alerts: broadcast::Receiver<PatternAlert>,
        min_level: SeverityLevel,
        target: String,
        cancel: CancellationToken,
    ) {
        loop {
            let alert = tokio::select! {
                () = cancel.cancelled() => break,
                received = alerts.recv() => match received {
                    Ok(alert) => alert,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "remediation lagged behind alerts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if alert.level < min_level {
                continue;
            }
            let engine = self.clone();
            let target = target.clone();
            self.inner.tasks.spawn(async move {
                if let Some(Err(err)) = engine.remediate_alert(&alert, &target).await {
                    tracing::warn!(error = %err, kind = %alert.kind, "alert remediation failed");
                }
            });
        }
    }

    /// Waits for every alert remediation spawned by [`Self::run_alerts`].
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    async fn acquire(&self, target: &str) -> Result<Slot<'_>, RemediationError> {
        let lock = Arc::clone(
            self.inner
                .targets
                .lock()
                .entry(target.to_owned())
                .or_insert_with(|| Arc::new(TargetLock::new(()))),
        );
        let target = lock.lock_owned().await;
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| RemediationError::Closed)?;
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(Slot {
            engine: &self.inner,
            _target: target,
            _permit: permit,
        })
    }

    fn transition(
        &self,
        id: ActionId,
        status: ActionStatus,
        rollback: Option<RollbackToken>,
        note: Option<String>,
    ) -> Option<ActionRecord> {
        let record = {
            let mut records = self.inner.records.write();
            let record = records.get_mut(&id)?;
            record.status = status;
            if rollback.is_some() {
                record.rollback = rollback;
            }
            record.updated_at = Utc::now();
            record.clone()
        };
        self.record_event(&record, note);
        Some(record)
    }

    fn record_event(&self, record: &ActionRecord, note: Option<String>) {
        self.inner.journal.push(ActionEvent {
            id: record.id,
            kind: record.request.kind,
            target: record.request.target.clone(),
            timestamp: record.updated_at,
            status: record.status.clone(),
            note,
        });
    }

    async fn append_span(&self, record: &ActionRecord, action: &str) {
        let Some(log) = &self.inner.log else {
            return;
        };
        let origin = match &record.request.origin {
            ActionOrigin::Decision(id) => format!("decision:{id}"),
            ActionOrigin::Alert(id) => format!("alert:{id}"),
            ActionOrigin::Manual => "manual".to_owned(),
        };
        let span = Span::new(format!("swarmsh.remediation.{action}"))
            .with_attr("action.id", record.id.to_string())
            .with_attr("action.kind", record.request.kind.label())
            .with_attr("action.target", record.request.target.clone())
            .with_attr("action.status", record.status.label())
            .with_attr("action.reason", record.request.reason.clone())
            .with_attr("action.origin", origin)
            .with_attr("action.dry_run", self.inner.dry_run);
        if let Err(err) = log.append(span).await {
            tracing::error!(error = %err, action = %record.id, "failed to append remediation span");
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(tel) = &self.inner.telemetry {
            tel.record(level, message, metadata);
        }
    }
}
