use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;
use span_log::{
    now_unix, AlertSink, ComponentTelemetry, Offset, PatternAlert, Scalar, SharedLog, Tail,
};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::{SpanWindow, DEFAULT_CAPACITY, DEFAULT_HORIZON},
    detect::DetectorRegistry,
    metrics::{MetricSnapshot, SnapshotBoard},
};

/// Window sizing and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// How far back the window reaches.
    pub horizon: Duration,
    /// Maximum buffered spans.
    pub capacity: usize,
    /// Period between ticks.
    pub tick_interval: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            horizon: DEFAULT_HORIZON,
            capacity: DEFAULT_CAPACITY,
            tick_interval: Duration::from_secs(10),
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Snapshot published by the tick.
    pub snapshot: Arc<MetricSnapshot>,
    /// Alerts raised by the tick.
    pub alerts: Vec<PatternAlert>,
    /// Detectors that failed and were skipped.
    pub skipped: usize,
    /// Spans ingested from the log.
    pub ingested: usize,
    /// Spans evicted for falling out of the horizon.
    pub evicted: usize,
}

struct WindowState {
    window: SpanWindow,
    tail: Tail,
}

/// Periodic driver: tails the log into a [`SpanWindow`], publishes a
/// [`MetricSnapshot`] per tick and raises alerts from the detector registry.
pub struct WindowProcessor {
    config: WindowConfig,
    state: Mutex<WindowState>,
    detectors: DetectorRegistry,
    board: SnapshotBoard,
    alerts: Arc<dyn AlertSink>,
    telemetry: ComponentTelemetry,
}

impl std::fmt::Debug for WindowProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowProcessor")
            .field("config", &self.config)
            .field("detectors", &self.detectors)
            .finish_non_exhaustive()
    }
}

impl WindowProcessor {
    /// Creates a processor reading `log` from the beginning.
    #[must_use]
    pub fn new(
        log: SharedLog,
        config: WindowConfig,
        detectors: DetectorRegistry,
        board: SnapshotBoard,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            state: Mutex::new(WindowState {
                window: SpanWindow::new(config.horizon, config.capacity),
                tail: Tail::new(log, 0),
            }),
            config,
            detectors,
            board,
            alerts,
            telemetry: ComponentTelemetry::disabled("window"),
        }
    }

    /// Attaches telemetry; snapshots are then appended as `swarmsh.window.snapshot`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ComponentTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Board the processor publishes to.
    #[must_use]
    pub const fn board(&self) -> &SnapshotBoard {
        &self.board
    }

    /// Detector registry, open for runtime registration.
    #[must_use]
    pub const fn detectors(&self) -> &DetectorRegistry {
        &self.detectors
    }

    /// Log offset consumed so far.
    #[must_use]
    pub fn offset(&self) -> Offset {
        self.state.lock().tail.offset()
    }

    /// Runs one tick at the current time.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(now_unix()).await
    }

    /// Runs one tick as if the clock read `now`.
    pub async fn tick_at(&self, now: f64) -> TickReport {
        let (current, ingested, evicted) = {
            let mut state = self.state.lock();
            let WindowState { window, tail } = &mut *state;
            let entries = tail.drain();
            let ingested = entries.len();
            for entry in entries {
                window.push(entry.span);
            }
            let evicted = window.evict_before(now);
            (MetricSnapshot::from_window(window, now), ingested, evicted)
        };

        let prior = self.board.latest();
        let (alerts, skipped) = self.detectors.evaluate(&current, prior.as_deref());
        let snapshot = self.board.publish(current);

        for alert in &alerts {
            self.alerts.raise(alert.clone()).await;
        }
        self.record(&snapshot, alerts.len()).await;
        tracing::debug!(
            health = snapshot.health_score,
            band = %snapshot.band,
            spans = snapshot.span_count,
            alerts = alerts.len(),
            "window tick"
        );

        TickReport {
            snapshot,
            alerts,
            skipped,
            ingested,
            evicted,
        }
    }

    /// Ticks every `tick_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.tick_interval, "window processor started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::info!(offset = self.offset(), "window processor stopped");
    }

    async fn record(&self, snapshot: &MetricSnapshot, alerts: usize) {
        let attrs = [
            ("health.score".to_owned(), Scalar::Float(snapshot.health_score)),
            ("health.band".to_owned(), Scalar::from(snapshot.band.label())),
            ("window.spans".to_owned(), count(snapshot.span_count)),
            ("window.error_rate".to_owned(), Scalar::Float(snapshot.error_rate)),
            ("window.queue_size".to_owned(), count(snapshot.queue_size)),
            ("window.alerts".to_owned(), count(alerts)),
        ];
        if let Err(err) = self.telemetry.emit("swarmsh.window.snapshot", attrs).await {
            tracing::warn!(error = %err, "failed to append snapshot span");
        }
        self.telemetry.record(
            LogLevel::Debug,
            "snapshot",
            json!({
                "health_score": snapshot.health_score,
                "band": snapshot.band,
                "completion_rate": snapshot.completion_rate,
                "active_agents": snapshot.active_agents,
                "queue_size": snapshot.queue_size,
                "telemetry_volume": snapshot.telemetry_volume,
            }),
        );
    }
}

fn count<T: TryInto<i64>>(value: T) -> Scalar {
    Scalar::Int(value.try_into().unwrap_or(i64::MAX))
}
