use std::{collections::VecDeque, fmt};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    log::SharedLog,
    span::{now_unix, Span},
};

/// Coarse band derived from an alert's numeric severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    /// Barely past threshold.
    Low,
    /// Up to twice the threshold.
    Medium,
    /// Up to three times the threshold.
    High,
    /// Three times the threshold or worse.
    Critical,
}

impl SeverityLevel {
    /// Bands a severity ratio `(observed - threshold) / threshold`.
    #[must_use]
    pub fn from_severity(severity: f64) -> Self {
        if severity >= 2.0 {
            Self::Critical
        } else if severity >= 1.0 {
            Self::High
        } else if severity >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Signal that a monitored quantity crossed its threshold, or that a
/// component failure was converted into an observable event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternAlert {
    /// Alert identifier.
    pub id: Uuid,
    /// Component or detector that raised the alert (`error_spike`, `agent:roberts`).
    pub detector_id: String,
    /// Alert kind (`error_spike`, `agent_error`, `dispatch_failure`, ...).
    pub kind: String,
    /// How far past threshold the observation is; 0 means "at threshold".
    pub severity: f64,
    /// Band derived from `severity`.
    pub level: SeverityLevel,
    /// Spans supporting the alert.
    pub evidence_span_ids: Vec<String>,
    /// Human-readable detail.
    pub message: String,
    /// Unix seconds when raised.
    pub raised_at: f64,
}

impl PatternAlert {
    /// Creates an alert; the level is derived from the severity.
    #[must_use]
    pub fn new(
        detector_id: impl Into<String>,
        kind: impl Into<String>,
        severity: f64,
        message: impl Into<String>,
    ) -> Self {
        let severity = if severity.is_finite() {
            severity.max(0.0)
        } else {
            0.0
        };
        Self {
            id: Uuid::new_v4(),
            detector_id: detector_id.into(),
            kind: kind.into(),
            severity,
            level: SeverityLevel::from_severity(severity),
            evidence_span_ids: Vec::new(),
            message: message.into(),
            raised_at: now_unix(),
        }
    }

    /// Attaches evidence span ids.
    #[must_use]
    pub fn with_evidence(mut self, span_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.evidence_span_ids
            .extend(span_ids.into_iter().map(Into::into));
        self
    }

    /// Overrides the band, for failures whose severity is not a threshold ratio.
    #[must_use]
    pub const fn with_level(mut self, level: SeverityLevel) -> Self {
        self.level = level;
        self
    }

    /// Span form appended to the log: `swarmsh.alert.<kind>`.
    #[must_use]
    pub fn to_span(&self) -> Span {
        Span::new(format!("swarmsh.alert.{}", self.kind))
            .at(self.raised_at)
            .with_attr("alert.id", self.id.to_string())
            .with_attr("alert.detector", self.detector_id.clone())
            .with_attr("alert.severity", self.severity)
            .with_attr("alert.level", self.level.label())
            .with_attr("alert.message", self.message.clone())
            .with_attr("alert.evidence", self.evidence_span_ids.join(","))
    }
}

/// Destination for alerts raised by any component.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Records the alert. Never fails: alerting must not abort a loop.
    async fn raise(&self, alert: PatternAlert);
}

/// Alert fan-out: keeps a bounded backlog, broadcasts to subscribers, and
/// appends every alert to the span log as `swarmsh.alert.*`.
#[derive(Debug, Clone)]
pub struct AlertHub {
    log: Option<SharedLog>,
    sender: broadcast::Sender<PatternAlert>,
    backlog: std::sync::Arc<Mutex<VecDeque<PatternAlert>>>,
    capacity: usize,
}

impl AlertHub {
    /// Creates a hub retaining the latest `capacity` alerts.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            log: None,
            sender,
            backlog: std::sync::Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Also appends alerts to the given log.
    #[must_use]
    pub fn with_log(mut self, log: SharedLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Subscribes to alerts raised from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PatternAlert> {
        self.sender.subscribe()
    }

    /// Snapshot of retained alerts, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<PatternAlert> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained alerts of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: &str) -> Vec<PatternAlert> {
        self.backlog
            .lock()
            .iter()
            .filter(|alert| alert.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AlertSink for AlertHub {
    async fn raise(&self, alert: PatternAlert) {
        tracing::warn!(
            kind = %alert.kind,
            detector = %alert.detector_id,
            severity = alert.severity,
            level = %alert.level,
            "{}",
            alert.message
        );
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(alert.clone());
        }
        if let Some(log) = &self.log {
            if let Err(err) = log.append(alert.to_span()).await {
                tracing::error!(error = %err, kind = %alert.kind, "failed to append alert span");
            }
        }
        let _ = self.sender.send(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemorySpanLog;

    #[test]
    fn severity_bands() {
        assert_eq!(SeverityLevel::from_severity(0.1), SeverityLevel::Low);
        assert_eq!(SeverityLevel::from_severity(0.7), SeverityLevel::Medium);
        assert_eq!(SeverityLevel::from_severity(1.5), SeverityLevel::High);
        assert_eq!(SeverityLevel::from_severity(2.0), SeverityLevel::Critical);
        assert_eq!(PatternAlert::new("d", "k", f64::NAN, "m").severity, 0.0);
    }

    #[tokio::test]
    async fn hub_retains_broadcasts_and_logs() {
        let log = MemorySpanLog::shared();
        let hub = AlertHub::new(2).with_log(log.clone());
        let mut rx = hub.subscribe();
        for idx in 0..3 {
            hub.raise(
                PatternAlert::new("error_spike", "error_spike", 2.0, format!("spike {idx}"))
                    .with_evidence(["s1", "s2"]),
            )
            .await;
        }
        let recent = hub.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "spike 1");
        assert_eq!(rx.recv().await.unwrap().message, "spike 0");
        assert_eq!(log.head(), 3);
        let entries = log.read_from(0, 1);
        assert_eq!(entries[0].span.name, "swarmsh.alert.error_spike");
        assert_eq!(entries[0].span.attr_str("alert.evidence"), Some("s1,s2"));
        assert_eq!(hub.of_kind("error_spike").len(), 2);
    }
}
