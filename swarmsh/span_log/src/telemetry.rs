use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

use crate::{
    log::{Offset, SharedLog},
    span::{Scalar, Span},
};

/// Builder for component telemetry sinks.
pub struct ComponentTelemetryBuilder {
    component: String,
    log_path: Option<PathBuf>,
    span_log: Option<SharedLog>,
}

impl ComponentTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            log_path: None,
            span_log: None,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the span log that receives emitted spans.
    #[must_use]
    pub fn span_log(mut self, log: SharedLog) -> Self {
        self.span_log = Some(log);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<ComponentTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(ComponentTelemetry {
            inner: Arc::new(TelemetryInner {
                component: self.component,
                logger,
                span_log: self.span_log,
            }),
        })
    }
}

/// Telemetry handle shared by the engines: structured JSON log records plus
/// spans appended to the coordination log.
#[derive(Clone)]
pub struct ComponentTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ComponentTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentTelemetry")
            .field("component", &self.inner.component)
            .field("span_log", &self.inner.span_log.is_some())
            .finish()
    }
}

struct TelemetryInner {
    component: String,
    logger: Option<JsonLogger>,
    span_log: Option<SharedLog>,
}

impl ComponentTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> ComponentTelemetryBuilder {
        ComponentTelemetryBuilder::new(component)
    }

    /// Handle that only mirrors into `tracing`.
    #[must_use]
    pub fn disabled(component: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                component: component.into(),
                logger: None,
                span_log: None,
            }),
        }
    }

    /// Component name.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.inner.component
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        level.trace(&self.inner.component, message);
        if let Some(logger) = &self.inner.logger {
            let mut record = LogRecord::new(&self.inner.component, level, message);
            if let Some(obj) = metadata.as_object() {
                record.metadata = obj.clone();
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Like [`Self::log`], but a failed write is reported at debug level
    /// instead of returned.
    pub fn record(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Err(err) = self.log(level, message, metadata) {
            tracing::debug!(
                component = %self.inner.component,
                message,
                error = %err,
                "telemetry record dropped"
            );
        }
    }

    /// Appends a span to the coordination log. Returns `None` without a log.
    pub async fn emit(
        &self,
        name: &str,
        attributes: impl IntoIterator<Item = (String, Scalar)> + Send,
    ) -> Result<Option<Offset>> {
        let Some(log) = &self.inner.span_log else {
            return Ok(None);
        };
        let mut span = Span::new(name).with_attr("component", self.inner.component.clone());
        span.attributes.extend(attributes);
        Ok(Some(log.append(span).await?))
    }

    /// Appends an already-built span.
    pub async fn emit_span(&self, span: Span) -> Result<Option<Offset>> {
        match &self.inner.span_log {
            Some(log) => Ok(Some(log.append(span).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log::MemorySpanLog, SpanLog};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn telemetry_writes_log_and_span() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("window.log");
        let log = MemorySpanLog::shared();
        let telemetry = ComponentTelemetry::builder("window")
            .log_path(&path)
            .span_log(log.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "window.tick", json!({ "spans": 3 }))
            .unwrap();
        let offset = telemetry
            .emit(
                "swarmsh.window.tick",
                [("health".to_owned(), Scalar::Float(0.7))],
            )
            .await
            .unwrap();
        assert_eq!(offset, Some(1));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("window.tick"));
        let entry = &log.read_from(0, 1)[0];
        assert_eq!(entry.span.attr_str("component"), Some("window"));
    }

    #[tokio::test]
    async fn disabled_telemetry_is_a_noop() {
        let telemetry = ComponentTelemetry::disabled("decision");
        telemetry.log(LogLevel::Warn, "quiet", json!({})).unwrap();
        assert_eq!(
            telemetry
                .emit("swarmsh.decision.cycle", std::iter::empty())
                .await
                .unwrap(),
            None
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn record_swallows_write_failures() {
        let telemetry = ComponentTelemetry::builder("dispatch")
            .log_path("/dev/full")
            .build()
            .unwrap();
        assert!(telemetry
            .log(LogLevel::Info, "dispatch.command.completed", json!({}))
            .is_err());
        telemetry.record(LogLevel::Info, "dispatch.command.completed", json!({}));
    }
}
