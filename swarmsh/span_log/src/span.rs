use std::fmt;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log::LogError;

/// Current wall-clock time as fractional unix seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn now_unix() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Attribute value carried by a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
}

impl Scalar {
    /// Returns the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Numeric view; numeric strings are parsed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Str(value) => value.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// Boolean view; `"true"`/`"false"` strings are accepted.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Str(value) => value.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Immutable structured event. Once appended, a span is only shared behind
/// an `Arc` and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Dot-namespaced name, `<system>.<domain>.<action>`.
    pub name: String,
    /// Trace identifier.
    pub trace_id: String,
    /// Span identifier.
    pub span_id: String,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
    /// Attribute map.
    #[serde(default)]
    pub attributes: IndexMap<String, Scalar>,
}

impl Span {
    /// Creates a span in a fresh trace, stamped now.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let trace_id = Uuid::new_v4().simple().to_string();
        Self {
            name: name.into(),
            trace_id,
            span_id: Self::fresh_span_id(),
            timestamp: now_unix(),
            attributes: IndexMap::new(),
        }
    }

    /// Moves the span into an existing trace.
    #[must_use]
    pub fn in_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Scalar> {
        self.attributes.get(key)
    }

    /// String attribute lookup.
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Scalar::as_str)
    }

    /// Numeric attribute lookup.
    #[must_use]
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attr(key).and_then(Scalar::as_f64)
    }

    /// Second namespace segment (`roberts` in `swarmsh.roberts.vote`).
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.name.split('.').nth(1)
    }

    /// Checks the fields required at the log boundary.
    pub fn validate(&self) -> Result<(), LogError> {
        if self.name.trim().is_empty() {
            return Err(LogError::MalformedSpan("missing name".into()));
        }
        let segments: Vec<&str> = self.name.split('.').collect();
        if segments.len() < 3 || segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(LogError::MalformedSpan(format!(
                "name `{}` is not <system>.<domain>.<action>",
                self.name
            )));
        }
        if self.trace_id.trim().is_empty() {
            return Err(LogError::MalformedSpan(format!(
                "span `{}` has no trace_id",
                self.name
            )));
        }
        if self.span_id.trim().is_empty() {
            return Err(LogError::MalformedSpan(format!(
                "span `{}` has no span_id",
                self.name
            )));
        }
        if !self.timestamp.is_finite() || self.timestamp < 0.0 {
            return Err(LogError::MalformedSpan(format!(
                "span `{}` has invalid timestamp {}",
                self.name, self.timestamp
            )));
        }
        Ok(())
    }

    fn fresh_span_id() -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(16);
        id
    }
}
