use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use span_log::Span;

/// Verdict from a [`SpanValidator`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the span conforms.
    pub ok: bool,
    /// Human-readable violations.
    pub violations: Vec<String>,
}

impl Validation {
    /// Passing verdict.
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            ok: true,
            violations: Vec::new(),
        }
    }

    /// Builds a verdict from collected violations.
    #[must_use]
    pub fn from_violations(violations: Vec<String>) -> Self {
        Self {
            ok: violations.is_empty(),
            violations,
        }
    }
}

/// Semantic-convention check consulted before an agent accepts a span.
pub trait SpanValidator: Send + Sync {
    /// Validates one span.
    fn validate(&self, span: &Span) -> Validation;
}

/// Validator requiring named attributes on named spans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequiredAttributes {
    rules: IndexMap<String, Vec<String>>,
}

impl RequiredAttributes {
    /// Creates an empty rule set; every span passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `keys` on spans named `span_name`.
    #[must_use]
    pub fn require(
        mut self,
        span_name: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.rules
            .entry(span_name.into())
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }
}

impl SpanValidator for RequiredAttributes {
    fn validate(&self, span: &Span) -> Validation {
        let Some(keys) = self.rules.get(&span.name) else {
            return Validation::pass();
        };
        let violations = keys
            .iter()
            .filter(|key| span.attr(key).is_none())
            .map(|key| format!("{} requires attribute `{key}`", span.name))
            .collect();
        Validation::from_violations(violations)
    }
}
