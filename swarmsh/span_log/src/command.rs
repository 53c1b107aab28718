use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::span::Scalar;

/// Request emitted by an agent handler for the dispatcher to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Fully-qualified target, e.g. `swarmsh.scrum.plan`.
    pub target: String,
    /// Positional and `--key value` arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Why the command was issued.
    #[serde(default)]
    pub rationale: String,
    /// Trace to continue, when the command follows an observed span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Command {
    /// Creates a command without arguments.
    #[must_use]
    pub fn new(target: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            args: Vec::new(),
            rationale: rationale.into(),
            trace_id: None,
        }
    }

    /// Appends a raw argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a `--key value` pair.
    #[must_use]
    pub fn flag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.args.push(format!("--{key}"));
        self.args.push(value.into());
        self
    }

    /// Continues an existing trace.
    #[must_use]
    pub fn in_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Interprets the arguments as span attributes.
    ///
    /// `--key value` maps to `key` (dashes become underscores), a flag not
    /// followed by a value maps to `true`, and anything else is positional
    /// (`command.arg.<n>`). Values that parse as numbers or booleans keep
    /// that type.
    #[must_use]
    pub fn parsed_args(&self) -> IndexMap<String, Scalar> {
        let mut parsed = IndexMap::new();
        let mut positional = 0_usize;
        let mut iter = self.args.iter().peekable();
        while let Some(arg) = iter.next() {
            if let Some(key) = arg.strip_prefix("--").filter(|key| !key.is_empty()) {
                let key = key.replace('-', "_");
                let value = match iter.peek() {
                    Some(next) if !next.starts_with("--") => {
                        let value = typed(next);
                        iter.next();
                        value
                    }
                    _ => Scalar::Bool(true),
                };
                parsed.insert(key, value);
            } else {
                parsed.insert(format!("command.arg.{positional}"), typed(arg));
                positional += 1;
            }
        }
        parsed
    }
}

fn typed(raw: &str) -> Scalar {
    if let Ok(value) = raw.parse::<i64>() {
        return Scalar::Int(value);
    }
    if let Ok(value) = raw.parse::<f64>() {
        if value.is_finite() {
            return Scalar::Float(value);
        }
    }
    match raw {
        "true" => Scalar::Bool(true),
        "false" => Scalar::Bool(false),
        _ => Scalar::Str(raw.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_become_typed_attributes() {
        let command = Command::new("swarmsh.scrum.plan", "motion passed")
            .flag("motion-id", "m1")
            .flag("sprint", "4")
            .arg("--urgent")
            .arg("extra");
        let parsed = command.parsed_args();
        assert_eq!(parsed.get("motion_id"), Some(&Scalar::Str("m1".into())));
        assert_eq!(parsed.get("sprint"), Some(&Scalar::Int(4)));
        assert_eq!(parsed.get("urgent"), Some(&Scalar::Str("extra".into())));
    }

    #[test]
    fn trailing_flag_and_positionals() {
        let command = Command::new("swarmsh.ping.pong", "")
            .arg("one")
            .arg("two")
            .arg("--dry-run");
        let parsed = command.parsed_args();
        assert_eq!(parsed.get("command.arg.0"), Some(&Scalar::Str("one".into())));
        assert_eq!(parsed.get("command.arg.1"), Some(&Scalar::Str("two".into())));
        assert_eq!(parsed.get("dry_run"), Some(&Scalar::Bool(true)));
    }

    #[test]
    fn trace_id_is_omitted_when_absent() {
        let json = serde_json::to_string(&Command::new("swarmsh.lean.define", "r")).unwrap();
        assert!(!json.contains("trace_id"));
        let traced = Command::new("swarmsh.lean.define", "r").in_trace("t1");
        assert!(serde_json::to_string(&traced).unwrap().contains("\"trace_id\":\"t1\""));
    }
}
