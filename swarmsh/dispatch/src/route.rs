use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a command target is carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Route {
    /// Append a span named after the target.
    Span,
    /// Run a program in the issuing agent's workspace.
    External {
        /// Program to execute.
        program: String,
        /// Arguments placed before the command's own arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Per-call timeout override in milliseconds.
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// Ask the generation collaborator and append its text as a span.
    Generate,
}

/// Longest-prefix table mapping command targets to routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: IndexMap<String, Route>,
}

impl RouteTable {
    /// Empty table; every target is unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table routing every `swarmsh.*` target to a span.
    #[must_use]
    pub fn swarmsh_default() -> Self {
        Self::new().route("swarmsh", Route::Span)
    }

    /// Adds or replaces a route for `prefix`.
    #[must_use]
    pub fn route(mut self, prefix: impl Into<String>, route: Route) -> Self {
        self.insert(prefix, route);
        self
    }

    /// In-place variant of [`RouteTable::route`].
    pub fn insert(&mut self, prefix: impl Into<String>, route: Route) {
        self.routes.insert(prefix.into(), route);
    }

    /// Resolves a target by longest matching dot-segment prefix.
    #[must_use]
    pub fn resolve(&self, target: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|(prefix, _)| {
                target
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, route)| route)
    }

    /// Number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::swarmsh_default()
            .route(
                "swarmsh.ops.deploy",
                Route::External {
                    program: "deploy.sh".into(),
                    args: vec![],
                    timeout_ms: None,
                },
            )
            .route("swarmsh.generate", Route::Generate);
        assert_eq!(table.resolve("swarmsh.scrum.plan"), Some(&Route::Span));
        assert!(matches!(
            table.resolve("swarmsh.ops.deploy"),
            Some(Route::External { .. })
        ));
        assert_eq!(table.resolve("swarmsh.generate.code"), Some(&Route::Generate));
        assert_eq!(table.resolve("swarmshx.scrum.plan"), None);
        assert_eq!(table.resolve("other.domain.action"), None);
    }

    #[test]
    fn routes_deserialize_from_tagged_form() {
        let route: Route =
            serde_json::from_str(r#"{"kind":"external","program":"echo","args":["hi"]}"#).unwrap();
        assert_eq!(
            route,
            Route::External {
                program: "echo".into(),
                args: vec!["hi".into()],
                timeout_ms: None
            }
        );
    }
}
