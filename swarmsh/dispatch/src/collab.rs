use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::dispatcher::DispatchError;

/// Opaque text generation collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produces text for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, DispatchError>;
}

/// Hands out an isolated working directory per agent.
pub trait WorkspaceProvider: Send + Sync {
    /// Workspace directory for `agent_id`.
    fn workspace_for(&self, agent_id: &str) -> Result<PathBuf, DispatchError>;
}

/// Provider creating `<root>/<agent_id>` on demand.
#[derive(Debug, Clone)]
pub struct DirWorkspaceProvider {
    root: PathBuf,
}

impl DirWorkspaceProvider {
    /// Uses `root` as the parent of all workspaces.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Parent directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl WorkspaceProvider for DirWorkspaceProvider {
    fn workspace_for(&self, agent_id: &str) -> Result<PathBuf, DispatchError> {
        if agent_id.is_empty()
            || agent_id
                .chars()
                .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'))
        {
            return Err(DispatchError::Workspace(format!(
                "agent id `{agent_id}` is not a valid directory name"
            )));
        }
        let dir = self.root.join(agent_id);
        std::fs::create_dir_all(&dir)
            .map_err(|err| DispatchError::Workspace(format!("{}: {err}", dir.display())))?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn workspaces_are_isolated_per_agent() {
        let tmp = tempdir().unwrap();
        let provider = DirWorkspaceProvider::new(tmp.path());
        let roberts = provider.workspace_for("roberts").unwrap();
        let scrum = provider.workspace_for("scrum").unwrap();
        assert_ne!(roberts, scrum);
        assert!(roberts.is_dir());
        assert!(provider.workspace_for("../escape").is_err());
    }
}
