use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use span_log::Offset;
use thiserror::Error;
use tokio::fs;

/// Errors raised while persisting agent snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("snapshot io failure: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot could not be encoded or decoded.
    #[error("snapshot encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Persisted position of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    /// State label.
    pub state: String,
    /// Offset of the last processed span.
    pub cursor_offset: Offset,
}

/// Directory holding one `<agent_id>.snapshot.json` per agent.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Uses `dir`, creating it on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Snapshot directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot path for an agent.
    #[must_use]
    pub fn path_for(&self, agent_id: &str) -> PathBuf {
        let safe: String = agent_id
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.snapshot.json"))
    }

    /// Loads an agent's snapshot, if one was saved.
    pub async fn load(&self, agent_id: &str) -> Result<Option<AgentSnapshot>, SnapshotError> {
        match fs::read(self.path_for(agent_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes an agent's snapshot through a temp file and rename.
    pub async fn save(&self, agent_id: &str, snapshot: &AgentSnapshot) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(agent_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn snapshot_round_trips_with_camel_case_keys() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("agents"));
        assert_eq!(store.load("roberts").await.unwrap(), None);
        let snapshot = AgentSnapshot {
            state: "open".into(),
            cursor_offset: 7,
        };
        store.save("roberts", &snapshot).await.unwrap();
        assert_eq!(store.load("roberts").await.unwrap(), Some(snapshot));
        let raw = std::fs::read_to_string(store.path_for("roberts")).unwrap();
        assert!(raw.contains("\"cursorOffset\": 7"));
        assert!(store.path_for("a/b").ends_with("a_b.snapshot.json"));
    }
}
