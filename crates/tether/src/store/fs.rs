//! Filesystem store implementation.
//!
//! Documents are JSON files under a data directory:
//!
//! ```text
//! <data_dir>/workspaces.json
//! <data_dir>/history/<conversation raw id>.json
//! ```
//!
//! Writes go through a temp file and rename so a crash mid-save never leaves
//! a torn document behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use tether_id::ConversationId;
use tether_protocol::{HistoryEntry, WorkspaceState};

use super::{HistoryStore, StoreResult, WorkspaceStore};

/// JSON-file store rooted at a data directory.
pub struct FsStore {
    data_dir: PathBuf,
}

impl FsStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn workspace_path(&self) -> PathBuf {
        self.data_dir.join("workspaces.json")
    }

    fn history_path(&self, id: ConversationId) -> PathBuf {
        self.data_dir.join("history").join(format!("{}.json", id.raw()))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for FsStore {
    async fn load(&self) -> StoreResult<Option<WorkspaceState>> {
        let path = self.workspace_path();
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &WorkspaceState) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_atomic(&self.workspace_path(), &bytes).await?;
        debug!("saved workspace state ({} workspaces)", state.workspaces.len());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FsStore {
    async fn load(&self, id: ConversationId) -> StoreResult<Vec<HistoryEntry>> {
        let path = self.history_path(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, id: ConversationId, entries: &[HistoryEntry]) -> StoreResult<()> {
        let bytes = serde_json::to_vec(entries)?;
        self.write_atomic(&self.history_path(id), &bytes).await?;
        debug!("saved history for {id} ({} entries)", entries.len());
        Ok(())
    }

    async fn delete(&self, id: ConversationId) -> StoreResult<()> {
        match fs::remove_file(self.history_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::{HistoryKind, Workspace};

    fn entry(text: &str) -> HistoryEntry {
        HistoryEntry {
            id: text.to_string(),
            kind: HistoryKind::UserText,
            text: Some(text.to_string()),
            tool_use_id: None,
            tool_name: None,
            payload: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_workspace_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        assert!(WorkspaceStore::load(&store).await.unwrap().is_none());

        let id = ConversationId::legacy(1, 1, 1).unwrap();
        let mut state = WorkspaceState::default();
        state
            .workspaces
            .push(Workspace::new(id.workspace(), "Test", "/tmp/test", 1));
        WorkspaceStore::save(&store, &state).await.unwrap();

        let loaded = WorkspaceStore::load(&store).await.unwrap().unwrap();
        assert_eq!(loaded.workspaces.len(), 1);
        assert_eq!(loaded.workspaces[0].name, "Test");
    }

    #[tokio::test]
    async fn test_history_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let id = ConversationId::legacy(1, 1, 2).unwrap();

        assert!(HistoryStore::load(&store, id).await.unwrap().is_empty());

        HistoryStore::save(&store, id, &[entry("a"), entry("b")])
            .await
            .unwrap();
        let loaded = HistoryStore::load(&store, id).await.unwrap();
        assert_eq!(loaded.len(), 2);

        HistoryStore::delete(&store, id).await.unwrap();
        assert!(HistoryStore::load(&store, id).await.unwrap().is_empty());
        // Deleting again is not an error.
        HistoryStore::delete(&store, id).await.unwrap();
    }
}
