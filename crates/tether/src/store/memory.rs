//! In-memory store, used by tests and by ephemeral hub instances.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use tether_id::ConversationId;
use tether_protocol::{HistoryEntry, WorkspaceState};

use super::{HistoryStore, StoreResult, WorkspaceStore};

/// Store keeping every document in process memory.
#[derive(Default)]
pub struct MemoryStore {
    workspace: Mutex<Option<WorkspaceState>>,
    histories: Mutex<HashMap<ConversationId, Vec<HistoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of history documents currently stored.
    pub fn history_count(&self) -> usize {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Entry count of one stored history document.
    pub fn history_len(&self, id: ConversationId) -> usize {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn load(&self) -> StoreResult<Option<WorkspaceState>> {
        Ok(self
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, state: &WorkspaceState) -> StoreResult<()> {
        *self
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn load(&self, id: ConversationId) -> StoreResult<Vec<HistoryEntry>> {
        Ok(self
            .histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, id: ConversationId, entries: &[HistoryEntry]) -> StoreResult<()> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entries.to_vec());
        Ok(())
    }

    async fn delete(&self, id: ConversationId) -> StoreResult<()> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }
}
