//! Persistence abstraction.
//!
//! The hub depends only on two narrow document stores: one workspace-store
//! document holding every workspace/conversation and the active selection,
//! and one message-history document per conversation. The on-disk format is
//! opaque to the routing core.

mod error;
mod fs;
mod memory;

pub use error::{StoreError, StoreResult};
pub use fs::FsStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use tether_id::ConversationId;
use tether_protocol::{HistoryEntry, WorkspaceState};

/// Store for the single workspace-state document.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Load the document. `None` on first run.
    async fn load(&self) -> StoreResult<Option<WorkspaceState>>;

    /// Save the document, replacing any previous version.
    async fn save(&self, state: &WorkspaceState) -> StoreResult<()>;
}

/// Store for per-conversation message history documents.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load a conversation's history. Empty for an unknown conversation.
    async fn load(&self, id: ConversationId) -> StoreResult<Vec<HistoryEntry>>;

    /// Save a conversation's full history.
    async fn save(&self, id: ConversationId, entries: &[HistoryEntry]) -> StoreResult<()>;

    /// Delete a conversation's history document.
    async fn delete(&self, id: ConversationId) -> StoreResult<()>;
}
