//! Workspace and conversation lifecycle handlers.
//!
//! Structural mutations share one shape: mutate the model, persist the
//! workspace store immediately (fire-and-forget), broadcast the full
//! workspace snapshot so every client converges on the same ordering.
//! References to unknown workspaces or conversations are dropped silently.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tether_id::{ConversationId, DeviceId, WorkspaceId, CONVERSATION_INDEX_MAX, WORKSPACE_INDEX_MAX};
use tether_protocol::{Conversation, ServerMessage, Workspace};

use crate::persist::SaveKey;

use super::{now_ms, Hub};

impl Hub {
    pub(super) async fn workspace_list(&self, sender: DeviceId) {
        self.reply(
            sender,
            ServerMessage::WorkspaceListResult {
                workspaces: self.state.workspaces.clone(),
                active_workspace: self.state.active_workspace,
                active_conversation: self.state.active_conversation,
            },
        )
        .await;
    }

    pub(super) async fn workspace_create(
        &mut self,
        sender: DeviceId,
        name: String,
        working_dir: String,
    ) {
        let Some(id) = self.next_workspace_id() else {
            warn!("workspace index space exhausted, create dropped");
            return;
        };
        let mut workspace = Workspace::new(id, name, working_dir, now_ms());
        workspace.position = self.state.workspaces.len() as u32;
        info!("created workspace {id} ({})", workspace.name);
        self.state.workspaces.push(workspace);
        self.persist_workspaces_now();
        self.reply(sender, self.workspace_snapshot()).await;
        self.broadcast_workspaces().await;
    }

    pub(super) async fn workspace_delete(&mut self, sender: DeviceId, id: WorkspaceId) {
        let Some(position) = self.state.workspaces.iter().position(|w| w.id == id) else {
            debug!("delete of unknown workspace {id} dropped");
            return;
        };
        let workspace = self.state.workspaces.remove(position);
        info!(
            "deleting workspace {id} with {} conversation(s)",
            workspace.conversations.len()
        );
        for conversation in &workspace.conversations {
            self.teardown_conversation(conversation.id).await;
        }
        for (index, workspace) in self.state.workspaces.iter_mut().enumerate() {
            workspace.position = index as u32;
        }
        if self.state.active_workspace == Some(id) {
            self.state.active_workspace = None;
        }
        if self
            .state
            .active_conversation
            .is_some_and(|c| c.workspace() == id)
        {
            self.state.active_conversation = None;
        }
        self.persist_workspaces_now();
        self.reply(sender, self.workspace_snapshot()).await;
        self.broadcast_workspaces().await;
    }

    pub(super) async fn workspace_update(
        &mut self,
        id: WorkspaceId,
        name: Option<String>,
        working_dir: Option<String>,
    ) {
        let Some(workspace) = self.state.workspace_mut(id) else {
            debug!("update of unknown workspace {id} dropped");
            return;
        };
        if let Some(name) = name {
            workspace.name = name;
        }
        if let Some(working_dir) = working_dir {
            workspace.working_dir = working_dir;
        }
        self.persist_workspaces_now();
        self.broadcast_workspaces().await;
    }

    pub(super) async fn workspace_reorder(&mut self, order: Vec<WorkspaceId>) {
        let mut ordered = Vec::with_capacity(self.state.workspaces.len());
        for id in &order {
            if let Some(position) = self.state.workspaces.iter().position(|w| w.id == *id) {
                ordered.push(self.state.workspaces.remove(position));
            }
        }
        // Workspaces missing from the order keep their relative position at
        // the end.
        ordered.append(&mut self.state.workspaces);
        for (index, workspace) in ordered.iter_mut().enumerate() {
            workspace.position = index as u32;
        }
        self.state.workspaces = ordered;
        self.persist_workspaces_now();
        self.broadcast_workspaces().await;
    }

    pub(super) async fn workspace_switch(&mut self, id: WorkspaceId) {
        if self.state.workspace(id).is_none() {
            debug!("switch to unknown workspace {id} dropped");
            return;
        }
        self.state.active_workspace = Some(id);
        if self
            .state
            .active_conversation
            .is_some_and(|c| c.workspace() != id)
        {
            self.state.active_conversation = None;
        }
        self.schedule_workspaces_save();
        self.broadcast_workspaces().await;
    }

    pub(super) async fn conversation_create(
        &mut self,
        workspace_id: WorkspaceId,
        name: Option<String>,
    ) {
        if self.state.workspace(workspace_id).is_none() {
            debug!("conversation create in unknown workspace {workspace_id} dropped");
            return;
        }
        let Some(id) = self.next_conversation_id(workspace_id) else {
            warn!("conversation index space exhausted in {workspace_id}, create dropped");
            return;
        };
        let name = name.unwrap_or_else(|| format!("Chat {}", id.conversation_index()));
        let Some(workspace) = self.state.workspace_mut(workspace_id) else {
            return;
        };
        let mut conversation = Conversation::new(id, name, now_ms());
        conversation.position = workspace.conversations.len() as u32;
        workspace.conversations.push(conversation);
        info!("created conversation {id}");
        self.persist_workspaces_now();
        self.broadcast_workspaces().await;
    }

    pub(super) async fn conversation_delete(&mut self, id: ConversationId) {
        let Some(workspace) = self.state.workspace_mut(id.workspace()) else {
            debug!("delete of unknown conversation {id} dropped");
            return;
        };
        let Some(position) = workspace.conversations.iter().position(|c| c.id == id) else {
            debug!("delete of unknown conversation {id} dropped");
            return;
        };
        workspace.conversations.remove(position);
        for (index, conversation) in workspace.conversations.iter_mut().enumerate() {
            conversation.position = index as u32;
        }
        self.teardown_conversation(id).await;
        if self.state.active_conversation == Some(id) {
            self.state.active_conversation = None;
        }
        info!("deleted conversation {id}");
        self.persist_workspaces_now();
        self.broadcast_workspaces().await;
    }

    pub(super) async fn conversation_rename(&mut self, id: ConversationId, name: String) {
        let Some(conversation) = self.state.conversation_mut(id) else {
            debug!("rename of unknown conversation {id} dropped");
            return;
        };
        conversation.name = name;
        self.persist_workspaces_now();
        self.broadcast_workspaces().await;
    }

    pub(super) async fn conversation_reorder(
        &mut self,
        workspace_id: WorkspaceId,
        order: Vec<ConversationId>,
    ) {
        let Some(workspace) = self.state.workspace_mut(workspace_id) else {
            debug!("reorder in unknown workspace {workspace_id} dropped");
            return;
        };
        let mut ordered = Vec::with_capacity(workspace.conversations.len());
        for id in &order {
            if let Some(position) = workspace.conversations.iter().position(|c| c.id == *id) {
                ordered.push(workspace.conversations.remove(position));
            }
        }
        ordered.append(&mut workspace.conversations);
        for (index, conversation) in ordered.iter_mut().enumerate() {
            conversation.position = index as u32;
        }
        workspace.conversations = ordered;
        self.persist_workspaces_now();
        self.broadcast_workspaces().await;
    }

    /// Drop every runtime trace of a conversation and delete its stored
    /// history. Buffered entries are intentionally discarded.
    pub(super) async fn teardown_conversation(&mut self, id: ConversationId) {
        self.scheduler.cancel(SaveKey::Conversation(id));
        self.history.unload(id);
        self.viewers.forget_conversation(id);
        self.pending_requests.remove(&id);
        self.pending_files.remove(&id);
        if let Err(e) = self.deps.driver.end_session(id).await {
            warn!("ending session for deleted conversation {id} failed: {e}");
        }
        let store = Arc::clone(&self.deps.histories);
        tokio::spawn(async move {
            if let Err(e) = store.delete(id).await {
                warn!("history delete for {id} failed: {e}");
            }
        });
    }

    fn next_workspace_id(&self) -> Option<WorkspaceId> {
        (1..=WORKSPACE_INDEX_MAX).find_map(|index| {
            let id = WorkspaceId::new(self.config.device_id, index).ok()?;
            self.state.workspace(id).is_none().then_some(id)
        })
    }

    fn next_conversation_id(&self, workspace_id: WorkspaceId) -> Option<ConversationId> {
        let workspace = self.state.workspace(workspace_id)?;
        (1..=CONVERSATION_INDEX_MAX).find_map(|index| {
            let id = workspace_id.conversation(index).ok()?;
            workspace.conversation(id).is_none().then_some(id)
        })
    }
}
