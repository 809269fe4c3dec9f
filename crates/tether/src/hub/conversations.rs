//! Conversation interaction handlers: select, history paging, sends and
//! the human side of permission consults.

use serde_json::{json, Value};
use tracing::{debug, warn};

use tether_id::{ConversationId, DeviceId, WorkspaceId};
use tether_protocol::{
    Attachment, ControlAction, ConversationStatus, HistoryKind, LiveStatus, PermissionMode,
    PermissionResponse, ServerMessage,
};

use crate::driver::{PermissionOutcome, SessionContext};
use crate::history;

use super::{entry_now, Hub, PendingRequest};

impl Hub {
    /// Select a conversation: activate it, clear its unread badge, register
    /// the sender as viewer and reply with the first history page. When a
    /// consult is outstanding the reply is followed by a synthetic
    /// permission state and a replay of the request, so a client that
    /// reconnected mid-consult can still answer it.
    pub(super) async fn conversation_select(
        &mut self,
        sender: DeviceId,
        id: ConversationId,
        workspace_id: Option<WorkspaceId>,
    ) {
        if self.state.conversation(id).is_none() {
            debug!("select of unknown conversation {id} dropped");
            return;
        }
        self.state.active_workspace = Some(workspace_id.unwrap_or_else(|| id.workspace()));
        self.state.active_conversation = Some(id);
        self.schedule_workspaces_save();

        self.viewers.clear_unread_sent(sender, id);
        let was_unread = {
            let Some(conversation) = self.state.conversation_mut(id) else {
                return;
            };
            std::mem::replace(&mut conversation.unread, false)
        };
        if was_unread {
            self.broadcast(ServerMessage::ConversationStatus {
                conversation_id: id,
                status: None,
                unread: Some(false),
            })
            .await;
        }

        self.ensure_history_loaded(id).await;
        if let Some(vacated) = self.viewers.select(sender, id) {
            self.maybe_unload(vacated);
        }

        let page = history::page(
            self.history.entries(id).unwrap_or(&[]),
            0,
            self.config.page_byte_cap,
        );
        let active = self.deps.driver.has_active_session(id);
        let pending = self.pending_requests.get(&id).cloned();
        let current_status = live_status(active, pending.is_some());
        self.reply(
            sender,
            ServerMessage::HistoryResult {
                conversation_id: id,
                messages: page.messages,
                current_status,
                has_more: page.has_more,
                total: page.total,
            },
        )
        .await;

        if active {
            if let Some(pending) = pending {
                self.reply(
                    sender,
                    ServerMessage::State {
                        conversation_id: id,
                        state: LiveStatus::Permission,
                    },
                )
                .await;
                self.reply(sender, pending.to_message(id)).await;
            }
        }
    }

    /// Page further back through history without touching viewer state.
    pub(super) async fn history_request(&mut self, sender: DeviceId, id: ConversationId, cursor: u32) {
        if self.state.conversation(id).is_none() {
            debug!("history request for unknown conversation {id} dropped");
            return;
        }
        if !self.ensure_history_loaded(id).await {
            return;
        }
        let page = history::page(
            self.history.entries(id).unwrap_or(&[]),
            cursor,
            self.config.page_byte_cap,
        );
        let active = self.deps.driver.has_active_session(id);
        let current_status = live_status(active, self.pending_requests.contains_key(&id));
        self.reply(
            sender,
            ServerMessage::HistoryResult {
                conversation_id: id,
                messages: page.messages,
                current_status,
                has_more: page.has_more,
                total: page.total,
            },
        )
        .await;
    }

    pub(super) async fn claude_send(
        &mut self,
        id: ConversationId,
        message: Option<String>,
        attached_file_ids: Vec<String>,
        attachments: Vec<Attachment>,
    ) {
        if message.as_deref().unwrap_or("").is_empty()
            && attached_file_ids.is_empty()
            && attachments.is_empty()
        {
            debug!("send to {id} with no message and no attachments dropped");
            return;
        }
        let Some(conversation) = self.state.conversation(id) else {
            debug!("send to unknown conversation {id} dropped");
            return;
        };
        let permission_mode = conversation.permission_mode;
        let session_token = conversation.session_token.clone();
        let Some(workspace) = self.state.workspace(id.workspace()) else {
            return;
        };
        let working_dir = workspace.working_dir.clone();
        if !self.ensure_history_loaded(id).await {
            return;
        }

        let text = message.unwrap_or_default();
        let mut names: Vec<String> = Vec::new();
        let mut metas: Vec<Value> = Vec::new();
        for attachment in &attachments {
            names.push(attachment.file_name.clone());
            metas.push(json!({
                "fileName": attachment.file_name,
                "mimeType": attachment.mime_type,
            }));
        }
        for file_id in &attached_file_ids {
            let stored = self
                .pending_files
                .get_mut(&id)
                .and_then(|files| files.remove(file_id));
            match stored {
                Some(stored) => {
                    names.push(stored.meta.file_name.clone());
                    metas.push(serde_json::to_value(&stored.meta).unwrap_or(Value::Null));
                }
                None => debug!("unknown attached file {file_id} ignored"),
            }
        }

        let mut entry = entry_now(HistoryKind::UserText, Some(text.clone()));
        if !metas.is_empty() {
            entry.payload = Some(json!({ "attachments": metas }));
        }
        if self.append_entry(id, entry.clone()).await {
            self.broadcast(ServerMessage::ConversationMessage {
                conversation_id: id,
                entry,
            })
            .await;
        }

        let forward = if names.is_empty() {
            text
        } else {
            format!("{text}\n\n[Attached files: {}]", names.join(", "))
        };
        let context = SessionContext {
            working_dir,
            session_token,
            permission_mode,
        };
        if let Err(e) = self.deps.driver.send_message(id, &context, &forward).await {
            warn!("message delivery to agent for {id} failed: {e}");
        }
    }

    pub(super) async fn claude_permission(
        &mut self,
        id: ConversationId,
        tool_use_id: String,
        decision: PermissionResponse,
    ) {
        let matches_pending = matches!(
            self.pending_requests.get(&id),
            Some(PendingRequest::Permission { tool_use_id: pending, .. }) if *pending == tool_use_id
        );
        if !matches_pending {
            debug!("permission response for {id} does not match a pending request, dropped");
            return;
        }
        let Some(PendingRequest::Permission { tool_input, .. }) = self.pending_requests.remove(&id)
        else {
            return;
        };
        let outcome = match decision {
            PermissionResponse::Allow => PermissionOutcome::Allow {
                updated_input: tool_input,
                always: false,
            },
            PermissionResponse::AllowAll => PermissionOutcome::Allow {
                updated_input: tool_input,
                always: true,
            },
            PermissionResponse::Deny => PermissionOutcome::Deny {
                reason: "Denied by user".to_string(),
            },
        };
        if let Err(e) = self
            .deps
            .driver
            .respond_permission(id, &tool_use_id, outcome)
            .await
        {
            warn!("permission response delivery for {id} failed: {e}");
        }
    }

    pub(super) async fn claude_question_response(
        &mut self,
        id: ConversationId,
        question_id: String,
        answer: String,
    ) {
        let matches_pending = matches!(
            self.pending_requests.get(&id),
            Some(PendingRequest::Question { question_id: pending, .. }) if *pending == question_id
        );
        if !matches_pending {
            debug!("question response for {id} does not match a pending request, dropped");
            return;
        }
        self.pending_requests.remove(&id);
        if let Err(e) = self
            .deps
            .driver
            .respond_question(id, &question_id, &answer)
            .await
        {
            warn!("question response delivery for {id} failed: {e}");
        }
    }

    pub(super) async fn claude_control(&mut self, id: ConversationId, action: ControlAction) {
        if self.state.conversation(id).is_none() {
            debug!("control for unknown conversation {id} dropped");
            return;
        }
        match action {
            ControlAction::Stop => {
                if let Err(e) = self.deps.driver.stop(id).await {
                    warn!("stop for {id} failed: {e}");
                }
            }
            ControlAction::Compact => {
                if let Err(e) = self.deps.driver.compact(id).await {
                    warn!("compact for {id} failed: {e}");
                }
            }
            ControlAction::NewSession => {
                if let Err(e) = self.deps.driver.end_session(id).await {
                    warn!("ending session for {id} failed: {e}");
                }
                self.pending_requests.remove(&id);
                if let Some(conversation) = self.state.conversation_mut(id) {
                    conversation.session_token = None;
                    conversation.status = ConversationStatus::Idle;
                }
                self.persist_workspaces_now();
                self.broadcast(ServerMessage::ConversationStatus {
                    conversation_id: id,
                    status: Some(ConversationStatus::Idle),
                    unread: None,
                })
                .await;
            }
        }
    }

    pub(super) async fn claude_set_permission_mode(
        &mut self,
        id: ConversationId,
        mode: PermissionMode,
    ) {
        let Some(conversation) = self.state.conversation_mut(id) else {
            debug!("permission mode for unknown conversation {id} dropped");
            return;
        };
        conversation.permission_mode = mode;
        self.persist_workspaces_now();
        if self.deps.driver.has_active_session(id) {
            if let Err(e) = self.deps.driver.set_permission_mode(id, mode).await {
                warn!("permission mode propagation for {id} failed: {e}");
            }
        }
        self.broadcast_workspaces().await;
    }
}

fn live_status(session_active: bool, consult_pending: bool) -> LiveStatus {
    if session_active && consult_pending {
        LiveStatus::Permission
    } else if session_active {
        LiveStatus::Working
    } else {
        LiveStatus::Idle
    }
}
