//! Agent event handlers.
//!
//! Every event lands in history first, then fans out to the conversation's
//! viewers; state changes broadcast to all clients; turn-completing events
//! additionally push an unread notice to connected non-viewers.

use serde_json::{json, Value};
use tracing::{debug, warn};

use tether_id::ConversationId;
use tether_protocol::{
    AgentEvent, ConversationStatus, HistoryEntry, HistoryKind, LiveStatus, OutboundEnvelope,
    ServerMessage, ATTACHMENT_TOOL,
};

use crate::driver::PermissionOutcome;
use crate::permission::{self, PermissionDecision, QUESTION_TOOL};

use super::{entry_now, Hub, PendingRequest};

impl Hub {
    pub(super) async fn handle_agent_event(&mut self, id: ConversationId, event: AgentEvent) {
        if self.state.conversation(id).is_none() {
            // Deny consults for conversations that no longer exist so the
            // session is not left hanging on an answer.
            if let AgentEvent::CanUseTool { tool_use_id, .. } = event {
                let outcome = PermissionOutcome::Deny {
                    reason: "Unknown conversation".to_string(),
                };
                if let Err(e) = self
                    .deps
                    .driver
                    .respond_permission(id, &tool_use_id, outcome)
                    .await
                {
                    warn!("deny for unknown conversation {id} failed: {e}");
                }
            } else {
                debug!("event for unknown conversation {id} dropped");
            }
            return;
        }

        match event {
            AgentEvent::State { state } => self.agent_state(id, state).await,
            AgentEvent::TextComplete { text } => {
                let entry = entry_now(HistoryKind::AgentText, Some(text));
                self.append_and_relay(id, entry).await;
                self.notify_unread(id).await;
            }
            AgentEvent::ToolInfo {
                tool_use_id,
                tool_name,
                tool_input,
            } => {
                let mut entry = entry_now(HistoryKind::ToolUse, None);
                entry.tool_use_id = Some(tool_use_id);
                entry.tool_name = Some(tool_name);
                entry.payload = Some(json!({ "toolInput": tool_input }));
                self.append_and_relay(id, entry).await;
            }
            AgentEvent::ToolComplete {
                tool_use_id,
                tool_name,
                result,
                is_error,
            } => {
                let attachments = if tool_name == ATTACHMENT_TOOL {
                    extract_attachments(&result)
                } else {
                    Vec::new()
                };
                let mut entry = entry_now(HistoryKind::ToolResult, None);
                entry.tool_use_id = Some(tool_use_id);
                entry.tool_name = Some(tool_name);
                entry.payload = Some(json!({ "result": result, "isError": is_error }));
                self.append_and_relay(id, entry).await;
                for attachment in attachments {
                    let name = attachment
                        .get("fileName")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let mut entry = entry_now(HistoryKind::FileAttachment, name);
                    entry.payload = Some(attachment);
                    self.append_and_relay(id, entry).await;
                }
                self.notify_unread(id).await;
            }
            AgentEvent::Error { message } => {
                warn!("agent error in {id}: {message}");
                self.pending_requests.remove(&id);
                let mut entry = entry_now(HistoryKind::Event, Some(message));
                entry.payload = Some(json!({ "error": true }));
                self.append_and_relay(id, entry).await;
            }
            AgentEvent::Result { usage, cost_usd } => {
                self.usage.turns += 1;
                if let Some(cost) = cost_usd {
                    self.usage.cost_usd += cost;
                }
                self.usage.last_usage = usage.clone();
                self.pending_requests.remove(&id);
                let mut entry = entry_now(HistoryKind::Event, None);
                entry.payload = Some(json!({ "usage": usage, "costUsd": cost_usd }));
                self.append_and_relay(id, entry).await;
                self.notify_unread(id).await;
            }
            AgentEvent::ClaudeAborted => {
                self.pending_requests.remove(&id);
                let entry = entry_now(HistoryKind::Event, Some("turn aborted".to_string()));
                self.append_and_relay(id, entry).await;
                self.notify_unread(id).await;
            }
            AgentEvent::Init { session_token } => {
                if let Some(conversation) = self.state.conversation_mut(id) {
                    conversation.session_token = Some(session_token);
                }
                // Losing the token orphans the session, so skip the debounce.
                self.persist_workspaces_now();
            }
            AgentEvent::CanUseTool {
                tool_use_id,
                tool_name,
                tool_input,
            } => self.can_use_tool(id, tool_use_id, tool_name, tool_input).await,
        }
    }

    async fn agent_state(&mut self, id: ConversationId, status: ConversationStatus) {
        if let Some(conversation) = self.state.conversation_mut(id) {
            conversation.status = status;
        }
        if status == ConversationStatus::Idle {
            self.pending_requests.remove(&id);
        }
        self.schedule_workspaces_save();
        self.broadcast(ServerMessage::ConversationStatus {
            conversation_id: id,
            status: Some(status),
            unread: None,
        })
        .await;
    }

    async fn append_and_relay(&mut self, id: ConversationId, entry: HistoryEntry) {
        if self.append_entry(id, entry.clone()).await {
            self.send_viewers(
                id,
                ServerMessage::ConversationMessage {
                    conversation_id: id,
                    entry,
                },
            )
            .await;
        }
    }

    /// Mark the conversation unread and notify connected non-viewers, at
    /// most once per client until they visit it again.
    async fn notify_unread(&mut self, id: ConversationId) {
        let targets = self.viewers.unread_targets(id);
        if targets.is_empty() {
            return;
        }
        let newly_unread = match self.state.conversation_mut(id) {
            Some(conversation) if !conversation.unread => {
                conversation.unread = true;
                true
            }
            _ => false,
        };
        if newly_unread {
            self.schedule_workspaces_save();
        }
        self.send(OutboundEnvelope::to_many(
            targets,
            ServerMessage::ConversationStatus {
                conversation_id: id,
                status: None,
                unread: Some(true),
            },
        ))
        .await;
    }

    /// Run a tool consult through the policy; only an `Ask` reaches a human.
    async fn can_use_tool(
        &mut self,
        id: ConversationId,
        tool_use_id: String,
        tool_name: String,
        tool_input: Value,
    ) {
        let mode = self
            .state
            .conversation(id)
            .map(|c| c.permission_mode)
            .unwrap_or_default();
        match permission::decide(&tool_name, &tool_input, mode) {
            PermissionDecision::Allow { updated_input } => {
                let outcome = PermissionOutcome::Allow {
                    updated_input,
                    always: false,
                };
                if let Err(e) = self
                    .deps
                    .driver
                    .respond_permission(id, &tool_use_id, outcome)
                    .await
                {
                    warn!("permission allow delivery for {id} failed: {e}");
                }
            }
            PermissionDecision::Deny { reason } => {
                debug!("denied {tool_name} in {id}: {reason}");
                let outcome = PermissionOutcome::Deny { reason };
                if let Err(e) = self
                    .deps
                    .driver
                    .respond_permission(id, &tool_use_id, outcome)
                    .await
                {
                    warn!("permission deny delivery for {id} failed: {e}");
                }
            }
            PermissionDecision::Ask => {
                let pending = if tool_name == QUESTION_TOOL {
                    let (question, options) = parse_question(&tool_input);
                    PendingRequest::Question {
                        question_id: tool_use_id,
                        question,
                        options,
                    }
                } else {
                    PendingRequest::Permission {
                        tool_use_id,
                        tool_name,
                        tool_input,
                    }
                };
                self.pending_requests.insert(id, pending.clone());
                self.send_viewers(id, pending.to_message(id)).await;
                self.broadcast(ServerMessage::State {
                    conversation_id: id,
                    state: LiveStatus::Permission,
                })
                .await;
            }
        }
    }
}

/// Attachment metadata carried in the side-channel tool's result.
fn extract_attachments(result: &Value) -> Vec<Value> {
    result
        .get("attachments")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Pull the first question and its option labels out of the question tool's
/// input. Options may be plain strings or `{label}` objects.
fn parse_question(input: &Value) -> (String, Vec<String>) {
    let first = input
        .get("questions")
        .and_then(Value::as_array)
        .and_then(|questions| questions.first())
        .unwrap_or(input);
    let question = first
        .get("question")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let options = first
        .get("options")
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|option| {
                    option
                        .as_str()
                        .map(str::to_string)
                        .or_else(|| option.get("label").and_then(Value::as_str).map(str::to_string))
                })
                .collect()
        })
        .unwrap_or_default();
    (question, options)
}
