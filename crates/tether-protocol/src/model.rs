//! Workspace and conversation model shared by the hub, the stores and the
//! wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_id::{ConversationId, WorkspaceId};

/// Conversation status as driven by the agent session.
///
/// `permission` is deliberately not a member: it is a derived sub-state
/// computed at read time from a pending permission/question, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Idle,
    Working,
    Waiting,
    Error,
}

/// The status a client should display right now, computed on select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Idle,
    Working,
    Permission,
}

/// Tool permission mode for a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

/// A conversation within a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub name: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Externally assigned agent-session token, persisted for resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// 0-based position within the workspace ordering.
    #[serde(default)]
    pub position: u32,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl Conversation {
    pub fn new(id: ConversationId, name: impl Into<String>, created_at: i64) -> Self {
        Self {
            id,
            name: name.into(),
            status: ConversationStatus::Idle,
            unread: false,
            permission_mode: PermissionMode::Default,
            session_token: None,
            position: 0,
            created_at,
        }
    }
}

/// A workspace: a named working directory holding an ordered sequence of
/// conversations. Created with zero conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub working_dir: String,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    /// 0-based position within the workspace list ordering.
    #[serde(default)]
    pub position: u32,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl Workspace {
    pub fn new(
        id: WorkspaceId,
        name: impl Into<String>,
        working_dir: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            working_dir: working_dir.into(),
            conversations: Vec::new(),
            position: 0,
            created_at,
        }
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversation_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }
}

/// The single persisted workspace-store document: every workspace, ordering
/// and the active selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workspace: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_conversation: Option<ConversationId>,
}

impl WorkspaceState {
    pub fn workspace(&self, id: WorkspaceId) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == id)
    }

    pub fn workspace_mut(&mut self, id: WorkspaceId) -> Option<&mut Workspace> {
        self.workspaces.iter_mut().find(|w| w.id == id)
    }

    /// Find a conversation anywhere in the state.
    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.workspaces.iter().find_map(|w| w.conversation(id))
    }

    pub fn conversation_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.workspaces
            .iter_mut()
            .find_map(|w| w.conversation_mut(id))
    }
}

/// One persisted history entry of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub kind: HistoryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Structured extras: tool input/result, usage, attachment metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// History entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    UserText,
    AgentText,
    ToolUse,
    ToolResult,
    FileAttachment,
    /// Session-level marker, e.g. the synthetic "session ended" entry.
    Event,
}

/// Inline attachment carried on a send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64 payload for inline attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// An uploaded-but-unattached blob, waiting to be referenced by a send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFile {
    pub id: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size: u64,
    /// Unix milliseconds.
    pub uploaded_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}
