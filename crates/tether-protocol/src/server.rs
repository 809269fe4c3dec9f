//! Outbound messages the hub emits through the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_id::{ConversationId, DeviceId, WorkspaceId};

use crate::envelope::{Broadcast, Targets};
use crate::model::{
    ConversationStatus, HistoryEntry, LiveStatus, PendingFile, Workspace,
};

/// All outbound message types, tagged by `type` with the payload under
/// `payload` — the mirror of [`crate::ClientMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    // -- Replies and broadcasts for workspace/conversation lifecycle --
    #[serde(rename_all = "camelCase")]
    WorkspaceListResult {
        workspaces: Vec<Workspace>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_workspace: Option<WorkspaceId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_conversation: Option<ConversationId>,
    },
    /// Broadcast after any workspace/conversation mutation; carries the full
    /// list so every client converges on the same ordering.
    #[serde(rename_all = "camelCase")]
    WorkspaceUpdated {
        workspaces: Vec<Workspace>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_workspace: Option<WorkspaceId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_conversation: Option<ConversationId>,
    },

    // -- Conversation status fan-out --
    /// `status` and `unread` are independent optional fields on purpose: an
    /// unread notice must not override the status a client is displaying.
    #[serde(rename_all = "camelCase")]
    ConversationStatus {
        conversation_id: ConversationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ConversationStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unread: Option<bool>,
    },

    // -- History --
    #[serde(rename_all = "camelCase")]
    HistoryResult {
        conversation_id: ConversationId,
        messages: Vec<HistoryEntry>,
        current_status: LiveStatus,
        has_more: bool,
        total: u32,
    },
    /// One history entry fanned out to current viewers as it happens.
    #[serde(rename_all = "camelCase")]
    ConversationMessage {
        conversation_id: ConversationId,
        entry: HistoryEntry,
    },

    // -- Agent interaction --
    #[serde(rename_all = "camelCase")]
    PermissionRequest {
        conversation_id: ConversationId,
        tool_use_id: String,
        tool_name: String,
        tool_input: Value,
    },
    #[serde(rename_all = "camelCase")]
    QuestionRequest {
        conversation_id: ConversationId,
        question_id: String,
        question: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
    /// Live state marker; also replayed synthetically as
    /// `state: "permission"` before a replayed request on reconnect.
    #[serde(rename_all = "camelCase")]
    State {
        conversation_id: ConversationId,
        state: LiveStatus,
    },

    // -- Blob transfer --
    #[serde(rename_all = "camelCase")]
    FileUploadResult {
        conversation_id: ConversationId,
        file: PendingFile,
    },
    #[serde(rename_all = "camelCase")]
    FileFetchResult {
        conversation_id: ConversationId,
        file_id: String,
        /// Base64 content; absent when the blob is gone.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },

    // -- Folder/drive --
    FolderListResult {
        path: String,
        entries: Vec<FolderEntry>,
    },
    DriveListResult { drives: Vec<String> },

    // -- Task/worker --
    #[serde(rename_all = "camelCase")]
    WorkerStartResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_id: Option<String>,
        ok: bool,
    },

    // -- Diagnostics / account --
    Pong,
    UsageResult { usage: Value },
    #[serde(rename_all = "camelCase")]
    AccountSwitchResult { account_id: String, ok: bool },
}

/// One entry of a folder listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Outbound transport envelope: a [`ServerMessage`] plus routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Targets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Broadcast>,
}

impl OutboundEnvelope {
    /// Address a direct reply to one device.
    pub fn to(device: DeviceId, message: ServerMessage) -> Self {
        Self {
            message,
            to: Some(Targets::One(device)),
            broadcast: None,
        }
    }

    /// Address a message to a set of devices.
    pub fn to_many(devices: Vec<DeviceId>, message: ServerMessage) -> Self {
        Self {
            message,
            to: Some(Targets::Many(devices)),
            broadcast: None,
        }
    }

    /// Broadcast to every connected client.
    pub fn broadcast(message: ServerMessage) -> Self {
        Self {
            message,
            to: None,
            broadcast: Some(Broadcast::Clients),
        }
    }
}
