//! Inbound client messages.
//!
//! One variant per wire `type`. Parsing is strict: a payload missing a
//! required field fails deserialization, and the hub treats that as a
//! malformed message to drop silently — a stale or mismatched client must
//! never crash the hub, and must not get an error reply it might misparse.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_id::{ConversationId, WorkspaceId};

use crate::model::{Attachment, PermissionMode};

/// Client decision on a pending permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionResponse {
    Allow,
    Deny,
    /// Allow and stop asking for this tool in this conversation.
    AllowAll,
}

/// Session control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Stop,
    NewSession,
    Compact,
}

/// All inbound message types, tagged by the envelope `type` with the typed
/// payload under `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    // -- Workspace lifecycle --
    WorkspaceList,
    #[serde(rename_all = "camelCase")]
    WorkspaceCreate { name: String, working_dir: String },
    #[serde(rename_all = "camelCase")]
    WorkspaceDelete { workspace_id: WorkspaceId },
    #[serde(rename_all = "camelCase")]
    WorkspaceRename { workspace_id: WorkspaceId, name: String },
    #[serde(rename_all = "camelCase")]
    WorkspaceUpdate {
        workspace_id: WorkspaceId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        working_dir: Option<String>,
    },
    WorkspaceReorder { order: Vec<WorkspaceId> },
    #[serde(rename_all = "camelCase")]
    WorkspaceSwitch { workspace_id: WorkspaceId },

    // -- Conversation lifecycle --
    #[serde(rename_all = "camelCase")]
    ConversationCreate {
        workspace_id: WorkspaceId,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ConversationDelete { conversation_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    ConversationRename {
        conversation_id: ConversationId,
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    ConversationSelect {
        conversation_id: ConversationId,
        #[serde(default)]
        workspace_id: Option<WorkspaceId>,
    },
    #[serde(rename_all = "camelCase")]
    ConversationReorder {
        workspace_id: WorkspaceId,
        order: Vec<ConversationId>,
    },

    // -- Agent interaction --
    #[serde(rename_all = "camelCase")]
    ClaudeSend {
        conversation_id: ConversationId,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        attached_file_ids: Vec<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    #[serde(rename_all = "camelCase")]
    ClaudePermission {
        conversation_id: ConversationId,
        tool_use_id: String,
        decision: PermissionResponse,
    },
    #[serde(rename_all = "camelCase")]
    ClaudeQuestionResponse {
        conversation_id: ConversationId,
        question_id: String,
        answer: String,
    },
    #[serde(rename_all = "camelCase")]
    ClaudeControl {
        conversation_id: ConversationId,
        action: ControlAction,
    },
    #[serde(rename_all = "camelCase")]
    ClaudeSetPermissionMode {
        conversation_id: ConversationId,
        mode: PermissionMode,
    },

    // -- History --
    #[serde(rename_all = "camelCase")]
    HistoryRequest {
        conversation_id: ConversationId,
        /// 0/omitted = most recent page; positive = messages strictly before
        /// this many already delivered.
        #[serde(default)]
        cursor: u32,
    },

    // -- Blob transfer relay-through --
    #[serde(rename_all = "camelCase")]
    FileUpload {
        conversation_id: ConversationId,
        file_name: String,
        /// Base64 content.
        data: String,
        #[serde(default)]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FileFetch {
        conversation_id: ConversationId,
        file_id: String,
    },

    // -- Folder/drive relay-through --
    FolderList { path: String },
    DriveList,

    // -- Task/worker relay-through --
    #[serde(rename_all = "camelCase")]
    WorkerStart {
        task: String,
        #[serde(default)]
        working_dir: Option<String>,
    },

    // -- Diagnostics --
    Ping,
    UsageRequest,

    // -- Account switching --
    #[serde(rename_all = "camelCase")]
    AccountSwitch { account_id: String },
}

impl ClientMessage {
    /// Parse an envelope `type` + `payload` pair into a typed message.
    ///
    /// Returns `None` for unknown types and for payloads missing required
    /// fields; both are dropped silently by the dispatcher.
    pub fn parse(kind: &str, payload: Option<&Value>) -> Option<ClientMessage> {
        let mut tagged = serde_json::Map::new();
        tagged.insert("type".into(), Value::String(kind.to_string()));
        if let Some(payload) = payload {
            tagged.insert("payload".into(), payload.clone());
        }
        serde_json::from_value(Value::Object(tagged)).ok()
    }
}
