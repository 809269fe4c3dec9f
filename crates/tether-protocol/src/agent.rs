//! Events arriving from the agent driver.
//!
//! The driver serializes events per conversation; the hub appends each to
//! history first, then fans out to viewers (state changes broadcast to all).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ConversationStatus;

/// Name of the MCP tool whose results carry the file-attachment
/// side-channel. A `toolComplete` for this tool is inspected for attachment
/// metadata instead of being treated as a plain tool result.
pub const ATTACHMENT_TOOL: &str = "mcp__tether__attach_file";

/// Agent-driver event envelope: `{type, ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    /// Session state change; broadcast to all clients, not just viewers.
    State { state: ConversationStatus },

    /// A completed block of assistant text.
    #[serde(rename_all = "camelCase")]
    TextComplete { text: String },

    /// A tool invocation has started.
    #[serde(rename_all = "camelCase")]
    ToolInfo {
        tool_use_id: String,
        tool_name: String,
        #[serde(default)]
        tool_input: Value,
    },

    /// A tool invocation has finished.
    #[serde(rename_all = "camelCase")]
    ToolComplete {
        tool_use_id: String,
        tool_name: String,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        is_error: bool,
    },

    /// The session hit an error.
    Error { message: String },

    /// Turn finished, with usage/cost accounting.
    #[serde(rename_all = "camelCase")]
    Result {
        #[serde(default)]
        usage: Value,
        #[serde(default)]
        cost_usd: Option<f64>,
    },

    /// The user aborted the turn.
    ClaudeAborted,

    /// Session initialized; carries the externally assigned token the hub
    /// persists so the session can be resumed later.
    #[serde(rename_all = "camelCase")]
    Init { session_token: String },

    /// The driver asks whether the agent may invoke a tool. The hub answers
    /// through the permission policy, or forwards the question to a human.
    #[serde(rename_all = "camelCase")]
    CanUseTool {
        tool_use_id: String,
        tool_name: String,
        #[serde(default)]
        tool_input: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_tags_are_camel_case() {
        let event: AgentEvent =
            serde_json::from_value(json!({"type": "textComplete", "text": "hi"})).unwrap();
        assert!(matches!(event, AgentEvent::TextComplete { ref text } if text == "hi"));

        let event: AgentEvent = serde_json::from_value(json!({"type": "claudeAborted"})).unwrap();
        assert!(matches!(event, AgentEvent::ClaudeAborted));
    }

    #[test]
    fn test_state_event_carries_status() {
        let event: AgentEvent =
            serde_json::from_value(json!({"type": "state", "state": "working"})).unwrap();
        match event {
            AgentEvent::State { state } => assert_eq!(state, ConversationStatus::Working),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_tool_input_defaults_to_null() {
        let event: AgentEvent = serde_json::from_value(
            json!({"type": "canUseTool", "toolUseId": "t1", "toolName": "Bash"}),
        )
        .unwrap();
        match event {
            AgentEvent::CanUseTool { tool_input, .. } => assert!(tool_input.is_null()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
