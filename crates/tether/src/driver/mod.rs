//! Agent driver seam.
//!
//! The hub routes messages; the driver owns the agent sessions behind them.
//! Commands flow down through [`AgentDriver`], events come back as
//! [`tether_protocol::AgentEvent`]s on a channel the hub consumes. The
//! production implementation spawns one agent subprocess per conversation
//! ([`process`]); tests substitute a scripted stub.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use tether_id::ConversationId;
use tether_protocol::PermissionMode;

pub mod process;

pub use process::ProcessDriver;

/// What a session needs to start or resume, snapshotted from the
/// conversation at send time.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub working_dir: String,
    pub session_token: Option<String>,
    pub permission_mode: PermissionMode,
}

/// Answer to a `canUseTool` consult.
#[derive(Debug, Clone)]
pub enum PermissionOutcome {
    Allow {
        updated_input: Value,
        /// Stop asking for this tool in this session.
        always: bool,
    },
    Deny {
        reason: String,
    },
}

/// Command lines written to an agent session's stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DriverCommand {
    #[serde(rename_all = "camelCase")]
    UserMessage { text: String },
    #[serde(rename_all = "camelCase")]
    PermissionResponse {
        tool_use_id: String,
        allow: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
        always: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    QuestionResponse { question_id: String, answer: String },
    Interrupt,
    Compact,
    #[serde(rename_all = "camelCase")]
    SetPermissionMode { mode: PermissionMode },
}

/// Hub-side view of the agent sessions.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    /// Deliver a user message, starting or resuming the session as needed.
    async fn send_message(
        &self,
        id: ConversationId,
        context: &SessionContext,
        text: &str,
    ) -> anyhow::Result<()>;

    /// Answer a pending `canUseTool` consult.
    async fn respond_permission(
        &self,
        id: ConversationId,
        tool_use_id: &str,
        outcome: PermissionOutcome,
    ) -> anyhow::Result<()>;

    /// Answer a pending user question.
    async fn respond_question(
        &self,
        id: ConversationId,
        question_id: &str,
        answer: &str,
    ) -> anyhow::Result<()>;

    /// Interrupt the current turn; the session stays alive.
    async fn stop(&self, id: ConversationId) -> anyhow::Result<()>;

    /// Tear the session down so the next send starts fresh.
    async fn end_session(&self, id: ConversationId) -> anyhow::Result<()>;

    /// Ask the session to compact its context.
    async fn compact(&self, id: ConversationId) -> anyhow::Result<()>;

    /// Propagate a permission-mode change into a live session.
    async fn set_permission_mode(
        &self,
        id: ConversationId,
        mode: PermissionMode,
    ) -> anyhow::Result<()>;

    /// Whether a live session exists for this conversation. Must be cheap;
    /// the hub calls it on every select.
    fn has_active_session(&self, id: ConversationId) -> bool;

    /// Switch the active agent account.
    async fn switch_account(&self, account_id: &str) -> anyhow::Result<()>;

    /// Launch a detached background worker; returns its id.
    async fn start_worker(&self, task: &str, working_dir: Option<&str>) -> anyhow::Result<String>;

    /// Tear down every live session. Called once, during shutdown.
    async fn cleanup(&self);
}
