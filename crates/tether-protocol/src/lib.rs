//! Canonical protocol types for Tether hub communication.
//!
//! Three surfaces meet in the hub and all of them are defined here:
//!
//! - the relay transport envelope and the client messages it carries
//!   ([`envelope`], [`client`]);
//! - the outbound messages the hub emits back through the relay ([`server`]);
//! - the event stream arriving from the agent driver ([`agent`]).
//!
//! Payloads are tagged unions: one variant per wire `type`, with
//! required-field validation done by serde at the boundary. A payload that
//! fails to deserialize is a malformed message and the hub drops it silently.

pub mod agent;
pub mod client;
pub mod envelope;
pub mod model;
pub mod server;

pub use agent::{AgentEvent, ATTACHMENT_TOOL};
pub use client::{ClientMessage, ControlAction, PermissionResponse};
pub use envelope::{Broadcast, Envelope, Peer, Targets};
pub use model::{
    Attachment, Conversation, ConversationStatus, HistoryEntry, HistoryKind, LiveStatus,
    PendingFile, PermissionMode, Workspace, WorkspaceState,
};
pub use server::{FolderEntry, OutboundEnvelope, ServerMessage};
