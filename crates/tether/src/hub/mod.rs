//! The routing hub.
//!
//! One task owns all mutable state — workspace model, history caches,
//! viewer registry, debounce timers — and consumes a single input channel,
//! so handlers never contend on locks. Anything slow (persistence,
//! thumbnails, subprocess control) is pushed onto detached tasks holding
//! clones of what they need.
//!
//! Inputs are client envelopes from the relay, events from the agent
//! driver, and the shutdown signal. Fired debounce timers arrive on a
//! separate flush channel polled in the same select.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use tether_id::{ConversationId, DeviceId};
use tether_protocol::{
    AgentEvent, ClientMessage, Envelope, HistoryEntry, HistoryKind, OutboundEnvelope,
    PendingFile, ServerMessage, WorkspaceState,
};

use crate::driver::AgentDriver;
use crate::history::{HistoryCache, PAGE_BYTE_CAP};
use crate::persist::{SaveKey, SaveScheduler};
use crate::relay::RelayTransport;
use crate::store::{HistoryStore, WorkspaceStore};

mod agent;
mod conversations;
mod files;
mod viewers;
mod workspaces;

pub use files::{NoopThumbnailer, Thumbnailer};
pub use viewers::ViewerRegistry;

/// Hub inputs, merged onto one channel.
pub enum HubInput {
    /// An envelope from the relay.
    Inbound(Envelope),
    /// An event from the agent driver.
    Agent(ConversationId, AgentEvent),
    /// Begin ordered shutdown.
    Shutdown,
}

/// Static hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// This hub's own (host) device identity; new workspaces allocate under
    /// it.
    pub device_id: DeviceId,
    /// Debounce for status/unread/activation changes to the workspace store.
    pub status_debounce: Duration,
    /// Debounce for history appends.
    pub history_debounce: Duration,
    /// Byte cap for one history page.
    pub page_byte_cap: usize,
}

impl HubConfig {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            status_debounce: Duration::from_millis(500),
            history_debounce: Duration::from_millis(1000),
            page_byte_cap: PAGE_BYTE_CAP,
        }
    }
}

/// Everything the hub delegates to.
pub struct HubDeps {
    pub transport: Arc<dyn RelayTransport>,
    pub driver: Arc<dyn AgentDriver>,
    pub workspaces: Arc<dyn WorkspaceStore>,
    pub histories: Arc<dyn HistoryStore>,
    pub thumbnailer: Arc<dyn Thumbnailer>,
}

/// A permission or question consult waiting on a human.
#[derive(Debug, Clone)]
pub(crate) enum PendingRequest {
    Permission {
        tool_use_id: String,
        tool_name: String,
        tool_input: Value,
    },
    Question {
        question_id: String,
        question: String,
        options: Vec<String>,
    },
}

impl PendingRequest {
    /// The wire message that presents this consult to a client.
    pub(crate) fn to_message(&self, id: ConversationId) -> ServerMessage {
        match self {
            PendingRequest::Permission {
                tool_use_id,
                tool_name,
                tool_input,
            } => ServerMessage::PermissionRequest {
                conversation_id: id,
                tool_use_id: tool_use_id.clone(),
                tool_name: tool_name.clone(),
                tool_input: tool_input.clone(),
            },
            PendingRequest::Question {
                question_id,
                question,
                options,
            } => ServerMessage::QuestionRequest {
                conversation_id: id,
                question_id: question_id.clone(),
                question: question.clone(),
                options: options.clone(),
            },
        }
    }
}

/// An uploaded blob held until a send references it.
pub(crate) struct StoredFile {
    pub meta: PendingFile,
    pub data: String,
}

/// Running usage totals accumulated from turn results.
#[derive(Debug, Clone, Default)]
pub(crate) struct UsageTotals {
    pub turns: u64,
    pub cost_usd: f64,
    pub last_usage: Value,
}

pub struct Hub {
    config: HubConfig,
    deps: HubDeps,
    state: WorkspaceState,
    history: HistoryCache,
    viewers: ViewerRegistry,
    scheduler: SaveScheduler,
    pending_requests: HashMap<ConversationId, PendingRequest>,
    pending_files: HashMap<ConversationId, HashMap<String, StoredFile>>,
    usage: UsageTotals,
}

impl Hub {
    /// Build a hub and the flush channel its run loop polls.
    pub fn new(config: HubConfig, deps: HubDeps) -> (Self, mpsc::UnboundedReceiver<SaveKey>) {
        let (scheduler, flush_rx) = SaveScheduler::new();
        (
            Self {
                config,
                deps,
                state: WorkspaceState::default(),
                history: HistoryCache::new(),
                viewers: ViewerRegistry::new(),
                scheduler,
                pending_requests: HashMap::new(),
                pending_files: HashMap::new(),
                usage: UsageTotals::default(),
            },
            flush_rx,
        )
    }

    /// Reconcile persisted state, then dispatch until shutdown.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<HubInput>,
        mut flush_rx: mpsc::UnboundedReceiver<SaveKey>,
    ) -> Result<()> {
        self.reconcile().await?;
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(HubInput::Inbound(envelope)) => self.handle_envelope(envelope).await,
                    Some(HubInput::Agent(id, event)) => self.handle_agent_event(id, event).await,
                    Some(HubInput::Shutdown) | None => break,
                },
                Some(key) = flush_rx.recv() => {
                    self.scheduler.acknowledge(key);
                    self.flush(key);
                }
            }
        }
        self.shutdown(&mut flush_rx).await;
        Ok(())
    }

    // -- Dispatch ---------------------------------------------------------

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let Some(peer) = envelope.from else {
            trace!(kind = %envelope.kind, "envelope without sender dropped");
            return;
        };
        self.viewers.client_seen(peer.device_id, peer.name);
        let Some(message) = ClientMessage::parse(&envelope.kind, envelope.payload.as_ref()) else {
            trace!(kind = %envelope.kind, "unparseable message dropped");
            return;
        };
        self.dispatch(peer.device_id, message).await;
    }

    async fn dispatch(&mut self, sender: DeviceId, message: ClientMessage) {
        use ClientMessage as C;
        match message {
            C::WorkspaceList => self.workspace_list(sender).await,
            C::WorkspaceCreate { name, working_dir } => {
                self.workspace_create(sender, name, working_dir).await;
            }
            C::WorkspaceDelete { workspace_id } => {
                self.workspace_delete(sender, workspace_id).await;
            }
            C::WorkspaceRename { workspace_id, name } => {
                self.workspace_update(workspace_id, Some(name), None).await;
            }
            C::WorkspaceUpdate {
                workspace_id,
                name,
                working_dir,
            } => self.workspace_update(workspace_id, name, working_dir).await,
            C::WorkspaceReorder { order } => self.workspace_reorder(order).await,
            C::WorkspaceSwitch { workspace_id } => self.workspace_switch(workspace_id).await,

            C::ConversationCreate { workspace_id, name } => {
                self.conversation_create(workspace_id, name).await;
            }
            C::ConversationDelete { conversation_id } => {
                self.conversation_delete(conversation_id).await;
            }
            C::ConversationRename {
                conversation_id,
                name,
            } => self.conversation_rename(conversation_id, name).await,
            C::ConversationSelect {
                conversation_id,
                workspace_id,
            } => self.conversation_select(sender, conversation_id, workspace_id).await,
            C::ConversationReorder {
                workspace_id,
                order,
            } => self.conversation_reorder(workspace_id, order).await,

            C::ClaudeSend {
                conversation_id,
                message,
                attached_file_ids,
                attachments,
            } => {
                self.claude_send(conversation_id, message, attached_file_ids, attachments)
                    .await;
            }
            C::ClaudePermission {
                conversation_id,
                tool_use_id,
                decision,
            } => self.claude_permission(conversation_id, tool_use_id, decision).await,
            C::ClaudeQuestionResponse {
                conversation_id,
                question_id,
                answer,
            } => {
                self.claude_question_response(conversation_id, question_id, answer)
                    .await;
            }
            C::ClaudeControl {
                conversation_id,
                action,
            } => self.claude_control(conversation_id, action).await,
            C::ClaudeSetPermissionMode {
                conversation_id,
                mode,
            } => self.claude_set_permission_mode(conversation_id, mode).await,

            C::HistoryRequest {
                conversation_id,
                cursor,
            } => self.history_request(sender, conversation_id, cursor).await,

            C::FileUpload {
                conversation_id,
                file_name,
                data,
                mime_type,
            } => self.file_upload(sender, conversation_id, file_name, data, mime_type),
            C::FileFetch {
                conversation_id,
                file_id,
            } => self.file_fetch(sender, conversation_id, file_id).await,
            C::FolderList { path } => self.folder_list(sender, path),
            C::DriveList => self.drive_list(sender).await,
            C::WorkerStart { task, working_dir } => self.worker_start(sender, task, working_dir),
            C::Ping => self.reply(sender, ServerMessage::Pong).await,
            C::UsageRequest => self.usage_request(sender).await,
            C::AccountSwitch { account_id } => self.account_switch(sender, account_id),
        }
    }

    // -- Startup and shutdown ---------------------------------------------

    /// Load persisted state and repair what a previous process left behind:
    /// sessions cannot survive a restart, so any conversation still marked
    /// working or waiting is forced idle with a synthetic closing entry.
    async fn reconcile(&mut self) -> Result<()> {
        self.state = self
            .deps
            .workspaces
            .load()
            .await
            .context("load workspace store")?
            .unwrap_or_default();

        let ids: Vec<ConversationId> = self
            .state
            .workspaces
            .iter()
            .flat_map(|w| w.conversations.iter().map(|c| c.id))
            .collect();
        for id in &ids {
            let entries = self
                .deps
                .histories
                .load(*id)
                .await
                .with_context(|| format!("load history for {id}"))?;
            self.history.insert(*id, entries);
        }

        let mut interrupted = Vec::new();
        for workspace in &mut self.state.workspaces {
            for conversation in &mut workspace.conversations {
                if matches!(
                    conversation.status,
                    tether_protocol::ConversationStatus::Working
                        | tether_protocol::ConversationStatus::Waiting
                ) {
                    conversation.status = tether_protocol::ConversationStatus::Idle;
                    interrupted.push(conversation.id);
                }
            }
        }
        for id in interrupted {
            let entry = HistoryEntry {
                id: uuid::Uuid::new_v4().to_string(),
                kind: HistoryKind::Event,
                text: Some("session ended".to_string()),
                tool_use_id: None,
                tool_name: None,
                payload: Some(json!({"reason": "hub restart"})),
                created_at: now_ms(),
            };
            if self.history.append(id, entry) {
                if let Some(entries) = self.history.entries(id) {
                    self.deps
                        .histories
                        .save(id, entries)
                        .await
                        .with_context(|| format!("persist reconciled history for {id}"))?;
                }
            }
        }

        self.deps
            .workspaces
            .save(&self.state)
            .await
            .context("persist reconciled workspace state")?;
        info!(
            "reconciled {} workspace(s), {} conversation(s)",
            self.state.workspaces.len(),
            ids.len()
        );
        Ok(())
    }

    /// Ordered teardown: cancel timers, flush whatever they covered, write
    /// the workspace store, stop the sessions, close the transport.
    async fn shutdown(&mut self, flush_rx: &mut mpsc::UnboundedReceiver<SaveKey>) {
        info!("hub shutting down");
        let mut keys = self.scheduler.drain();
        while let Ok(key) = flush_rx.try_recv() {
            keys.push(key);
        }
        keys.sort_by_key(|k| match k {
            SaveKey::Workspaces => 0u64,
            SaveKey::Conversation(id) => u64::from(id.raw()) + 1,
        });
        keys.dedup();

        for key in keys {
            if let SaveKey::Conversation(id) = key {
                if let Some(entries) = self.history.entries(id) {
                    if let Err(e) = self.deps.histories.save(id, entries).await {
                        warn!("final history save for {id} failed: {e}");
                    }
                }
            }
        }
        // The workspace store is always written, dirty or not.
        if let Err(e) = self.deps.workspaces.save(&self.state).await {
            warn!("final workspace save failed: {e}");
        }
        self.deps.driver.cleanup().await;
        self.deps.transport.disconnect().await;
    }

    // -- Persistence ------------------------------------------------------

    fn flush(&self, key: SaveKey) {
        match key {
            SaveKey::Workspaces => self.save_workspaces_detached(),
            SaveKey::Conversation(id) => self.save_history_detached(id),
        }
    }

    /// Fire-and-forget workspace-store save of the current state.
    fn save_workspaces_detached(&self) {
        let store = Arc::clone(&self.deps.workspaces);
        let state = self.state.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&state).await {
                warn!("workspace save failed: {e}");
            }
        });
    }

    /// Fire-and-forget history save from the current cache snapshot.
    fn save_history_detached(&self, id: ConversationId) {
        let Some(entries) = self.history.entries(id) else {
            return;
        };
        let entries = entries.to_vec();
        let store = Arc::clone(&self.deps.histories);
        tokio::spawn(async move {
            if let Err(e) = store.save(id, &entries).await {
                warn!("history save for {id} failed: {e}");
            }
        });
    }

    /// Structural mutation: persist now, superseding any pending debounce.
    fn persist_workspaces_now(&mut self) {
        self.scheduler.cancel(SaveKey::Workspaces);
        self.save_workspaces_detached();
    }

    fn schedule_workspaces_save(&mut self) {
        self.scheduler
            .schedule(SaveKey::Workspaces, self.config.status_debounce);
    }

    fn schedule_history_save(&mut self, id: ConversationId) {
        self.scheduler
            .schedule(SaveKey::Conversation(id), self.config.history_debounce);
    }

    // -- History helpers --------------------------------------------------

    /// Load a conversation's history into the cache if absent. `false` means
    /// the load failed; callers drop the operation rather than risk running
    /// against an empty cache that would later overwrite real history.
    async fn ensure_history_loaded(&mut self, id: ConversationId) -> bool {
        if self.history.is_loaded(id) {
            return true;
        }
        match self.deps.histories.load(id).await {
            Ok(entries) => {
                self.history.insert(id, entries);
                true
            }
            Err(e) => {
                warn!("history load for {id} failed: {e}");
                false
            }
        }
    }

    /// Append to a loaded cache and schedule its debounced save.
    async fn append_entry(&mut self, id: ConversationId, entry: HistoryEntry) -> bool {
        if !self.ensure_history_loaded(id).await {
            return false;
        }
        if !self.history.append(id, entry) {
            debug!("append to unloaded history {id} dropped");
            return false;
        }
        self.schedule_history_save(id);
        true
    }

    /// Evict a cache nobody needs anymore, flushing any buffered entries
    /// first.
    fn maybe_unload(&mut self, id: ConversationId) {
        if self.viewers.has_viewers(id) || self.deps.driver.has_active_session(id) {
            return;
        }
        if self.scheduler.is_pending(SaveKey::Conversation(id)) {
            self.scheduler.cancel(SaveKey::Conversation(id));
            self.save_history_detached(id);
        }
        self.history.unload(id);
        debug!("unloaded history cache for {id}");
    }

    // -- Send helpers -----------------------------------------------------

    async fn send(&self, envelope: OutboundEnvelope) {
        if let Err(e) = self.deps.transport.send(envelope).await {
            warn!("relay send failed: {e}");
        }
    }

    async fn reply(&self, device: DeviceId, message: ServerMessage) {
        self.send(OutboundEnvelope::to(device, message)).await;
    }

    async fn broadcast(&self, message: ServerMessage) {
        self.send(OutboundEnvelope::broadcast(message)).await;
    }

    /// Send to the current viewers of a conversation, if any.
    async fn send_viewers(&self, id: ConversationId, message: ServerMessage) {
        let targets = self.viewers.viewers_of(id);
        if !targets.is_empty() {
            self.send(OutboundEnvelope::to_many(targets, message)).await;
        }
    }

    fn workspace_snapshot(&self) -> ServerMessage {
        ServerMessage::WorkspaceUpdated {
            workspaces: self.state.workspaces.clone(),
            active_workspace: self.state.active_workspace,
            active_conversation: self.state.active_conversation,
        }
    }

    async fn broadcast_workspaces(&self) {
        self.broadcast(self.workspace_snapshot()).await;
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build a history entry, assigning a fresh id and timestamp.
pub(crate) fn entry_now(kind: HistoryKind, text: Option<String>) -> HistoryEntry {
    HistoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        kind,
        text,
        tool_use_id: None,
        tool_name: None,
        payload: None,
        created_at: now_ms(),
    }
}
