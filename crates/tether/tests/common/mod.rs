//! Shared harness: a hub running against an in-memory store, a capturing
//! transport and a scripted driver.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether::driver::{AgentDriver, PermissionOutcome, SessionContext};
use tether::hub::{Hub, HubConfig, HubDeps, HubInput, NoopThumbnailer};
use tether::relay::RelayTransport;
use tether::store::MemoryStore;
use tether_id::{ConversationId, DeviceId, DeviceKind};
use tether_protocol::{AgentEvent, Envelope, OutboundEnvelope, Peer, PermissionMode};

/// Transport that records every envelope the hub sends.
#[derive(Default)]
pub struct CaptureTransport {
    sent: Mutex<Vec<OutboundEnvelope>>,
    disconnected: AtomicBool,
}

impl CaptureTransport {
    /// Everything sent so far, as JSON values for easy assertions.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|envelope| serde_json::to_value(envelope).unwrap())
            .collect()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayTransport for CaptureTransport {
    async fn send(&self, envelope: OutboundEnvelope) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Send {
        id: ConversationId,
        text: String,
    },
    Permission {
        id: ConversationId,
        tool_use_id: String,
        allow: bool,
        always: bool,
    },
    Question {
        id: ConversationId,
        question_id: String,
        answer: String,
    },
    Stop(ConversationId),
    EndSession(ConversationId),
    Compact(ConversationId),
    SetMode(ConversationId, PermissionMode),
}

/// Driver that records calls; a send marks the session active.
#[derive(Default)]
pub struct ScriptedDriver {
    active: Mutex<HashSet<ConversationId>>,
    calls: Mutex<Vec<DriverCall>>,
}

impl ScriptedDriver {
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_active(&self, id: ConversationId, active: bool) {
        let mut set = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    fn record(&self, call: DriverCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl AgentDriver for ScriptedDriver {
    async fn send_message(
        &self,
        id: ConversationId,
        _context: &SessionContext,
        text: &str,
    ) -> anyhow::Result<()> {
        self.set_active(id, true);
        self.record(DriverCall::Send {
            id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn respond_permission(
        &self,
        id: ConversationId,
        tool_use_id: &str,
        outcome: PermissionOutcome,
    ) -> anyhow::Result<()> {
        let (allow, always) = match outcome {
            PermissionOutcome::Allow { always, .. } => (true, always),
            PermissionOutcome::Deny { .. } => (false, false),
        };
        self.record(DriverCall::Permission {
            id,
            tool_use_id: tool_use_id.to_string(),
            allow,
            always,
        });
        Ok(())
    }

    async fn respond_question(
        &self,
        id: ConversationId,
        question_id: &str,
        answer: &str,
    ) -> anyhow::Result<()> {
        self.record(DriverCall::Question {
            id,
            question_id: question_id.to_string(),
            answer: answer.to_string(),
        });
        Ok(())
    }

    async fn stop(&self, id: ConversationId) -> anyhow::Result<()> {
        self.record(DriverCall::Stop(id));
        Ok(())
    }

    async fn end_session(&self, id: ConversationId) -> anyhow::Result<()> {
        self.set_active(id, false);
        self.record(DriverCall::EndSession(id));
        Ok(())
    }

    async fn compact(&self, id: ConversationId) -> anyhow::Result<()> {
        self.record(DriverCall::Compact(id));
        Ok(())
    }

    async fn set_permission_mode(
        &self,
        id: ConversationId,
        mode: PermissionMode,
    ) -> anyhow::Result<()> {
        self.record(DriverCall::SetMode(id, mode));
        Ok(())
    }

    fn has_active_session(&self, id: ConversationId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    async fn switch_account(&self, _account_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start_worker(
        &self,
        _task: &str,
        _working_dir: Option<&str>,
    ) -> anyhow::Result<String> {
        Ok("worker-1".to_string())
    }

    async fn cleanup(&self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// A hub running on its own task, plus handles to its collaborators.
pub struct TestHub {
    pub input: mpsc::Sender<HubInput>,
    pub transport: Arc<CaptureTransport>,
    pub driver: Arc<ScriptedDriver>,
    pub store: Arc<MemoryStore>,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// The hub's own host device identity used by the tests.
pub fn hub_device() -> DeviceId {
    DeviceId::new(0, DeviceKind::Host, 1).unwrap()
}

/// A peer (client) device.
pub fn client(index: u8) -> DeviceId {
    DeviceId::new(0, DeviceKind::Peer, index).unwrap()
}

impl TestHub {
    pub async fn start(store: Arc<MemoryStore>) -> Self {
        let transport = Arc::new(CaptureTransport::default());
        let driver = Arc::new(ScriptedDriver::default());
        let deps = HubDeps {
            transport: transport.clone(),
            driver: driver.clone(),
            workspaces: store.clone(),
            histories: store.clone(),
            thumbnailer: Arc::new(NoopThumbnailer),
        };
        let (hub, flush_rx) = Hub::new(HubConfig::new(hub_device()), deps);
        let (input, input_rx) = mpsc::channel(64);
        let handle = tokio::spawn(hub.run(input_rx, flush_rx));
        let this = Self {
            input,
            transport,
            driver,
            store,
            handle,
        };
        // Wait for startup reconciliation to finish.
        this.settle().await;
        this
    }

    /// Inject a client message as it would arrive from the relay.
    pub async fn client_send(&self, from: DeviceId, kind: &str, payload: Option<Value>) {
        let envelope = Envelope {
            kind: kind.to_string(),
            payload,
            from: Some(Peer {
                device_id: from,
                name: None,
            }),
            to: None,
            broadcast: None,
        };
        self.input
            .send(HubInput::Inbound(envelope))
            .await
            .expect("hub stopped");
    }

    pub async fn agent_event(&self, id: ConversationId, event: AgentEvent) {
        self.input
            .send(HubInput::Agent(id, event))
            .await
            .expect("hub stopped");
    }

    /// Round-trip a ping through the dispatch loop so everything queued
    /// before it has been handled, then drop the pong from the capture.
    pub async fn settle(&self) {
        let probe = DeviceId::new(2, DeviceKind::Peer, 15).unwrap();
        self.client_send(probe, "ping", None).await;
        for _ in 0..200 {
            let done = {
                let mut sent = self
                    .transport
                    .sent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(position) = sent.iter().rposition(|envelope| {
                    matches!(envelope.message, tether_protocol::ServerMessage::Pong)
                }) {
                    sent.remove(position);
                    true
                } else {
                    false
                }
            };
            if done {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("hub did not answer the settle ping");
    }

    /// Ordered shutdown; panics if the hub errored.
    pub async fn shutdown(self) {
        self.input
            .send(HubInput::Shutdown)
            .await
            .expect("hub stopped");
        self.handle
            .await
            .expect("hub task panicked")
            .expect("hub returned an error");
    }
}

/// Seed the store with one workspace and the given conversation indices.
pub async fn seed_workspace(
    store: &MemoryStore,
    conversation_indices: &[u16],
) -> (tether_id::WorkspaceId, Vec<ConversationId>) {
    use tether::store::WorkspaceStore;
    use tether_protocol::{Conversation, Workspace, WorkspaceState};

    let workspace_id = tether_id::WorkspaceId::new(hub_device(), 1).unwrap();
    let mut workspace = Workspace::new(workspace_id, "Main", "/tmp/project", 0);
    let ids: Vec<ConversationId> = conversation_indices
        .iter()
        .map(|index| {
            let id = workspace_id.conversation(*index).unwrap();
            workspace
                .conversations
                .push(Conversation::new(id, format!("Chat {index}"), 0));
            id
        })
        .collect();
    let state = WorkspaceState {
        workspaces: vec![workspace],
        active_workspace: None,
        active_conversation: None,
    };
    WorkspaceStore::save(store, &state).await.unwrap();
    (workspace_id, ids)
}

/// Envelopes addressed (directly or many) to a device, as JSON.
pub fn addressed_to(sent: &[Value], device: DeviceId) -> Vec<Value> {
    let raw = u64::from(device.raw());
    sent.iter()
        .filter(|envelope| match envelope.get("to") {
            Some(Value::Number(n)) => n.as_u64() == Some(raw),
            Some(Value::Array(targets)) => targets.iter().any(|t| t.as_u64() == Some(raw)),
            _ => false,
        })
        .cloned()
        .collect()
}

/// Broadcast envelopes of a given type, as JSON.
pub fn broadcasts_of(sent: &[Value], kind: &str) -> Vec<Value> {
    sent.iter()
        .filter(|envelope| {
            envelope.get("broadcast").is_some() && envelope["type"] == kind
        })
        .cloned()
        .collect()
}
