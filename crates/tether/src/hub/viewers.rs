//! Viewer registry and unread bookkeeping.
//!
//! Tracks which client device is looking at which conversation. A client
//! views at most one conversation at a time, so alongside the forward
//! conversation -> viewers sets we keep a reverse client -> conversation
//! index, making eviction on re-select O(1) instead of a scan.
//!
//! All of this is process-lifetime state owned by the hub; it starts empty
//! and is torn down with the hub.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use tether_id::{ConversationId, DeviceId};

#[derive(Default)]
pub struct ViewerRegistry {
    /// Conversation -> set of client devices currently viewing it.
    viewers: HashMap<ConversationId, HashSet<DeviceId>>,
    /// Reverse index: client -> the one conversation it is viewing.
    watching: HashMap<DeviceId, ConversationId>,
    /// Client -> conversations it has been notified unread for since it last
    /// viewed them.
    unread_sent: HashMap<DeviceId, HashSet<ConversationId>>,
    /// Every client device seen on the transport this process lifetime,
    /// with its self-reported name.
    clients: HashMap<DeviceId, Option<String>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client as connected (idempotent; refreshes the name).
    pub fn client_seen(&mut self, device_id: DeviceId, name: Option<String>) {
        if !self.clients.contains_key(&device_id) {
            debug!(
                "client {device_id} ({}) seen",
                name.as_deref().unwrap_or("unnamed")
            );
        }
        self.clients.insert(device_id, name);
    }

    /// All known client devices.
    pub fn clients(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.clients.keys().copied()
    }

    /// Register `client` as viewer of `conversation`, leaving any prior
    /// conversation. Returns the prior conversation if this was the last
    /// viewer watching it — the caller decides whether its cache may be
    /// unloaded.
    pub fn select(
        &mut self,
        client: DeviceId,
        conversation: ConversationId,
    ) -> Option<ConversationId> {
        let vacated = self.leave(client);
        self.viewers.entry(conversation).or_default().insert(client);
        self.watching.insert(client, conversation);
        // Re-selecting clears the notified flag for that conversation.
        if let Some(sent) = self.unread_sent.get_mut(&client) {
            sent.remove(&conversation);
        }
        vacated.filter(|prior| *prior != conversation)
    }

    /// Remove `client` from whatever it is viewing. Returns the conversation
    /// if the client was its last viewer.
    pub fn leave(&mut self, client: DeviceId) -> Option<ConversationId> {
        let prior = self.watching.remove(&client)?;
        let emptied = match self.viewers.get_mut(&prior) {
            Some(set) => {
                set.remove(&client);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            self.viewers.remove(&prior);
            Some(prior)
        } else {
            None
        }
    }

    /// Current viewers of a conversation.
    pub fn viewers_of(&self, conversation: ConversationId) -> Vec<DeviceId> {
        self.viewers
            .get(&conversation)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_viewers(&self, conversation: ConversationId) -> bool {
        self.viewers
            .get(&conversation)
            .is_some_and(|set| !set.is_empty())
    }

    pub fn is_viewing(&self, client: DeviceId, conversation: ConversationId) -> bool {
        self.watching.get(&client) == Some(&conversation)
    }

    /// Clients that should get an unread notice for `conversation`: connected,
    /// not currently viewing it, and not already notified since their last
    /// visit. Marks them notified.
    pub fn unread_targets(&mut self, conversation: ConversationId) -> Vec<DeviceId> {
        let mut targets = Vec::new();
        for client in self.clients.keys().copied() {
            if self.watching.get(&client) == Some(&conversation) {
                continue;
            }
            let sent = self.unread_sent.entry(client).or_default();
            if sent.insert(conversation) {
                targets.push(client);
            }
        }
        targets
    }

    /// Clear the notified flag of one client for one conversation.
    pub fn clear_unread_sent(&mut self, client: DeviceId, conversation: ConversationId) {
        if let Some(sent) = self.unread_sent.get_mut(&client) {
            sent.remove(&conversation);
        }
    }

    /// Forget a conversation entirely (deleted).
    pub fn forget_conversation(&mut self, conversation: ConversationId) {
        if let Some(set) = self.viewers.remove(&conversation) {
            for client in set {
                self.watching.remove(&client);
            }
        }
        for sent in self.unread_sent.values_mut() {
            sent.remove(&conversation);
        }
    }
}
