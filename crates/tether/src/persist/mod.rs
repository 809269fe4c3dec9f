//! Debounced persistence scheduling.
//!
//! Frequent, low-value mutations (status flips, history appends) coalesce
//! into one deferred save per key; a new mutation always cancels-and-restarts
//! its own key's timer rather than stacking. Fired timers are delivered over
//! a flush channel consumed by the hub's dispatch loop, so a save never
//! interleaves with message handling. On shutdown [`SaveScheduler::drain`]
//! cancels every pending timer and hands the keys back for an immediate
//! save — no buffered mutation is lost on a clean stop.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_id::ConversationId;

/// Debounce key: one timer per conversation history, one for the workspace
/// store document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveKey {
    Workspaces,
    Conversation(ConversationId),
}

/// Per-key debounce timers feeding a flush channel.
pub struct SaveScheduler {
    flush_tx: mpsc::UnboundedSender<SaveKey>,
    pending: HashMap<SaveKey, JoinHandle<()>>,
}

impl SaveScheduler {
    /// Create a scheduler and the channel its fired timers arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SaveKey>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        (
            Self {
                flush_tx,
                pending: HashMap::new(),
            },
            flush_rx,
        )
    }

    /// Schedule a save for `key` after `delay`, replacing any pending timer
    /// for the same key.
    pub fn schedule(&mut self, key: SaveKey, delay: Duration) {
        if let Some(previous) = self.pending.remove(&key) {
            previous.abort();
        }
        let tx = self.flush_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(key);
        });
        self.pending.insert(key, handle);
    }

    /// Whether a save is pending for `key`.
    pub fn is_pending(&self, key: SaveKey) -> bool {
        self.pending.contains_key(&key)
    }

    /// Mark a fired timer as consumed. Call when a key is received from the
    /// flush channel.
    pub fn acknowledge(&mut self, key: SaveKey) {
        self.pending.remove(&key);
    }

    /// Cancel the pending timer for `key`, if any.
    pub fn cancel(&mut self, key: SaveKey) {
        if let Some(handle) = self.pending.remove(&key) {
            handle.abort();
        }
    }

    /// Cancel every pending timer and return the keys that still needed a
    /// save, for an immediate flush at shutdown. Keys that already fired but
    /// were not yet consumed remain on the flush channel; the caller drains
    /// that too.
    pub fn drain(&mut self) -> Vec<SaveKey> {
        let mut keys: Vec<SaveKey> = Vec::with_capacity(self.pending.len());
        for (key, handle) in self.pending.drain() {
            handle.abort();
            keys.push(key);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(n: u16) -> SaveKey {
        SaveKey::Conversation(ConversationId::legacy(1, 1, n).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay() {
        let (mut scheduler, mut flush_rx) = SaveScheduler::new();
        scheduler.schedule(conversation(1), Duration::from_millis(500));
        assert!(scheduler.is_pending(conversation(1)));

        let key = flush_rx.recv().await.unwrap();
        assert_eq!(key, conversation(1));
        scheduler.acknowledge(key);
        assert!(!scheduler.is_pending(conversation(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let (mut scheduler, mut flush_rx) = SaveScheduler::new();
        scheduler.schedule(conversation(1), Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Burst: restart the timer before it fires.
        scheduler.schedule(conversation(1), Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        let key = flush_rx.recv().await.unwrap();
        assert_eq!(key, conversation(1));
        // One coalesced flush, timed from the second schedule.
        assert!(start.elapsed() >= Duration::from_millis(499));
        assert!(flush_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (mut scheduler, mut flush_rx) = SaveScheduler::new();
        scheduler.schedule(conversation(1), Duration::from_millis(100));
        scheduler.schedule(conversation(2), Duration::from_millis(200));
        scheduler.schedule(SaveKey::Workspaces, Duration::from_millis(300));

        assert_eq!(flush_rx.recv().await.unwrap(), conversation(1));
        assert_eq!(flush_rx.recv().await.unwrap(), conversation(2));
        assert_eq!(flush_rx.recv().await.unwrap(), SaveKey::Workspaces);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_flush() {
        let (mut scheduler, mut flush_rx) = SaveScheduler::new();
        scheduler.schedule(conversation(1), Duration::from_millis(100));
        scheduler.cancel(conversation(1));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(flush_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_returns_pending_keys() {
        let (mut scheduler, mut flush_rx) = SaveScheduler::new();
        scheduler.schedule(conversation(1), Duration::from_secs(60));
        scheduler.schedule(SaveKey::Workspaces, Duration::from_secs(60));

        let keys = scheduler.drain();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&conversation(1)));
        assert!(keys.contains(&SaveKey::Workspaces));
        assert!(!scheduler.is_pending(conversation(1)));

        // Nothing fires afterwards.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(flush_rx.try_recv().is_err());
    }
}
