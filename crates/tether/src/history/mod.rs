//! Per-conversation message caches and history pagination.
//!
//! Caches are loaded eagerly at startup and lazily on select, and unloaded
//! when the last viewer leaves — unless the driver still has an active
//! session for the conversation, because evicting a live session's buffer
//! would lose output the next save expects to find.

use std::collections::HashMap;

use tether_id::ConversationId;
use tether_protocol::HistoryEntry;

/// Byte cap for one history page.
pub const PAGE_BYTE_CAP: usize = 100 * 1024;

/// One page of a history snapshot.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Chronologically ordered slice of the conversation.
    pub messages: Vec<HistoryEntry>,
    /// Whether older messages remain before this page.
    pub has_more: bool,
    /// Total entries in the conversation.
    pub total: u32,
}

/// Compute a byte-capped page walking backwards from the oldest
/// not-yet-delivered entry.
///
/// `delivered` counts messages the client already has (the cursor); zero
/// means the most recent page. At least one entry is returned when any
/// remain, even if it alone exceeds the cap.
pub fn page(entries: &[HistoryEntry], delivered: u32, byte_cap: usize) -> HistoryPage {
    let total = entries.len() as u32;
    let remaining = total.saturating_sub(delivered) as usize;

    let mut messages: Vec<HistoryEntry> = Vec::new();
    let mut bytes = 0usize;
    for entry in entries[..remaining].iter().rev() {
        let size = serde_json::to_vec(entry).map(|v| v.len()).unwrap_or(0);
        if !messages.is_empty() && bytes + size > byte_cap {
            break;
        }
        bytes += size;
        messages.push(entry.clone());
        if bytes > byte_cap {
            break;
        }
    }
    messages.reverse();

    let has_more = delivered as usize + messages.len() < total as usize;
    HistoryPage {
        messages,
        has_more,
        total,
    }
}

/// In-memory history caches keyed by conversation.
#[derive(Default)]
pub struct HistoryCache {
    caches: HashMap<ConversationId, Vec<HistoryEntry>>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, id: ConversationId) -> bool {
        self.caches.contains_key(&id)
    }

    /// Install a loaded history document.
    pub fn insert(&mut self, id: ConversationId, entries: Vec<HistoryEntry>) {
        self.caches.insert(id, entries);
    }

    /// Drop a cache (viewer count reached zero with no live session, or the
    /// conversation was deleted).
    pub fn unload(&mut self, id: ConversationId) {
        self.caches.remove(&id);
    }

    pub fn entries(&self, id: ConversationId) -> Option<&[HistoryEntry]> {
        self.caches.get(&id).map(Vec::as_slice)
    }

    /// Append to a loaded cache. Returns `false` when the cache is absent —
    /// the caller must load before appending, never create an empty cache
    /// that a later save would persist over real history.
    #[must_use]
    pub fn append(&mut self, id: ConversationId, entry: HistoryEntry) -> bool {
        match self.caches.get_mut(&id) {
            Some(entries) => {
                entries.push(entry);
                true
            }
            None => false,
        }
    }

    pub fn loaded_ids(&self) -> impl Iterator<Item = ConversationId> + '_ {
        self.caches.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::HistoryKind;

    fn entry(n: usize, pad: usize) -> HistoryEntry {
        HistoryEntry {
            id: format!("e{n}"),
            kind: HistoryKind::AgentText,
            text: Some("x".repeat(pad)),
            tool_use_id: None,
            tool_name: None,
            payload: None,
            created_at: n as i64,
        }
    }

    #[test]
    fn test_page_most_recent_first_request() {
        let entries: Vec<_> = (0..10).map(|n| entry(n, 10)).collect();
        let p = page(&entries, 0, PAGE_BYTE_CAP);
        assert_eq!(p.total, 10);
        assert_eq!(p.messages.len(), 10);
        assert!(!p.has_more);
        // Chronological order preserved.
        assert_eq!(p.messages.first().unwrap().id, "e0");
        assert_eq!(p.messages.last().unwrap().id, "e9");
    }

    #[test]
    fn test_page_cursor_walks_backwards() {
        let entries: Vec<_> = (0..10).map(|n| entry(n, 10)).collect();
        // 4 already delivered: page ends just before them.
        let p = page(&entries, 4, PAGE_BYTE_CAP);
        assert_eq!(p.messages.last().unwrap().id, "e5");
        assert!(!p.has_more);
    }

    #[test]
    fn test_page_respects_byte_cap() {
        // ~1 KiB each, 100 KiB cap: a 200-entry history cannot fit fully.
        let entries: Vec<_> = (0..200).map(|n| entry(n, 1024)).collect();
        let p = page(&entries, 0, PAGE_BYTE_CAP);
        assert!(p.messages.len() < 200);
        assert!(p.has_more);
        // The newest entry is always included.
        assert_eq!(p.messages.last().unwrap().id, "e199");

        // Next page continues where the first left off.
        let delivered = p.messages.len() as u32;
        let next = page(&entries, delivered, PAGE_BYTE_CAP);
        assert_eq!(
            next.messages.last().unwrap().created_at + 1,
            p.messages.first().unwrap().created_at
        );
    }

    #[test]
    fn test_page_oversized_single_entry_still_returned() {
        let entries = vec![entry(0, 200 * 1024)];
        let p = page(&entries, 0, PAGE_BYTE_CAP);
        assert_eq!(p.messages.len(), 1);
        assert!(!p.has_more);
    }

    #[test]
    fn test_page_beyond_end_is_empty() {
        let entries: Vec<_> = (0..3).map(|n| entry(n, 10)).collect();
        let p = page(&entries, 10, PAGE_BYTE_CAP);
        assert!(p.messages.is_empty());
        assert!(!p.has_more);
        assert_eq!(p.total, 3);
    }

    #[test]
    fn test_append_requires_loaded_cache() {
        let id = ConversationId::legacy(1, 1, 1).unwrap();
        let mut cache = HistoryCache::new();
        assert!(!cache.append(id, entry(0, 1)));

        cache.insert(id, Vec::new());
        assert!(cache.append(id, entry(0, 1)));
        assert_eq!(cache.entries(id).unwrap().len(), 1);
    }
}
