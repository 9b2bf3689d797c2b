//! Ordered, deduplicated message log for one channel.
//!
//! History fetched over REST, frames replayed on connect, live frames and
//! optimistic local messages all merge into the same keyed log. Entries are
//! unique by id and ordered by timestamp, ties broken by arrival order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{SyncError, SyncResult};
use crate::messages::{ChatMessage, DeliveryState};

/// How a transmission attempt resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered. Canonical id and timestamp replace the local ones when known.
    Sent {
        canonical_id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    Failed,
}

impl SendOutcome {
    /// Success without any server-assigned identity.
    pub fn sent() -> Self {
        Self::Sent {
            canonical_id: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    /// Arrival order at the store; the stable tie-break.
    seq: u64,
    message: ChatMessage,
}

/// The message log for a single channel.
#[derive(Debug, Default)]
pub struct MessageStore {
    /// Sorted by `(timestamp, seq)`.
    entries: Vec<Entry>,
    /// id -> seq of the entry holding it.
    ids: HashMap<String, u64>,
    next_seq: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a historical backlog. Returns how many entries were new.
    ///
    /// Never removes anything and is idempotent by id.
    pub fn merge_history<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let mut added = 0;
        for message in messages {
            if self.insert(message) {
                added += 1;
            }
        }
        added
    }

    /// Append a live message. Returns `false` if its id was already present.
    pub fn append_live(&mut self, message: ChatMessage) -> bool {
        self.insert(message)
    }

    /// Insert a locally authored message ahead of server confirmation.
    pub fn append_optimistic(&mut self, mut message: ChatMessage) -> bool {
        message.delivery_state = DeliveryState::Pending;
        self.insert(message)
    }

    /// Resolve an optimistic entry.
    ///
    /// On success the entry becomes `Sent` and adopts the canonical id and
    /// timestamp when supplied. If another entry already holds the canonical
    /// id, the local entry is folded into it. On failure the entry becomes
    /// `Failed` and stays visible.
    pub fn reconcile(&mut self, local_id: &str, outcome: SendOutcome) -> SyncResult<()> {
        let pos = self
            .position(local_id)
            .ok_or_else(|| SyncError::MessageNotFound(local_id.to_string()))?;

        let (canonical_id, timestamp) = match outcome {
            SendOutcome::Failed => {
                self.entries[pos].message.delivery_state = DeliveryState::Failed;
                return Ok(());
            }
            SendOutcome::Sent {
                canonical_id,
                timestamp,
            } => (canonical_id, timestamp),
        };

        let mut entry = self.entries.remove(pos);
        self.ids.remove(local_id);

        if let Some(id) = canonical_id.filter(|id| id != local_id) {
            if let Some(existing) = self.position(&id) {
                self.entries[existing].message.delivery_state = DeliveryState::Sent;
                return Ok(());
            }
            entry.message.id = id;
        }
        if let Some(ts) = timestamp {
            entry.message.timestamp = ts;
        }
        entry.message.delivery_state = DeliveryState::Sent;

        self.ids.insert(entry.message.id.clone(), entry.seq);
        let at = self.insertion_point(&entry.message.timestamp, entry.seq);
        self.entries.insert(at, entry);
        Ok(())
    }

    /// Set the delivery state of an entry (used when retrying a failed send).
    pub fn set_state(&mut self, id: &str, state: DeliveryState) -> SyncResult<()> {
        let pos = self
            .position(id)
            .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))?;
        self.entries[pos].message.delivery_state = state;
        Ok(())
    }

    /// Remove an entry. Only user-initiated discards go through here.
    pub fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        let pos = self.position(id)?;
        self.ids.remove(id);
        Some(self.entries.remove(pos).message)
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.position(id).map(|pos| &self.entries[pos].message)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Ordered copy of the log.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, message: ChatMessage) -> bool {
        if self.ids.contains_key(&message.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ids.insert(message.id.clone(), seq);
        let at = self.insertion_point(&message.timestamp, seq);
        self.entries.insert(at, Entry { seq, message });
        true
    }

    fn insertion_point(&self, timestamp: &DateTime<Utc>, seq: u64) -> usize {
        self.entries
            .partition_point(|e| (&e.message.timestamp, e.seq) < (timestamp, seq))
    }

    fn position(&self, id: &str) -> Option<usize> {
        let seq = *self.ids.get(id)?;
        self.entries.iter().position(|e| e.seq == seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ContentType;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn msg(id: &str, secs: i64) -> ChatMessage {
        ChatMessage::received(id, "partner@example.com", id, ContentType::Text, at(secs))
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store.snapshot().into_iter().map(|m| m.id).collect()
    }

    #[test]
    fn backlog_then_overlapping_live_frames() {
        let mut store = MessageStore::new();
        assert_eq!(store.merge_history(vec![msg("1", 100), msg("2", 200)]), 2);

        assert!(!store.append_live(msg("2", 200)));
        assert!(store.append_live(msg("3", 300)));

        assert_eq!(ids(&store), ["1", "2", "3"]);
    }

    #[test]
    fn merge_is_idempotent_in_any_order() {
        let batches = [
            vec![msg("a", 5), msg("b", 1)],
            vec![msg("b", 1), msg("c", 3)],
            vec![msg("a", 5), msg("c", 3), msg("d", 2)],
        ];

        let mut forward = MessageStore::new();
        for batch in batches.iter().cloned() {
            forward.merge_history(batch);
        }
        for m in batches.iter().flatten().cloned() {
            forward.append_live(m);
        }

        let mut backward = MessageStore::new();
        for batch in batches.iter().rev().cloned() {
            for m in batch {
                backward.append_live(m);
            }
        }
        assert_eq!(backward.merge_history(batches.concat()), 0);

        assert_eq!(forward.len(), 4);
        assert_eq!(ids(&forward), ["b", "d", "c", "a"]);
        assert_eq!(ids(&forward), ids(&backward));
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut store = MessageStore::new();
        store.append_live(msg("z", 10));
        store.append_live(msg("y", 10));
        store.append_live(msg("early", 5));
        store.append_live(msg("x", 10));

        assert_eq!(ids(&store), ["early", "z", "y", "x"]);
    }

    #[test]
    fn optimistic_then_success_then_echo() {
        let mut store = MessageStore::new();
        store.append_live(msg("1", 100));

        let mut local = msg("local-1", 150);
        local.delivery_state = DeliveryState::Sent;
        assert!(store.append_optimistic(local));
        assert_eq!(store.get("local-1").unwrap().delivery_state, DeliveryState::Pending);

        store
            .reconcile(
                "local-1",
                SendOutcome::Sent {
                    canonical_id: Some("srv-9".into()),
                    timestamp: Some(at(160)),
                },
            )
            .unwrap();

        assert!(!store.contains("local-1"));
        let sent = store.get("srv-9").unwrap();
        assert_eq!(sent.delivery_state, DeliveryState::Sent);
        assert_eq!(sent.timestamp, at(160));

        assert!(!store.append_live(msg("srv-9", 160)));
        assert_eq!(ids(&store), ["1", "srv-9"]);
    }

    #[test]
    fn reconcile_moves_entry_when_server_timestamp_differs() {
        let mut store = MessageStore::new();
        store.append_optimistic(msg("local", 500));
        store.append_live(msg("peer", 300));

        store
            .reconcile(
                "local",
                SendOutcome::Sent {
                    canonical_id: None,
                    timestamp: Some(at(200)),
                },
            )
            .unwrap();

        assert_eq!(ids(&store), ["local", "peer"]);
    }

    #[test]
    fn reconcile_folds_into_an_existing_canonical_entry() {
        let mut store = MessageStore::new();
        store.append_optimistic(msg("local", 100));
        store.append_live(msg("srv", 101));

        store
            .reconcile(
                "local",
                SendOutcome::Sent {
                    canonical_id: Some("srv".into()),
                    timestamp: None,
                },
            )
            .unwrap();

        assert_eq!(ids(&store), ["srv"]);
    }

    #[test]
    fn failure_keeps_the_message_visible() {
        let mut store = MessageStore::new();
        store.append_optimistic(msg("local", 100));
        store.reconcile("local", SendOutcome::Failed).unwrap();

        let failed = store.get("local").unwrap();
        assert_eq!(failed.delivery_state, DeliveryState::Failed);

        store.set_state("local", DeliveryState::Pending).unwrap();
        assert_eq!(store.get("local").unwrap().delivery_state, DeliveryState::Pending);

        assert!(store.remove("local").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn reconcile_unknown_id_is_an_error() {
        let mut store = MessageStore::new();
        let err = store.reconcile("nope", SendOutcome::sent()).unwrap_err();
        assert!(matches!(err, SyncError::MessageNotFound(id) if id == "nope"));
    }
}
