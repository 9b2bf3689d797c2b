//! Shared, observable handle to a channel's message log.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;

use lovesync_core::messages::ChatMessage;
use lovesync_core::store::MessageStore;

/// Cloneable message store. Every mutation bumps a revision observers can await.
#[derive(Debug, Clone)]
pub struct SharedStore {
    store: Arc<RwLock<MessageStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl SharedStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            store: Arc::new(RwLock::new(MessageStore::new())),
            revision: Arc::new(revision),
        }
    }

    /// Run `f` against the store, then notify observers.
    pub fn update<R>(&self, f: impl FnOnce(&mut MessageStore) -> R) -> R {
        let result = {
            let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut store)
        };
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    /// Run `f` against the store without notifying anyone.
    pub fn read<R>(&self, f: impl FnOnce(&MessageStore) -> R) -> R {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        f(&store)
    }

    /// Ordered copy of the log.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.read(MessageStore::snapshot)
    }

    pub fn get(&self, id: &str) -> Option<ChatMessage> {
        self.read(|store| store.get(id).cloned())
    }

    /// Receiver that changes whenever the log does.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lovesync_core::messages::ContentType;

    #[tokio::test]
    async fn updates_wake_watchers() {
        let store = SharedStore::new();
        let mut rx = store.watch();

        let added = store.update(|s| {
            s.append_live(ChatMessage::received(
                "1",
                "a@b.c",
                "hi",
                ContentType::Text,
                Utc::now(),
            ))
        });
        assert!(added);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(store.snapshot().len(), 1);
        assert!(store.get("1").is_some());
    }
}
