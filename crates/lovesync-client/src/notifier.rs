//! Shared handle to the notification queue.
//!
//! Time comes from tokio's clock so paused-time tests drive expiry.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use lovesync_core::messages::Severity;
use lovesync_core::notify::{Notification, NotificationId, NotificationQueue};

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Cloneable, thread-safe notification queue.
#[derive(Debug, Clone)]
pub struct Notifier {
    queue: Arc<RwLock<NotificationQueue>>,
}

impl Notifier {
    pub fn new(ttl: Duration, capacity: Option<usize>) -> Self {
        Self {
            queue: Arc::new(RwLock::new(NotificationQueue::new(ttl, capacity))),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, NotificationQueue> {
        self.queue.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NotificationQueue> {
        self.queue.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, text: impl Into<String>, severity: Severity) -> NotificationId {
        let text = text.into();
        tracing::debug!(%text, ?severity, "notification");
        self.write().push(text, severity, now())
    }

    pub fn dismiss(&self, id: NotificationId) -> bool {
        self.write().dismiss(id)
    }

    /// Sweep expired entries. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        self.write().tick(now())
    }

    /// Live notifications, oldest first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.read().snapshot(now())
    }

    /// Sweep on a fixed interval until the returned task is aborted.
    pub fn spawn_pruner(&self, interval: Duration) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = notifier.prune();
                if removed > 0 {
                    tracing::trace!(removed, "expired notifications pruned");
                }
            }
        })
    }
}

impl Default for Notifier {
    fn default() -> Self {
        let queue = NotificationQueue::default();
        Self {
            queue: Arc::new(RwLock::new(queue)),
        }
    }
}
