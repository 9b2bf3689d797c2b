//! Ephemeral UI notifications with independent expiry.
//!
//! Time is passed in by the caller so the queue stays runtime-agnostic and
//! deterministic under test.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::messages::Severity;

/// Default time-to-live of a notification.
pub const DEFAULT_TTL: Duration = Duration::from_secs(4);

/// Default maximum number of live notifications.
pub const DEFAULT_CAPACITY: usize = 32;

pub type NotificationId = u64;

/// A transient, UI-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub text: String,
    pub severity: Severity,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Notification {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Bounded set of notifications, oldest evicted first when full.
#[derive(Debug)]
pub struct NotificationQueue {
    entries: VecDeque<Notification>,
    ttl: Duration,
    capacity: Option<usize>,
    next_id: NotificationId,
}

impl NotificationQueue {
    /// `capacity: None` leaves the queue unbounded.
    pub fn new(ttl: Duration, capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            ttl,
            capacity,
            next_id: 1,
        }
    }

    /// Add a notification expiring at `now + ttl`.
    pub fn push(
        &mut self,
        text: impl Into<String>,
        severity: Severity,
        now: Instant,
    ) -> NotificationId {
        let id = self.next_id;
        self.next_id += 1;

        if let Some(cap) = self.capacity {
            while cap > 0 && self.entries.len() >= cap {
                self.entries.pop_front();
            }
        }

        self.entries.push_back(Notification {
            id,
            text: text.into(),
            severity,
            created_at: now,
            expires_at: now + self.ttl,
        });
        id
    }

    /// Remove a notification now, regardless of expiry. Returns true if found.
    pub fn dismiss(&mut self, id: NotificationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|n| n.id != id);
        self.entries.len() < before
    }

    /// Drop everything with `expires_at <= now`. Returns how many were removed.
    pub fn tick(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|n| !n.is_expired(now));
        before - self.entries.len()
    }

    /// Live notifications at `now`, oldest first.
    ///
    /// Expired entries are filtered even if `tick` has not run yet.
    pub fn snapshot(&self, now: Instant) -> Vec<Notification> {
        self.entries
            .iter()
            .filter(|n| !n.is_expired(now))
            .cloned()
            .collect()
    }

    /// Earliest pending expiry, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.iter().map(|n| n.expires_at).min()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, Some(DEFAULT_CAPACITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn expires_after_default_ttl_without_dismiss() {
        let t = Instant::now();
        let mut queue = NotificationQueue::default();
        let id = queue.push("Connected", Severity::Info, t);

        let at_3_9 = queue.snapshot(t + ms(3_900));
        assert_eq!(at_3_9.len(), 1);
        assert_eq!(at_3_9[0].id, id);

        assert!(queue.snapshot(t + ms(4_100)).is_empty());

        assert_eq!(queue.tick(t + ms(3_900)), 0);
        assert_eq!(queue.tick(t + ms(4_100)), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let t = Instant::now();
        let mut queue = NotificationQueue::new(ms(1_000), None);
        queue.push("x", Severity::Success, t);
        assert_eq!(queue.tick(t + ms(1_000)), 1);
    }

    #[test]
    fn independent_timers() {
        let t = Instant::now();
        let mut queue = NotificationQueue::default();
        queue.push("first", Severity::Info, t);
        queue.push("second", Severity::Error, t + ms(2_000));

        let live = queue.snapshot(t + ms(5_000));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].text, "second");
        assert_eq!(queue.next_expiry(), Some(t + ms(4_000)));
    }

    #[test]
    fn dismiss_removes_immediately() {
        let t = Instant::now();
        let mut queue = NotificationQueue::default();
        let a = queue.push("a", Severity::Info, t);
        let b = queue.push("b", Severity::Info, t);

        assert!(queue.dismiss(a));
        assert!(!queue.dismiss(a));
        let live = queue.snapshot(t);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, b);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let t = Instant::now();
        let mut queue = NotificationQueue::new(DEFAULT_TTL, Some(2));
        queue.push("1", Severity::Info, t);
        queue.push("2", Severity::Info, t);
        queue.push("3", Severity::Info, t);

        let texts: Vec<_> = queue.snapshot(t).into_iter().map(|n| n.text).collect();
        assert_eq!(texts, ["2", "3"]);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let t = Instant::now();
        let mut queue = NotificationQueue::default();
        let a = queue.push("a", Severity::Info, t);
        let b = queue.push("b", Severity::Info, t);
        assert!(b > a);
    }
}
