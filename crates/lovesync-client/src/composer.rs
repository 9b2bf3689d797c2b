//! Outbound messages: optimistic insert, transmit, reconcile.
//!
//! A send shows up in the log immediately as `Pending`. Under the default
//! echo policy it becomes `Sent` when the server broadcasts it back to us;
//! the echo is matched to the oldest waiting local entry with the same
//! sender, content and type.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use lovesync_core::codec;
use lovesync_core::error::{SyncError, SyncResult};
use lovesync_core::messages::{ChatMessage, ContentType, DeliveryState, OutboundFrame, Severity};
use lovesync_core::store::SendOutcome;

use crate::api::ChatApi;
use crate::config::{ConfirmPolicy, ConnectConfig};
use crate::connection::ChannelHandle;
use crate::notifier::Notifier;
use crate::store::SharedStore;

/// How far a replayed echo may predate the local send and still confirm it.
const ECHO_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct Awaiting {
    local_id: String,
    content: String,
    content_type: ContentType,
    sent_at: DateTime<Utc>,
}

/// Sends user messages on one channel.
pub struct Composer {
    store: SharedStore,
    notifier: Notifier,
    handle: ChannelHandle,
    api: Option<Arc<dyn ChatApi>>,
    identity: String,
    policy: ConfirmPolicy,
    awaiting: Mutex<VecDeque<Awaiting>>,
}

impl Composer {
    pub fn new(
        store: SharedStore,
        notifier: Notifier,
        handle: ChannelHandle,
        api: Option<Arc<dyn ChatApi>>,
        config: &ConnectConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            handle,
            api,
            identity: config.identity.clone(),
            policy: config.confirm_policy,
            awaiting: Mutex::new(VecDeque::new()),
        }
    }

    fn awaiting(&self) -> MutexGuard<'_, VecDeque<Awaiting>> {
        self.awaiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send over the open channel. Returns the local id of the new entry.
    ///
    /// The entry is in the log before this returns, whatever the outcome.
    /// If the channel is not open the entry is marked `Failed` and
    /// `SendFailed` carries its id.
    pub async fn send(&self, content: impl Into<String>, content_type: ContentType) -> SyncResult<String> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let local_id = self.stage(&content, content_type);
        self.transmit(&local_id, content, content_type).await?;
        Ok(local_id)
    }

    /// Send through the REST endpoint instead of the socket.
    ///
    /// On success the backlog is refetched so the entry adopts its server id.
    pub async fn send_via_api(
        &self,
        content: impl Into<String>,
        content_type: ContentType,
    ) -> SyncResult<String> {
        let api = self
            .api
            .clone()
            .ok_or_else(|| SyncError::Config("no REST endpoint configured".into()))?;
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let local_id = self.stage(&content, content_type);
        self.register(&local_id, &content, content_type);
        let frame = OutboundFrame::new(content, content_type);
        if let Err(e) = api.post_message(&frame).await {
            return Err(self.fail(&local_id, e));
        }

        if self.policy == ConfirmPolicy::Echo {
            match api.fetch_history().await {
                Ok(batch) => {
                    self.accept_history(batch.messages);
                }
                Err(e) => warn!(error = %e, "history refresh after send failed"),
            }
        }
        // The POST was acknowledged; confirm even if the backlog did not show it.
        if self.unregister(&local_id) {
            self.reconcile(&local_id, SendOutcome::sent());
        }
        Ok(local_id)
    }

    /// Re-send a `Failed` entry.
    pub async fn retry(&self, local_id: &str) -> SyncResult<()> {
        let message = self
            .store
            .get(local_id)
            .ok_or_else(|| SyncError::MessageNotFound(local_id.to_string()))?;
        if message.delivery_state != DeliveryState::Failed {
            return Err(SyncError::InvalidState(format!(
                "{local_id} is {:?}, only failed messages can be retried",
                message.delivery_state
            )));
        }
        self.unregister(local_id);
        self.store
            .update(|s| s.set_state(local_id, DeliveryState::Pending))?;
        self.transmit(local_id, message.content, message.content_type)
            .await
    }

    /// Drop a `Failed` entry from the log.
    pub fn discard(&self, local_id: &str) -> SyncResult<ChatMessage> {
        let state = self
            .store
            .get(local_id)
            .map(|m| m.delivery_state)
            .ok_or_else(|| SyncError::MessageNotFound(local_id.to_string()))?;
        if state != DeliveryState::Failed {
            return Err(SyncError::InvalidState(format!(
                "{local_id} is {state:?}, only failed messages can be discarded"
            )));
        }
        self.unregister(local_id);
        self.store
            .update(|s| s.remove(local_id))
            .ok_or_else(|| SyncError::MessageNotFound(local_id.to_string()))
    }

    /// Take in a server message: confirm a waiting send or append it.
    ///
    /// Returns whether the log changed.
    pub fn accept(&self, message: ChatMessage, historical: bool) -> bool {
        if let Some(local_id) = self.claim(&message, historical) {
            if self.confirm(&local_id, &message) {
                return true;
            }
        }
        self.store.update(|s| s.append_live(message))
    }

    /// Take in a backlog. Returns how many entries were new or confirmed.
    pub fn accept_history(&self, messages: Vec<ChatMessage>) -> usize {
        let mut changed = 0;
        let mut rest = Vec::with_capacity(messages.len());
        for message in messages {
            match self.claim(&message, true) {
                Some(local_id) if self.confirm(&local_id, &message) => changed += 1,
                _ => rest.push(message),
            }
        }
        changed + self.store.update(|s| s.merge_history(rest))
    }

    /// Sends written but not yet confirmed.
    pub fn awaiting_echo(&self) -> usize {
        self.awaiting().len()
    }

    /// Mark every unconfirmed send `Failed` after the channel dropped.
    ///
    /// The entries stay claimable, so an echo replayed after reconnecting
    /// still confirms them. Returns how many were marked.
    pub fn fail_unconfirmed(&self) -> usize {
        let pending: Vec<String> = self
            .awaiting()
            .iter()
            .map(|a| a.local_id.clone())
            .collect();
        let failed = self.store.update(|s| {
            pending
                .iter()
                .filter(|id| {
                    s.get(id).is_some_and(|m| m.delivery_state == DeliveryState::Pending)
                        && s.reconcile(id, SendOutcome::Failed).is_ok()
                })
                .count()
        });
        if failed > 0 {
            warn!(failed, channel = %self.handle.channel_key(), "unconfirmed sends marked failed");
            self.notifier.push(
                format!("{failed} message(s) may not have been delivered"),
                Severity::Error,
            );
        }
        failed
    }

    fn stage(&self, content: &str, content_type: ContentType) -> String {
        let local_id = format!("local-{}", Uuid::new_v4());
        let message = ChatMessage {
            id: local_id.clone(),
            sender: self.identity.clone(),
            content: content.to_string(),
            content_type,
            timestamp: Utc::now(),
            delivery_state: DeliveryState::Pending,
        };
        self.store.update(|s| s.append_optimistic(message));
        local_id
    }

    async fn transmit(&self, local_id: &str, content: String, content_type: ContentType) -> SyncResult<()> {
        if self.policy == ConfirmPolicy::Echo {
            // Registered before the write: the echo can beat the write's completion.
            self.register(local_id, &content, content_type);
        }
        let frame = codec::encode(&OutboundFrame::new(content, content_type));
        match self.handle.send_text(&frame).await {
            Ok(()) => {
                debug!(local_id = %local_id, channel = %self.handle.channel_key(), "message written");
                if self.policy == ConfirmPolicy::FireAndForget {
                    self.reconcile(local_id, SendOutcome::sent());
                }
                Ok(())
            }
            Err(e) => Err(self.fail(local_id, e)),
        }
    }

    fn register(&self, local_id: &str, content: &str, content_type: ContentType) {
        self.awaiting().push_back(Awaiting {
            local_id: local_id.to_string(),
            content: content.to_string(),
            content_type,
            sent_at: Utc::now(),
        });
    }

    fn unregister(&self, local_id: &str) -> bool {
        let mut awaiting = self.awaiting();
        let before = awaiting.len();
        awaiting.retain(|a| a.local_id != local_id);
        awaiting.len() < before
    }

    /// Pop the oldest waiting send this message confirms.
    ///
    /// Replayed frames only count when they are not much older than the
    /// send, so an old identical message cannot confirm a new one.
    fn claim(&self, message: &ChatMessage, historical: bool) -> Option<String> {
        if message.sender.is_empty() || message.sender != self.identity {
            return None;
        }
        // A copy of something already in the log confirms nothing new.
        if self.store.read(|s| s.contains(&message.id)) {
            return None;
        }
        let skew = chrono::Duration::seconds(ECHO_SKEW_SECS);
        let mut awaiting = self.awaiting();
        let pos = awaiting.iter().position(|a| {
            a.content == message.content
                && a.content_type == message.content_type
                && (!historical || message.timestamp >= a.sent_at - skew)
        })?;
        awaiting.remove(pos).map(|a| a.local_id)
    }

    fn confirm(&self, local_id: &str, message: &ChatMessage) -> bool {
        let outcome = SendOutcome::Sent {
            canonical_id: Some(message.id.clone()),
            timestamp: Some(message.timestamp),
        };
        match self.store.update(|s| s.reconcile(local_id, outcome)) {
            Ok(()) => {
                debug!(local_id = %local_id, id = %message.id, "send confirmed by echo");
                true
            }
            Err(e) => {
                debug!(local_id = %local_id, error = %e, "echo for a vanished entry");
                false
            }
        }
    }

    fn reconcile(&self, local_id: &str, outcome: SendOutcome) {
        if let Err(e) = self.store.update(|s| s.reconcile(local_id, outcome)) {
            debug!(local_id = %local_id, error = %e, "reconcile skipped");
        }
    }

    fn fail(&self, local_id: &str, cause: SyncError) -> SyncError {
        warn!(local_id = %local_id, error = %cause, "send failed");
        self.unregister(local_id);
        self.reconcile(local_id, SendOutcome::Failed);
        self.notifier.push("Message failed to send", Severity::Error);
        SyncError::SendFailed {
            local_id: local_id.to_string(),
            reason: cause.to_string(),
        }
    }
}
