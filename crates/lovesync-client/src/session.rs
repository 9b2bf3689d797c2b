//! A chat session: one channel, its message log and its notifications.
//!
//! Created when the user enters a conversation and closed when they leave.
//! A pump task turns inbound frames into log entries and alerts, and
//! refetches the backlog every time the channel (re)opens.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use lovesync_core::codec;
use lovesync_core::error::{SyncError, SyncResult};
use lovesync_core::messages::{ChatMessage, ContentType};
use lovesync_core::notify::{Notification, NotificationId};
use lovesync_core::router::{self, RouteContext, RouterEffect};

use crate::api::{ChatApi, HttpChatApi};
use crate::composer::Composer;
use crate::config::ConnectConfig;
use crate::connection::{ChannelHandle, ConnectionManager, ConnectionState};
use crate::notifier::Notifier;
use crate::store::SharedStore;
use crate::transport::{Connector, WsConnector};

pub struct ChatSession {
    manager: ConnectionManager,
    handle: ChannelHandle,
    store: SharedStore,
    notifier: Notifier,
    composer: Arc<Composer>,
    api: Option<Arc<dyn ChatApi>>,
    pump: JoinHandle<()>,
    pruner: JoinHandle<()>,
}

impl ChatSession {
    /// Connect to the configured server over WebSocket, with REST backlog.
    pub fn connect(config: &ConnectConfig, channel_key: &str) -> SyncResult<Self> {
        let connector = Arc::new(WsConnector::new(config.session_token.clone()));
        let api = HttpChatApi::new(
            &config.server_url,
            config.session_token.clone(),
            config.connect_timeout,
        )?;
        Self::open(config, connector, Some(Arc::new(api)), channel_key)
    }

    /// Start a session over any transport. `api: None` disables backlog fetches.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        config: &ConnectConfig,
        connector: Arc<dyn Connector>,
        api: Option<Arc<dyn ChatApi>>,
        channel_key: &str,
    ) -> SyncResult<Self> {
        config.validate()?;

        let notifier = Notifier::new(config.notification_ttl, config.notification_capacity);
        let store = SharedStore::new();
        let manager = ConnectionManager::new(connector, config, notifier.clone());
        let states = manager.subscribe();
        let (handle, frames) = manager.open(channel_key)?;

        let composer = Arc::new(Composer::new(
            store.clone(),
            notifier.clone(),
            handle.clone(),
            api.clone(),
            config,
        ));

        let pump = Pump {
            handle: handle.clone(),
            composer: composer.clone(),
            notifier: notifier.clone(),
            api: api.clone(),
            alerts_enabled: config.alerts_enabled,
        };
        let pump = tokio::spawn(pump.run(frames, states));
        let pruner = notifier.spawn_pruner(config.prune_interval);

        info!(channel = %channel_key, "chat session started");
        Ok(Self {
            manager,
            handle,
            store,
            notifier,
            composer,
            api,
            pump,
            pruner,
        })
    }

    pub fn channel_key(&self) -> &str {
        self.handle.channel_key()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Connection state changes from now on.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.manager.subscribe()
    }

    /// Ordered copy of the message log.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.store.snapshot()
    }

    /// Changes whenever the message log does.
    pub fn watch_messages(&self) -> watch::Receiver<u64> {
        self.store.watch()
    }

    /// Live notifications, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifier.snapshot()
    }

    pub fn dismiss(&self, id: NotificationId) -> bool {
        self.notifier.dismiss(id)
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// Send a text message over the channel.
    pub async fn send(&self, text: &str) -> SyncResult<String> {
        self.composer.send(text, ContentType::Text).await
    }

    /// Send an image URL. Images go through the REST endpoint, not the socket.
    pub async fn send_image(&self, url: &str) -> SyncResult<String> {
        self.composer.send_via_api(url, ContentType::Image).await
    }

    /// Fetch and merge the backlog now. Returns how many entries changed.
    pub async fn refresh_history(&self) -> SyncResult<usize> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| SyncError::Config("no REST endpoint configured".into()))?;
        let batch = api.fetch_history().await?;
        Ok(self.composer.accept_history(batch.messages))
    }

    /// Leave the channel. Idempotent.
    pub fn close(&self) {
        self.manager.close(&self.handle);
        self.pump.abort();
        self.pruner.abort();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer side of the channel.
struct Pump {
    handle: ChannelHandle,
    composer: Arc<Composer>,
    notifier: Notifier,
    api: Option<Arc<dyn ChatApi>>,
    alerts_enabled: bool,
}

impl Pump {
    async fn run(
        self,
        mut frames: mpsc::Receiver<Vec<u8>>,
        mut states: broadcast::Receiver<ConnectionState>,
    ) {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(raw) => {
                        if !self.handle.is_current() {
                            break;
                        }
                        self.handle_frame(&raw);
                    }
                    None => break,
                },
                state = states.recv() => match state {
                    Ok(ConnectionState::Open) => self.refresh().await,
                    Ok(ConnectionState::Faulted) => {
                        self.composer.fail_unconfirmed();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connection state events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(channel = %self.handle.channel_key(), "pump stopped");
    }

    fn handle_frame(&self, raw: &[u8]) {
        let envelope = match codec::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping undecodable frame");
                return;
            }
        };

        let ctx = RouteContext {
            channel_key: self.handle.channel_key(),
            alerts_enabled: self.alerts_enabled,
            now: Utc::now(),
        };
        match router::route(envelope, &ctx) {
            RouterEffect::InsertMessage {
                message,
                historical,
            } => {
                let id = message.id.clone();
                if !self.composer.accept(message, historical) {
                    trace!(id = %id, "duplicate message");
                }
            }
            RouterEffect::InsertAlert(alert) => {
                self.notifier.push(alert.notification_text(), alert.severity);
            }
            RouterEffect::NoOp(reason) => debug!(?reason, "frame ignored"),
        }
    }

    async fn refresh(&self) {
        let Some(api) = &self.api else {
            return;
        };
        match api.fetch_history().await {
            Ok(batch) => {
                let changed = self.composer.accept_history(batch.messages);
                debug!(changed, rejected = batch.rejected, "history merged");
            }
            Err(e) => warn!(error = %e, "history fetch failed"),
        }
    }
}
