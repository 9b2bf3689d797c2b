//! Connection lifecycle for one chat channel.
//!
//! ```text
//! Idle → Connecting → Open → Closing → Idle
//!            ↑          ↓
//!            │       Faulted
//!            │          ↓
//!            └── Reconnecting
//! ```
//!
//! Every open bumps a generation counter. The background task checks it on
//! each transition, so after `close` (or a new `open`) a stale task can
//! neither change state nor deliver frames.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time;

use lovesync_core::error::{SyncError, SyncResult};
use lovesync_core::messages::Severity;

use crate::config::{ConnectConfig, ReconnectConfig};
use crate::notifier::Notifier;
use crate::transport::{self, Connection, Connector, FrameSink, FrameSource};

/// Inbound frames buffered between the receive loop and the consumer.
const FRAME_BUFFER: usize = 256;

/// State-change events buffered per subscriber.
const STATE_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Faulted,
    Reconnecting { attempt: u32, delay: Duration },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Faulted => "faulted",
            ConnectionState::Reconnecting { .. } => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt, delay } => write!(
                f,
                "reconnecting (attempt {attempt}, in {:.1}s)",
                delay.as_secs_f64()
            ),
            other => f.write_str(other.name()),
        }
    }
}

type SharedSink = Arc<tokio::sync::Mutex<Box<dyn FrameSink>>>;

struct Shared {
    state: ConnectionState,
    generation: u64,
    channel_key: Option<String>,
    sink: Option<SharedSink>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    shared: Mutex<Shared>,
    events: broadcast::Sender<ConnectionState>,
    notifier: Notifier,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, shared: &mut Shared, next: ConnectionState) {
        shared.state = next;
        let _ = self.events.send(next);
    }

    /// Move to `next` if `generation` is still current. Returns false for a stale task.
    fn transition(
        &self,
        generation: u64,
        next: ConnectionState,
        notice: Option<(String, Severity)>,
    ) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        self.set_state(&mut shared, next);
        if let Some((text, severity)) = notice {
            self.notifier.push(text, severity);
        }
        true
    }

    fn install_open(&self, generation: u64, sink: SharedSink) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        shared.sink = Some(sink);
        self.set_state(&mut shared, ConnectionState::Open);
        self.notifier.push("Connected to chat", Severity::Info);
        true
    }

    fn fault(&self, generation: u64) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        shared.sink = None;
        self.set_state(&mut shared, ConnectionState::Faulted);
        true
    }

    fn give_up(&self, generation: u64, failures: u32) {
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }
        shared.sink = None;
        shared.task = None;
        self.set_state(&mut shared, ConnectionState::Idle);
        self.notifier.push(
            format!("Could not reconnect after {failures} attempts"),
            Severity::Error,
        );
    }

    /// Tear down the channel of `generation` (or whatever is current for `None`).
    fn close(&self, generation: Option<u64>) {
        let (task, sink, channel_key) = {
            let mut shared = self.lock();
            if generation.is_some_and(|g| g != shared.generation) {
                return;
            }
            if shared.state == ConnectionState::Idle && shared.task.is_none() {
                return;
            }
            shared.generation += 1;
            if shared.state == ConnectionState::Open {
                self.set_state(&mut shared, ConnectionState::Closing);
            }
            self.set_state(&mut shared, ConnectionState::Idle);
            (shared.task.take(), shared.sink.take(), shared.channel_key.take())
        };

        if let Some(task) = task {
            task.abort();
        }
        if let Some(sink) = sink {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let mut sink = sink.lock().await;
                    if let Err(e) = sink.close().await {
                        tracing::debug!(error = %e, "close frame not delivered");
                    }
                });
            }
        }
        tracing::info!(channel = ?channel_key, "channel closed");
    }
}

/// Owns the transport for one channel at a time.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    server_url: String,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: &ConnectConfig, notifier: Notifier) -> Self {
        let (events, _) = broadcast::channel(STATE_BUFFER);
        Self {
            connector,
            server_url: config.server_url.clone(),
            reconnect: config.reconnect.clone(),
            connect_timeout: config.connect_timeout,
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: ConnectionState::Idle,
                    generation: 0,
                    channel_key: None,
                    sink: None,
                    task: None,
                }),
                events,
                notifier,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Stream of state changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.events.subscribe()
    }

    /// Start connecting to `channel_key`, replacing any channel already open.
    ///
    /// Must be called from within a tokio runtime. Inbound frames arrive on
    /// the returned receiver in transport order.
    pub fn open(&self, channel_key: &str) -> SyncResult<(ChannelHandle, mpsc::Receiver<Vec<u8>>)> {
        let url = transport::channel_url(&self.server_url, channel_key)?;
        self.inner.close(None);

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let generation = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            shared.channel_key = Some(channel_key.to_string());
            shared.generation
        };

        tracing::info!(channel = %channel_key, "opening channel");
        let task = tokio::spawn(run_channel(
            self.inner.clone(),
            self.connector.clone(),
            url,
            generation,
            self.reconnect.clone(),
            self.connect_timeout,
            frames_tx,
        ));

        {
            let mut shared = self.inner.lock();
            if shared.generation == generation {
                shared.task = Some(task);
            } else {
                task.abort();
            }
        }

        Ok((
            ChannelHandle {
                generation,
                channel_key: channel_key.to_string(),
                inner: self.inner.clone(),
            },
            frames_rx,
        ))
    }

    /// Close the channel behind `handle`. Idempotent; a stale handle is a no-op.
    pub fn close(&self, handle: &ChannelHandle) {
        self.inner.close(Some(handle.generation));
    }

    /// Close whatever channel is active.
    pub fn shutdown(&self) {
        self.inner.close(None);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.close(None);
    }
}

/// Reference to one opened channel.
///
/// Only valid until the channel is closed or replaced; afterwards every
/// operation reports the channel as idle.
#[derive(Clone)]
pub struct ChannelHandle {
    generation: u64,
    channel_key: String,
    inner: Arc<Inner>,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("generation", &self.generation)
            .field("channel_key", &self.channel_key)
            .finish()
    }
}

impl ChannelHandle {
    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }

    /// Whether this handle still refers to the live channel.
    pub fn is_current(&self) -> bool {
        self.inner.lock().generation == self.generation
    }

    pub fn state(&self) -> ConnectionState {
        let shared = self.inner.lock();
        if shared.generation == self.generation {
            shared.state
        } else {
            ConnectionState::Idle
        }
    }

    /// Write one text frame. Fails with `NotOpen` unless the channel is open.
    pub async fn send_text(&self, text: &str) -> SyncResult<()> {
        let sink = {
            let shared = self.inner.lock();
            if shared.generation != self.generation {
                return Err(SyncError::NotOpen(ConnectionState::Idle.to_string()));
            }
            match (&shared.state, &shared.sink) {
                (ConnectionState::Open, Some(sink)) => sink.clone(),
                (state, _) => return Err(SyncError::NotOpen(state.to_string())),
            }
        };
        let mut sink = sink.lock().await;
        sink.send_text(text).await
    }
}

enum LoopExit {
    Fault(String),
    ConsumerGone,
}

async fn receive_loop(source: &mut dyn FrameSource, frames: &mpsc::Sender<Vec<u8>>) -> LoopExit {
    loop {
        match source.next_frame().await {
            Ok(Some(frame)) => {
                tracing::trace!(len = frame.len(), "frame received");
                if frames.send(frame).await.is_err() {
                    return LoopExit::ConsumerGone;
                }
            }
            Ok(None) => return LoopExit::Fault("closed by peer".into()),
            Err(e) => return LoopExit::Fault(e.to_string()),
        }
    }
}

async fn run_channel(
    inner: Arc<Inner>,
    connector: Arc<dyn Connector>,
    url: String,
    generation: u64,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    frames: mpsc::Sender<Vec<u8>>,
) {
    let mut backoff = reconnect.backoff();
    let mut failures: u32 = 0;

    loop {
        if !inner.transition(generation, ConnectionState::Connecting, None) {
            return;
        }
        tracing::debug!(url = %url, attempt = failures + 1, "connecting");

        let attempt = time::timeout(connect_timeout, connector.connect(&url))
            .await
            .unwrap_or_else(|_| Err(SyncError::Timeout));
        let connected = match attempt {
            Ok(connection) => Some(connection),
            Err(e) => {
                tracing::warn!(error = %e, timeout_ms = connect_timeout.as_millis() as u64, "connect failed");
                None
            }
        };

        if let Some(Connection { sink, mut source }) = connected {
            let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(sink));
            if !inner.install_open(generation, sink.clone()) {
                let _ = sink.lock().await.close().await;
                return;
            }
            backoff.reset();
            failures = 0;
            tracing::info!(url = %url, "channel open");

            match receive_loop(&mut *source, &frames).await {
                LoopExit::ConsumerGone => {
                    tracing::debug!("frame consumer dropped; closing channel");
                    inner.close(Some(generation));
                    return;
                }
                LoopExit::Fault(reason) => {
                    tracing::warn!(reason = %reason, "transport fault");
                }
            }
            if !inner.fault(generation) {
                return;
            }
        }

        failures = failures.saturating_add(1);
        if reconnect.max_retries.is_some_and(|max| failures > max) {
            tracing::warn!(failures, "reconnect attempts exhausted");
            inner.give_up(generation, failures);
            return;
        }

        let delay = backoff.next_delay();
        let notice = format!("Connection lost. Retrying in {:.1}s", delay.as_secs_f64());
        let next = ConnectionState::Reconnecting {
            attempt: failures,
            delay,
        };
        if !inner.transition(generation, next, Some((notice, Severity::Error))) {
            return;
        }
        tracing::info!(attempt = failures, delay_ms = delay.as_millis() as u64, "reconnecting");
        time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backoff::Jitter;
    use crate::testing::{peer, ScriptedConnector};

    fn config(max_retries: Option<u32>) -> ConnectConfig {
        ConnectConfig {
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(400),
                jitter: Jitter::None,
                max_retries,
            },
            ..Default::default()
        }
    }

    fn manager(connector: Arc<ScriptedConnector>, max_retries: Option<u32>) -> ConnectionManager {
        ConnectionManager::new(connector, &config(max_retries), Notifier::default())
    }

    async fn next(rx: &mut broadcast::Receiver<ConnectionState>) -> ConnectionState {
        rx.recv().await.unwrap()
    }

    fn reconnecting(attempt: u32, ms: u64) -> ConnectionState {
        ConnectionState::Reconnecting {
            attempt,
            delay: Duration::from_millis(ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_and_delivers_frames_in_order() {
        let (conn, peer) = peer();
        let manager = manager(ScriptedConnector::with(vec![conn]), None);
        let mut states = manager.subscribe();

        let (handle, mut frames) = manager.open("PAIR1").unwrap();
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, ConnectionState::Open);
        assert_eq!(handle.state(), ConnectionState::Open);

        peer.push("one");
        peer.push("two");
        assert_eq!(frames.recv().await.unwrap(), b"one");
        assert_eq!(frames.recv().await.unwrap(), b"two");

        let notes = manager.inner.notifier.snapshot();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Info);
    }

    /// Handshake that never completes.
    struct Stalled;

    impl Connector for Stalled {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = SyncResult<Connection>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handshake_times_out_into_reconnecting() {
        let config = ConnectConfig {
            connect_timeout: Duration::from_secs(2),
            ..config(None)
        };
        let manager = ConnectionManager::new(Arc::new(Stalled), &config, Notifier::default());
        let mut states = manager.subscribe();
        let (handle, _frames) = manager.open("PAIR1").unwrap();

        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, reconnecting(1, 100));
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert!(matches!(
            handle.send_text("hi").await,
            Err(SyncError::NotOpen(_))
        ));
        manager.close(&handle);
    }

    #[tokio::test(start_paused = true)]
    async fn fault_reconnects_and_resets_backoff() {
        let (first, first_peer) = peer();
        let (second, second_peer) = peer();
        let connector = ScriptedConnector::with(vec![first, second]);
        let manager = manager(connector.clone(), None);
        let mut states = manager.subscribe();
        let (_handle, _frames) = manager.open("PAIR1").unwrap();

        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, ConnectionState::Open);

        drop(first_peer);
        assert_eq!(next(&mut states).await, ConnectionState::Faulted);
        assert_eq!(next(&mut states).await, reconnecting(1, 100));
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, ConnectionState::Open);

        // Back on base delay after a successful open.
        drop(second_peer);
        assert_eq!(next(&mut states).await, ConnectionState::Faulted);
        assert_eq!(next(&mut states).await, reconnecting(1, 100));

        // Script is empty now: every attempt is refused and the delay grows.
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, reconnecting(2, 200));
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, reconnecting(3, 400));
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, reconnecting(4, 400));

        let errors = manager
            .inner
            .notifier
            .snapshot()
            .into_iter()
            .filter(|n| n.severity == Severity::Error)
            .count();
        assert!(errors >= 1);
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_backoff_stops_reconnecting() {
        let connector = ScriptedConnector::with(vec![]);
        let manager = manager(connector.clone(), None);
        let mut states = manager.subscribe();
        let (handle, _frames) = manager.open("PAIR1").unwrap();

        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, reconnecting(1, 100));
        let attempts = connector.attempts();

        manager.close(&handle);
        time::sleep(Duration::from_secs(60)).await;

        assert_eq!(next(&mut states).await, ConnectionState::Idle);
        assert!(matches!(
            states.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(connector.attempts(), attempts);
        assert_eq!(handle.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_close_passes_through_closing_once() {
        let (conn, _peer) = peer();
        let manager = manager(ScriptedConnector::with(vec![conn]), None);
        let mut states = manager.subscribe();
        let (handle, mut frames) = manager.open("PAIR1").unwrap();
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, ConnectionState::Open);
        let notes_before = manager.inner.notifier.snapshot().len();

        manager.close(&handle);
        manager.close(&handle);
        assert_eq!(next(&mut states).await, ConnectionState::Closing);
        assert_eq!(next(&mut states).await, ConnectionState::Idle);
        assert!(matches!(
            states.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(manager.inner.notifier.snapshot().len(), notes_before);
        assert!(!handle.is_current());
        assert!(frames.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let connector = ScriptedConnector::with(vec![]);
        let manager = manager(connector.clone(), Some(2));
        let mut states = manager.subscribe();
        let (_handle, _frames) = manager.open("PAIR1").unwrap();

        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, reconnecting(1, 100));
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, reconnecting(2, 200));
        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, ConnectionState::Idle);
        assert_eq!(connector.attempts(), 3);

        let last = manager.inner.notifier.snapshot().pop().unwrap();
        assert!(last.text.contains("3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_channel() {
        let (conn, peer) = peer();
        let manager = manager(ScriptedConnector::with(vec![conn]), None);
        let mut states = manager.subscribe();
        let (handle, _frames) = manager.open("PAIR1").unwrap();

        assert!(matches!(handle.send_text("early").await, Err(SyncError::NotOpen(_))));

        assert_eq!(next(&mut states).await, ConnectionState::Connecting);
        assert_eq!(next(&mut states).await, ConnectionState::Open);
        handle.send_text("hello").await.unwrap();
        assert_eq!(peer.sent(), ["hello"]);

        manager.close(&handle);
        assert!(matches!(handle.send_text("late").await, Err(SyncError::NotOpen(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_invalidates_previous_handle() {
        let (first, _first_peer) = peer();
        let (second, _second_peer) = peer();
        let manager = manager(ScriptedConnector::with(vec![first, second]), None);
        let (old, _old_frames) = manager.open("PAIR1").unwrap();
        let (new, _new_frames) = manager.open("PAIR2").unwrap();

        assert!(!old.is_current());
        assert!(new.is_current());
        assert_eq!(new.channel_key(), "PAIR2");
        manager.close(&old);
        assert!(new.is_current());
    }

    #[test]
    fn open_rejects_bad_channel_key() {
        let manager = manager(ScriptedConnector::with(vec![]), None);
        assert!(matches!(manager.open("a/b"), Err(SyncError::Config(_))));
    }
}
