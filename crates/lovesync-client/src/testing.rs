//! In-memory transport and REST doubles shared by the unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use lovesync_core::codec::HistoryBatch;
use lovesync_core::error::{SyncError, SyncResult};
use lovesync_core::messages::{ChatMessage, OutboundFrame};

use crate::api::ChatApi;
use crate::transport::{Connection, Connector, FrameSink, FrameSource};

pub type Sent = Arc<Mutex<Vec<String>>>;

struct MockSink {
    sent: Sent,
}

impl FrameSink for MockSink {
    fn send_text<'a>(
        &'a mut self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl FrameSource for MockSource {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = SyncResult<Option<Vec<u8>>>> + Send + '_>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(frame) => Ok(Some(frame)),
                None => Err(SyncError::Transport("connection reset".into())),
            }
        })
    }
}

/// Server side of a scripted connection. Dropping it faults the channel.
pub struct Peer {
    pub tx: mpsc::UnboundedSender<Vec<u8>>,
    pub sent: Sent,
}

impl Peer {
    pub fn push(&self, frame: &str) {
        self.tx.send(frame.as_bytes().to_vec()).unwrap();
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

pub fn peer() -> (Connection, Peer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent: Sent = Arc::default();
    let connection = Connection {
        sink: Box::new(MockSink { sent: sent.clone() }),
        source: Box::new(MockSource { rx }),
    };
    (connection, Peer { tx, sent })
}

/// Hands out queued connections; refuses once the queue is empty.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Connection>>,
    pub attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn with(connections: Vec<Connection>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(connections.into()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    fn connect<'a>(
        &'a self,
        _url: &'a str,
    ) -> Pin<Box<dyn Future<Output = SyncResult<Connection>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SyncError::Transport("connection refused".into()))
        })
    }
}

/// REST double. Posted messages are appended to the backlog as `post_as`.
#[derive(Default)]
pub struct MemoryApi {
    pub backlog: Mutex<Vec<ChatMessage>>,
    pub posted: Mutex<Vec<OutboundFrame>>,
    pub fetches: AtomicUsize,
    pub fail_posts: bool,
    pub post_as: Option<String>,
}

impl ChatApi for MemoryApi {
    fn fetch_history(&self) -> Pin<Box<dyn Future<Output = SyncResult<HistoryBatch>> + Send + '_>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(HistoryBatch {
                messages: self.backlog.lock().unwrap().clone(),
                rejected: 0,
            })
        })
    }

    fn post_message<'a>(
        &'a self,
        frame: &'a OutboundFrame,
    ) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_posts {
                return Err(SyncError::Http("500 Internal Server Error".into()));
            }
            self.posted.lock().unwrap().push(frame.clone());
            if let Some(sender) = &self.post_as {
                let mut backlog = self.backlog.lock().unwrap();
                let id = format!("srv-{}", backlog.len() + 1);
                backlog.push(ChatMessage::received(
                    id,
                    sender.clone(),
                    frame.content.clone(),
                    frame.content_type,
                    chrono::Utc::now(),
                ));
            }
            Ok(())
        })
    }
}
