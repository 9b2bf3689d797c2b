//! WebSocket transport for the chat channel.
//!
//! One text frame per JSON envelope. The session cookie rides on the upgrade
//! request; pings are answered from the read half.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use lovesync_core::error::{SyncError, SyncResult};

use super::{Connection, Connector, FrameSink, FrameSource, SESSION_COOKIE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// Connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    session_token: Option<String>,
}

impl WsConnector {
    pub fn new(session_token: Option<String>) -> Self {
        Self { session_token }
    }
}

impl Connector for WsConnector {
    fn connect<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = SyncResult<Connection>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = url
                .into_client_request()
                .map_err(|e| SyncError::Transport(format!("invalid WebSocket URL {url}: {e}")))?;
            if let Some(token) = &self.session_token {
                let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}"))
                    .map_err(|e| SyncError::Config(format!("session token is not a valid header: {e}")))?;
                request.headers_mut().insert(COOKIE, cookie);
            }

            let (ws_stream, _response) = connect_async(request)
                .await
                .map_err(|e| SyncError::Transport(format!("WebSocket connect error: {e}")))?;

            tracing::info!("WebSocket connected to {}", url);

            let (ws_sink, ws_read) = ws_stream.split();
            let ws_sink = Arc::new(Mutex::new(ws_sink));

            Ok(Connection {
                sink: Box::new(WsSink {
                    sink: ws_sink.clone(),
                    closed: false,
                }),
                source: Box::new(WsSource {
                    read: ws_read,
                    sink: ws_sink,
                }),
            })
        })
    }
}

struct WsSink {
    sink: SharedSink,
    closed: bool,
}

impl FrameSink for WsSink {
    fn send_text<'a>(
        &'a mut self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed {
                return Err(SyncError::Transport("WebSocket already closed".into()));
            }
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(text.to_owned()))
                .await
                .map_err(|e| SyncError::Transport(format!("WS write error: {e}")))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.closed {
                self.closed = true;
                let mut sink = self.sink.lock().await;
                let _ = sink.send(Message::Close(None)).await;
            }
            Ok(())
        })
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
    sink: SharedSink,
}

impl FrameSource for WsSource {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = SyncResult<Option<Vec<u8>>>> + Send + '_>> {
        Box::pin(async move {
            while let Some(msg) = self.read.next().await {
                match msg {
                    Ok(Message::Text(text)) => return Ok(Some(text.into_bytes())),
                    Ok(Message::Binary(data)) => return Ok(Some(data)),
                    Ok(Message::Ping(payload)) => {
                        let mut sink = self.sink.lock().await;
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "WebSocket close frame received");
                        return Ok(None);
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(SyncError::Transport(format!("WebSocket read error: {e}")));
                    }
                }
            }
            Ok(None)
        })
    }
}
