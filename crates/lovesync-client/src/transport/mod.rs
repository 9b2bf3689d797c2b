//! Transport seam for the chat channel.
//!
//! The connection manager talks to a [`Connector`] and the two halves it
//! returns. The production implementation is [`WsConnector`]; tests plug in
//! scripted connectors.
//!
//! The server URL may use any of `http://`, `https://`, `ws://` or `wss://`.
//! REST calls and the WebSocket channel share one host, so the scheme is
//! mapped in both directions.

pub mod websocket;

pub use websocket::WsConnector;

use std::future::Future;
use std::pin::Pin;

use lovesync_core::error::{SyncError, SyncResult};

/// Name of the session cookie sent on the socket upgrade and REST calls.
pub const SESSION_COOKIE: &str = "loveconnect";

/// Write half of an open channel.
pub trait FrameSink: Send {
    /// Send one text frame.
    fn send_text<'a>(
        &'a mut self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>>;

    /// Best-effort close. Errors are reported but the sink is unusable afterwards either way.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + '_>>;
}

/// Read half of an open channel.
pub trait FrameSource: Send {
    /// Next inbound frame. `Ok(None)` means the peer closed the channel.
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = SyncResult<Option<Vec<u8>>>> + Send + '_>>;
}

/// Both halves of a freshly opened channel.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// Opens channels. One call per connection attempt.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = SyncResult<Connection>> + Send + 'a>>;
}

/// Split a server URL into `(secure, host_and_path)`.
fn split_scheme(url: &str) -> SyncResult<(bool, &str)> {
    let lower = url.to_lowercase();
    let (secure, skip) = if lower.starts_with("wss://") {
        (true, 6)
    } else if lower.starts_with("ws://") {
        (false, 5)
    } else if lower.starts_with("https://") {
        (true, 8)
    } else if lower.starts_with("http://") {
        (false, 7)
    } else {
        return Err(SyncError::Transport(format!(
            "unsupported URL scheme: {url} (expected http://, https://, ws:// or wss://)"
        )));
    };
    let rest = url[skip..].trim_end_matches('/');
    if rest.is_empty() {
        return Err(SyncError::Transport(format!("missing host in URL: {url}")));
    }
    Ok((secure, rest))
}

/// Base URL for WebSocket upgrades (`ws://` or `wss://`).
pub fn websocket_base(server_url: &str) -> SyncResult<String> {
    let (secure, rest) = split_scheme(server_url)?;
    Ok(format!("{}://{rest}", if secure { "wss" } else { "ws" }))
}

/// Base URL for REST calls (`http://` or `https://`).
pub fn http_base(server_url: &str) -> SyncResult<String> {
    let (secure, rest) = split_scheme(server_url)?;
    Ok(format!("{}://{rest}", if secure { "https" } else { "http" }))
}

/// WebSocket URL of the chat channel for a pair code.
pub fn channel_url(server_url: &str, channel_key: &str) -> SyncResult<String> {
    validate_channel_key(channel_key)?;
    Ok(format!("{}/ws/chat/{channel_key}/", websocket_base(server_url)?))
}

/// A pair code ends up in a URL path segment, so it must be a plain token.
pub fn validate_channel_key(channel_key: &str) -> SyncResult<()> {
    if channel_key.is_empty() {
        return Err(SyncError::Config("channel key is empty".into()));
    }
    if !channel_key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SyncError::Config(format!(
            "invalid channel key {channel_key:?} (letters, digits, '-' and '_' only)"
        )));
    }
    Ok(())
}
