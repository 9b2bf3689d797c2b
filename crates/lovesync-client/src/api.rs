//! REST collaborator: message backlog and the send fallback.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::COOKIE;
use serde::Deserialize;
use tracing::{debug, warn};

use lovesync_core::codec::{decode_history, HistoryBatch};
use lovesync_core::error::{SyncError, SyncResult};
use lovesync_core::messages::OutboundFrame;

use crate::transport::{self, SESSION_COOKIE};

/// Path of the backlog endpoint.
pub const HISTORY_PATH: &str = "/loveconnect/api/get-messages/";

/// Path of the send endpoint.
pub const SEND_PATH: &str = "/loveconnect/api/send-message/";

/// HTTP side of the chat server.
pub trait ChatApi: Send + Sync {
    /// Full backlog of the caller's pair, oldest first.
    fn fetch_history(&self) -> Pin<Box<dyn Future<Output = SyncResult<HistoryBatch>> + Send + '_>>;

    /// Store one message without going through the socket.
    fn post_message<'a>(
        &'a self,
        frame: &'a OutboundFrame,
    ) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// `reqwest`-backed [`ChatApi`].
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base: String,
    session_token: Option<String>,
}

impl HttpChatApi {
    pub fn new(server_url: &str, session_token: Option<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: transport::http_base(server_url)?,
            session_token,
        })
    }

    pub fn history_url(&self) -> String {
        format!("{}{HISTORY_PATH}", self.base)
    }

    pub fn send_url(&self) -> String {
        format!("{}{SEND_PATH}", self.base)
    }

    fn with_cookie(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_token {
            Some(token) => req.header(COOKIE, format!("{SESSION_COOKIE}={token}")),
            None => req,
        }
    }
}

/// Turn a non-2xx response into an error, preferring the server's `{"error": ...}` text.
fn status_error(status: reqwest::StatusCode, body: &[u8]) -> SyncError {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    if detail.is_empty() {
        SyncError::Http(status.to_string())
    } else {
        SyncError::Http(format!("{status}: {detail}"))
    }
}

impl ChatApi for HttpChatApi {
    fn fetch_history(&self) -> Pin<Box<dyn Future<Output = SyncResult<HistoryBatch>> + Send + '_>> {
        Box::pin(async move {
            let url = self.history_url();
            debug!(url = %url, "fetching message history");
            let response = self
                .with_cookie(self.client.get(&url))
                .send()
                .await
                .map_err(|e| SyncError::Http(format!("history request failed: {e}")))?;

            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| SyncError::Http(format!("history body unreadable: {e}")))?;
            if !status.is_success() {
                return Err(status_error(status, &body));
            }

            let batch = decode_history(&body)?;
            if batch.rejected > 0 {
                warn!(rejected = batch.rejected, "skipped undecodable history entries");
            }
            Ok(batch)
        })
    }

    fn post_message<'a>(
        &'a self,
        frame: &'a OutboundFrame,
    ) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.send_url();
            debug!(url = %url, content_type = %frame.content_type, "posting message");
            let response = self
                .with_cookie(self.client.post(&url))
                .json(frame)
                .send()
                .await
                .map_err(|e| SyncError::Http(format!("send request failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.bytes().await.unwrap_or_default();
            Err(status_error(status, &body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_follow_server_base() {
        let api = HttpChatApi::new("ws://localhost:8000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(api.history_url(), "http://localhost:8000/loveconnect/api/get-messages/");
        assert_eq!(api.send_url(), "http://localhost:8000/loveconnect/api/send-message/");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(HttpChatApi::new("ftp://x", None, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn status_errors_carry_server_reason() {
        let err = status_error(reqwest::StatusCode::FORBIDDEN, br#"{"error":"User not paired"}"#);
        assert_eq!(err.to_string(), "http error: 403 Forbidden: User not paired");

        let err = status_error(reqwest::StatusCode::BAD_GATEWAY, b"");
        assert_eq!(err.to_string(), "http error: 502 Bad Gateway");
    }
}
