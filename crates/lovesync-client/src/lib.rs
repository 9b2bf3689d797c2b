//! lovesync-client: async client library for the lovesync chat channel.
//!
//! Keeps a reconnecting WebSocket channel to a pair's conversation, merges
//! replayed, fetched and live messages into one ordered log, and sends with
//! optimistic local entries that reconcile against the server's echo.
//!
//! # Quick Start
//!
//! ```no_run
//! use lovesync_client::{ChatSession, ConnectConfig};
//!
//! # async fn example() -> lovesync_core::SyncResult<()> {
//! let session = ChatSession::connect(
//!     &ConnectConfig {
//!         server_url: "https://love.example.com".into(),
//!         identity: "me@love.example".into(),
//!         session_token: Some("<jwt>".into()),
//!         ..Default::default()
//!     },
//!     "AB12CD",
//! )?;
//!
//! session.send("good morning").await?;
//! for message in session.messages() {
//!     println!("{}: {}", message.sender, message.content);
//! }
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backoff;
pub mod composer;
pub mod config;
pub mod connection;
pub mod notifier;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export primary public types.
pub use api::{ChatApi, HttpChatApi};
pub use backoff::{Backoff, Jitter};
pub use composer::Composer;
pub use config::{ConfirmPolicy, ConnectConfig, ReconnectConfig};
pub use connection::{ChannelHandle, ConnectionManager, ConnectionState};
pub use notifier::Notifier;
pub use session::ChatSession;
pub use store::SharedStore;
pub use transport::{Connection, Connector, FrameSink, FrameSource, WsConnector};

// Re-export lovesync-core error types for convenience.
pub use lovesync_core::{SyncError, SyncResult};
