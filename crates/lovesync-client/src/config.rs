use std::time::Duration;

use serde::{Deserialize, Serialize};

use lovesync_core::error::{SyncError, SyncResult};
use lovesync_core::notify::{DEFAULT_CAPACITY, DEFAULT_TTL};

use crate::backoff::{Backoff, Jitter};
use crate::transport;

/// When an optimistic send counts as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// Wait for the server to echo the message back on the channel.
    #[default]
    Echo,
    /// A successful socket write is enough.
    FireAndForget,
}

/// Reconnect tuning for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Jitter,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay, self.jitter)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Jitter::Full,
            max_retries: None,
        }
    }
}

/// Configuration for a chat session.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server base URL, e.g. `http://localhost:8000`.
    pub server_url: String,
    /// Email of the local user. Used to recognise echoes of our own sends.
    pub identity: String,
    /// Value of the `loveconnect` session cookie.
    pub session_token: Option<String>,
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    pub notification_ttl: Duration,
    /// `None` leaves the notification queue unbounded.
    pub notification_capacity: Option<usize>,
    /// How often expired notifications are swept.
    pub prune_interval: Duration,
    pub confirm_policy: ConfirmPolicy,
    /// Surface reminder alerts as notifications.
    pub alerts_enabled: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".into(),
            identity: String::new(),
            session_token: None,
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            notification_ttl: DEFAULT_TTL,
            notification_capacity: Some(DEFAULT_CAPACITY),
            prune_interval: Duration::from_millis(250),
            confirm_policy: ConfirmPolicy::Echo,
            alerts_enabled: true,
        }
    }
}

impl ConnectConfig {
    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        transport::websocket_base(&self.server_url)
            .map_err(|e| SyncError::Config(format!("server_url: {e}")))?;
        if self.reconnect.base_delay.is_zero() {
            return Err(SyncError::Config("backoff base delay must be positive".into()));
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(SyncError::Config(format!(
                "backoff max delay {:?} is below base delay {:?}",
                self.reconnect.max_delay, self.reconnect.base_delay
            )));
        }
        if self.notification_ttl.is_zero() {
            return Err(SyncError::Config("notification TTL must be positive".into()));
        }
        if self.prune_interval.is_zero() {
            return Err(SyncError::Config("prune interval must be positive".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(SyncError::Config("connect timeout must be positive".into()));
        }
        if self.notification_capacity == Some(0) {
            return Err(SyncError::Config("notification capacity must be at least 1".into()));
        }
        Ok(())
    }
}
