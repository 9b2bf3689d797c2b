//! Client configuration at `~/.lovesync/config.toml`.
//!
//! Server, identity and tuning for the chat session. CLI flags always
//! override config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lovesync_client::{ConfirmPolicy, ConnectConfig, Jitter, ReconnectConfig};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub notifications: NotificationSection,

    #[serde(default)]
    pub send: SendSection,
}

/// Where to connect and as whom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server base URL (`http(s)://` or `ws(s)://`).
    #[serde(default = "default_url")]
    pub url: String,

    /// Email of the signed-in user.
    #[serde(default)]
    pub identity: String,

    /// `loveconnect` session cookie value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Pair code used when `chat` is run without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_code: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            identity: String::new(),
            token: None,
            pair_code: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub jitter: Jitter,

    /// Give up after this many consecutive failures (absent = never).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: Jitter::default(),
            max_retries: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSection {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Maximum live notifications; 0 means unbounded.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Show reminder alerts.
    #[serde(default = "default_true")]
    pub alerts: bool,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            capacity: default_capacity(),
            alerts: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendSection {
    #[serde(default)]
    pub confirm: ConfirmPolicy,
}

fn default_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_ttl_ms() -> u64 {
    4_000
}

fn default_capacity() -> usize {
    32
}

fn default_true() -> bool {
    true
}

/// `~/.lovesync/config.toml`, or a relative fallback when there is no home directory.
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".lovesync")
        .join("config.toml")
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Session settings derived from this file.
    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_url: self.server.url.clone(),
            identity: self.server.identity.clone(),
            session_token: self.server.token.clone(),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                jitter: self.reconnect.jitter,
                max_retries: self.reconnect.max_retries,
            },
            connect_timeout: Duration::from_secs(self.reconnect.connect_timeout_secs),
            notification_ttl: Duration::from_millis(self.notifications.ttl_ms),
            notification_capacity: match self.notifications.capacity {
                0 => None,
                n => Some(n),
            },
            confirm_policy: self.send.confirm,
            alerts_enabled: self.notifications.alerts,
            ..Default::default()
        }
    }

    /// Check the file's values without connecting anywhere.
    pub fn validate(&self) -> Result<()> {
        self.connect_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("invalid configuration")
    }
}
