//! Data model for the lovesync chat channel.
//!
//! Inbound frames decode into an [`Envelope`]; the router turns envelopes into
//! [`ChatMessage`]s or [`Alert`]s. Outbound user messages are [`OutboundFrame`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload type of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }

    /// Parse the wire spelling (`"text"` / `"image"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a message as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Locally authored, not yet confirmed by the server.
    Pending,
    /// Confirmed, or received from the server.
    Sent,
    /// Transmission failed; kept visible for retry or discard.
    Failed,
}

/// A single chat message in a channel's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub content_type: ContentType,
    pub timestamp: DateTime<Utc>,
    pub delivery_state: DeliveryState,
}

impl ChatMessage {
    /// A server-originated message (already `Sent`).
    pub fn received(
        id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
        content_type: ContentType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            content: content.into(),
            content_type,
            timestamp,
            delivery_state: DeliveryState::Sent,
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type == ContentType::Image
    }
}

/// Severity of a UI notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Info,
}

/// An out-of-band alert (e.g. a reminder firing) received on the chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub first_seen_at: DateTime<Utc>,
}

impl Alert {
    /// Single-line text used when surfacing the alert as a notification.
    pub fn notification_text(&self) -> String {
        if self.body.trim().is_empty() {
            format!("Reminder: {}", self.title)
        } else {
            format!("Reminder: {} ({})", self.title, self.body)
        }
    }
}

/// Classification of an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeKind {
    ChatMessage,
    Alert,
    /// A kind this client does not understand. Ignored by the router.
    Unknown(String),
}

/// Chat fields carried by an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    /// Canonical id, when the server supplies one (`id` or `_id`).
    pub id: Option<String>,
    pub sender: String,
    pub content: String,
    pub content_type: ContentType,
}

/// Alert fields carried by an envelope (the `reminder` object).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPayload {
    pub title: String,
    pub body: String,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub chat: Option<ChatPayload>,
    pub alert: Option<AlertPayload>,
    pub server_timestamp: Option<DateTime<Utc>>,
    /// Pair code the server stamped on the frame, if any.
    pub pair_code: Option<String>,
    /// Set on frames the server replays from the stored conversation on connect.
    pub historical: bool,
}

/// A user-authored message on its way to the server.
///
/// Serializes to `{"content": ..., "type": "text"|"image"}`, which is both the
/// WebSocket frame and the REST send-message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub content: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
}

impl OutboundFrame {
    pub fn new(content: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            content: content.into(),
            content_type,
        }
    }
}
