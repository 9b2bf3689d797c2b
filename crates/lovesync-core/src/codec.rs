//! JSON framing for the lovesync chat channel.
//!
//! Inbound frames are UTF-8 JSON objects tagged by `type`. The server's chat
//! frames put the content type itself in `type` (`"text"` / `"image"`); newer
//! frames may use `type: "chat_message"` with a separate `contentType`.
//! Alerts carry a `reminder` object. Anything else decodes to
//! [`EnvelopeKind::Unknown`].

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::DecodeError;
use crate::messages::{
    AlertPayload, ChatMessage, ChatPayload, ContentType, Envelope, EnvelopeKind, OutboundFrame,
};

/// Naive ISO-8601 layouts the server emits (UTC, no offset).
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Decode a raw frame into an [`Envelope`].
pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
    decode_object(obj)
}

/// Encode an outbound frame as a JSON text frame.
pub fn encode(frame: &OutboundFrame) -> String {
    serde_json::json!({
        "content": frame.content,
        "type": frame.content_type.as_str(),
    })
    .to_string()
}

/// Result of decoding a REST backlog response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryBatch {
    pub messages: Vec<ChatMessage>,
    /// Entries that could not be decoded and were skipped.
    pub rejected: usize,
}

/// Decode a backlog response: `{"messages": [...]}` or a bare array.
///
/// Individual malformed entries are skipped and counted; only a malformed
/// top-level document is an error.
pub fn decode_history(raw: &[u8]) -> Result<HistoryBatch, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let entries = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("messages") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    field: "messages",
                    reason: "expected an array".into(),
                })
            }
            None => return Err(DecodeError::MissingField("messages")),
        },
        _ => return Err(DecodeError::NotAnObject),
    };

    let mut batch = HistoryBatch::default();
    for entry in entries {
        match entry.as_object().map(history_entry) {
            Some(Ok(msg)) => batch.messages.push(msg),
            _ => batch.rejected += 1,
        }
    }
    Ok(batch)
}

fn history_entry(obj: &Map<String, Value>) -> Result<ChatMessage, DecodeError> {
    let envelope = decode_object(obj)?;
    let chat = envelope.chat.ok_or(DecodeError::MissingField("content"))?;
    let timestamp = envelope
        .server_timestamp
        .ok_or(DecodeError::MissingField("timestamp"))?;
    let id = chat.id.clone().unwrap_or_else(|| {
        message_fingerprint(&chat.sender, &timestamp, chat.content_type, &chat.content)
    });
    Ok(ChatMessage::received(
        id,
        chat.sender,
        chat.content,
        chat.content_type,
        timestamp,
    ))
}

fn decode_object(obj: &Map<String, Value>) -> Result<Envelope, DecodeError> {
    let tag = match obj.get("type") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "type",
                reason: "expected a string".into(),
            })
        }
    };

    let server_timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_timestamp(v)?),
    };
    let pair_code = obj
        .get("pairCode")
        .and_then(Value::as_str)
        .map(str::to_string);
    let historical = obj
        .get("isHistorical")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let kind = classify(tag, obj)?;
    let (chat, alert) = match kind {
        EnvelopeKind::Unknown(_) => (None, None),
        EnvelopeKind::ChatMessage => {
            let chat = chat_payload(obj, tag)?;
            let alert = reminder_payload(obj)?;
            (Some(chat), alert)
        }
        EnvelopeKind::Alert => {
            let alert = match reminder_payload(obj)? {
                Some(alert) => alert,
                None => alert_fields(obj)?,
            };
            let chat = if obj.contains_key("content") && obj.contains_key("senderEmail") {
                chat_payload(obj, None).ok()
            } else {
                None
            };
            (chat, Some(alert))
        }
    };

    Ok(Envelope {
        kind,
        chat,
        alert,
        server_timestamp,
        pair_code,
        historical,
    })
}

fn classify(tag: Option<&str>, obj: &Map<String, Value>) -> Result<EnvelopeKind, DecodeError> {
    match tag {
        Some("text" | "image" | "chat_message" | "chat" | "message") => {
            Ok(EnvelopeKind::ChatMessage)
        }
        Some("alert" | "reminder" | "reminder_alert") => Ok(EnvelopeKind::Alert),
        Some(other) => Ok(EnvelopeKind::Unknown(other.to_string())),
        None if obj.contains_key("reminder") => Ok(EnvelopeKind::Alert),
        None if obj.contains_key("content") => Ok(EnvelopeKind::ChatMessage),
        None => Err(DecodeError::MissingField("type")),
    }
}

fn chat_payload(obj: &Map<String, Value>, tag: Option<&str>) -> Result<ChatPayload, DecodeError> {
    let sender = required_str(obj, "senderEmail")?;
    let content = required_str(obj, "content")?;

    let content_type = match obj.get("contentType").and_then(Value::as_str) {
        Some(ct) => ContentType::parse(ct).ok_or_else(|| DecodeError::InvalidField {
            field: "contentType",
            reason: format!("unsupported content type {ct:?}"),
        })?,
        None => tag.and_then(ContentType::parse).unwrap_or(ContentType::Text),
    };

    let id = ["id", "_id"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(id_value));

    Ok(ChatPayload {
        id,
        sender,
        content,
        content_type,
    })
}

/// Ids arrive as strings, numbers, or Mongo-style `{"$oid": "..."}` objects.
fn id_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(o) => o.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn reminder_payload(obj: &Map<String, Value>) -> Result<Option<AlertPayload>, DecodeError> {
    match obj.get("reminder") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(reminder)) => alert_fields(reminder).map(Some),
        Some(_) => Err(DecodeError::InvalidField {
            field: "reminder",
            reason: "expected an object".into(),
        }),
    }
}

fn alert_fields(obj: &Map<String, Value>) -> Result<AlertPayload, DecodeError> {
    let title = required_str(obj, "title")?;
    let body = obj
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(AlertPayload { title, body })
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
        Some(_) => Err(DecodeError::InvalidField {
            field,
            reason: "expected a string".into(),
        }),
    }
}

/// Parse a wire timestamp.
///
/// Accepts RFC 3339, naive ISO-8601 (read as UTC), and integer epoch
/// milliseconds.
pub fn parse_timestamp(v: &Value) -> Result<DateTime<Utc>, DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidField {
        field: "timestamp",
        reason,
    };

    match v {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
                .ok_or_else(|| invalid(format!("unrecognized timestamp {s:?}")))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| invalid(format!("epoch millis out of range: {n}"))),
        _ => Err(invalid("expected a string or integer".into())),
    }
}

/// Deterministic id for a server message that arrived without one.
///
/// Replays of the same stored message (reconnect, history re-fetch) produce
/// the same fingerprint.
pub fn message_fingerprint(
    sender: &str,
    timestamp: &DateTime<Utc>,
    content_type: ContentType,
    content: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update([0x1f]);
    hasher.update(
        timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    hasher.update([0x1f]);
    hasher.update(content_type.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    format!("fp-{}", hex::encode(&digest[..16]))
}
