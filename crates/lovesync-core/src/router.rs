//! Classification of inbound envelopes.
//!
//! Pure dispatch: the router decides where an envelope goes but touches no
//! state itself.

use chrono::{DateTime, Utc};

use crate::codec::message_fingerprint;
use crate::messages::{Alert, ChatMessage, Envelope, EnvelopeKind, Severity};

/// Per-channel facts the router needs to classify a frame.
#[derive(Debug, Clone)]
pub struct RouteContext<'a> {
    /// Pair code of the active channel.
    pub channel_key: &'a str,
    /// When false, alerts are dropped instead of surfaced.
    pub alerts_enabled: bool,
    /// Arrival time; stands in for a missing server timestamp.
    pub now: DateTime<Utc>,
}

/// Why an envelope produced no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoOpReason {
    UnknownKind(String),
    /// Frame stamped with a different pair code.
    ForeignChannel(String),
    AlertsMuted,
    EmptyPayload,
}

/// Where an envelope should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEffect {
    InsertMessage {
        message: ChatMessage,
        historical: bool,
    },
    InsertAlert(Alert),
    NoOp(NoOpReason),
}

/// Classify an envelope.
///
/// An envelope carrying an alert is always treated as an alert, even when it
/// also looks like a chat message.
pub fn route(envelope: Envelope, ctx: &RouteContext<'_>) -> RouterEffect {
    if let Some(pair_code) = envelope.pair_code {
        if pair_code != ctx.channel_key {
            return RouterEffect::NoOp(NoOpReason::ForeignChannel(pair_code));
        }
    }

    if let EnvelopeKind::Unknown(kind) = envelope.kind {
        return RouterEffect::NoOp(NoOpReason::UnknownKind(kind));
    }

    let timestamp = envelope.server_timestamp.unwrap_or(ctx.now);

    if let Some(alert) = envelope.alert {
        if !ctx.alerts_enabled {
            return RouterEffect::NoOp(NoOpReason::AlertsMuted);
        }
        return RouterEffect::InsertAlert(Alert {
            title: alert.title,
            body: alert.body,
            severity: Severity::Info,
            first_seen_at: ctx.now,
        });
    }

    match envelope.chat {
        Some(chat) => {
            let id = chat.id.unwrap_or_else(|| {
                message_fingerprint(&chat.sender, &timestamp, chat.content_type, &chat.content)
            });
            RouterEffect::InsertMessage {
                message: ChatMessage::received(
                    id,
                    chat.sender,
                    chat.content,
                    chat.content_type,
                    timestamp,
                ),
                historical: envelope.historical,
            }
        }
        None => RouterEffect::NoOp(NoOpReason::EmptyPayload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::messages::{ContentType, DeliveryState};
    use chrono::TimeZone;

    fn ctx(now: DateTime<Utc>) -> RouteContext<'static> {
        RouteContext {
            channel_key: "PAIR42",
            alerts_enabled: true,
            now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_000, 0).unwrap()
    }

    #[test]
    fn chat_frame_becomes_a_sent_message() {
        let env = decode(
            br#"{"pairCode":"PAIR42","senderEmail":"a@b.c","type":"image",
                "content":"https://img/x.png","timestamp":"2025-01-01T00:00:00"}"#,
        )
        .unwrap();

        match route(env, &ctx(now())) {
            RouterEffect::InsertMessage {
                message,
                historical,
            } => {
                assert!(!historical);
                assert_eq!(message.content_type, ContentType::Image);
                assert_eq!(message.delivery_state, DeliveryState::Sent);
                assert_eq!(message.timestamp, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
                assert!(message.id.starts_with("fp-"));
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn replayed_frames_get_the_same_id() {
        let raw = br#"{"senderEmail":"a@b.c","type":"text","content":"hi",
            "timestamp":"2025-01-01T00:00:00.5","isHistorical":true}"#;
        let first = route(decode(raw).unwrap(), &ctx(now()));
        let second = route(decode(raw).unwrap(), &ctx(now() + chrono::Duration::seconds(30)));
        assert_eq!(first, second);
    }

    #[test]
    fn missing_server_timestamp_uses_arrival_time() {
        let env = decode(br#"{"type":"chat_message","id":"7","senderEmail":"a","content":"b"}"#)
            .unwrap();
        match route(env, &ctx(now())) {
            RouterEffect::InsertMessage { message, .. } => {
                assert_eq!(message.id, "7");
                assert_eq!(message.timestamp, now());
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn alert_wins_over_chat_shape() {
        let env = decode(
            br#"{"type":"text","senderEmail":"a@b.c","content":"hi",
                "reminder":{"title":"Dinner","description":"8pm"}}"#,
        )
        .unwrap();
        match route(env, &ctx(now())) {
            RouterEffect::InsertAlert(alert) => {
                assert_eq!(alert.title, "Dinner");
                assert_eq!(alert.severity, Severity::Info);
                assert_eq!(alert.first_seen_at, now());
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn muted_alerts_are_dropped() {
        let env = decode(br#"{"reminder":{"title":"Dinner"}}"#).unwrap();
        let mut muted = ctx(now());
        muted.alerts_enabled = false;
        assert_eq!(route(env, &muted), RouterEffect::NoOp(NoOpReason::AlertsMuted));
    }

    #[test]
    fn unknown_kinds_and_foreign_channels_are_ignored() {
        let env = decode(br#"{"type":"presence","online":true}"#).unwrap();
        assert_eq!(
            route(env, &ctx(now())),
            RouterEffect::NoOp(NoOpReason::UnknownKind("presence".into()))
        );

        let env = decode(br#"{"pairCode":"OTHER","senderEmail":"a","type":"text","content":"b"}"#)
            .unwrap();
        assert_eq!(
            route(env, &ctx(now())),
            RouterEffect::NoOp(NoOpReason::ForeignChannel("OTHER".into()))
        );
    }
}
