//! `lovesync history`: print the stored backlog of the signed-in pair.
//!
//! Fetches over REST, merges through a `MessageStore` so ordering and
//! de-duplication match what an open chat would show.

use anyhow::{Context, Result};
use tracing::warn;

use lovesync_client::{ChatApi, ConnectConfig, HttpChatApi};
use lovesync_core::messages::ChatMessage;
use lovesync_core::store::MessageStore;

use crate::terminal::{format_message, Style};

/// Fetch the backlog and return it in display order.
pub async fn fetch(api: &dyn ChatApi) -> Result<Vec<ChatMessage>> {
    let batch = api
        .fetch_history()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("failed to fetch history")?;
    if batch.rejected > 0 {
        warn!(rejected = batch.rejected, "skipped malformed history entries");
    }

    let mut store = MessageStore::new();
    store.merge_history(batch.messages);
    Ok(store.snapshot())
}

/// Keep only the newest `limit` messages.
fn tail(mut messages: Vec<ChatMessage>, limit: Option<usize>) -> Vec<ChatMessage> {
    if let Some(limit) = limit {
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);
    }
    messages
}

pub async fn run(config: &ConnectConfig, limit: Option<usize>, json: bool) -> Result<()> {
    let api = HttpChatApi::new(&config.server_url, config.session_token.clone(), config.connect_timeout)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let messages = tail(fetch(&api).await?, limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!("No messages yet.");
        return Ok(());
    }
    let style = Style::detect();
    for message in &messages {
        println!("{}", format_message(message, &config.identity, style));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lovesync_core::messages::ContentType;

    fn at(id: &str, minute: u32) -> ChatMessage {
        ChatMessage::received(
            id,
            "you@x",
            id,
            ContentType::Text,
            Utc.with_ymd_and_hms(2025, 2, 14, 19, minute, 0).unwrap(),
        )
    }

    #[test]
    fn tail_keeps_the_newest() {
        let all = vec![at("a", 1), at("b", 2), at("c", 3)];
        let ids: Vec<_> = tail(all.clone(), Some(2)).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["b", "c"]);
        assert_eq!(tail(all.clone(), None).len(), 3);
        assert_eq!(tail(all, Some(10)).len(), 3);
    }
}
