//! `lovesync send <text>`: post one message over REST without opening a chat.

use anyhow::{bail, Context, Result};
use tracing::info;

use lovesync_client::{ChatApi, ConnectConfig, HttpChatApi};
use lovesync_core::messages::{ContentType, OutboundFrame};

/// Build the outbound frame, rejecting blank input.
pub fn frame(text: &str, image: bool) -> Result<OutboundFrame> {
    let content = text.trim();
    if content.is_empty() {
        bail!("message is empty");
    }
    let content_type = if image { ContentType::Image } else { ContentType::Text };
    Ok(OutboundFrame::new(content, content_type))
}

pub async fn run(config: &ConnectConfig, text: &str, image: bool) -> Result<()> {
    let frame = frame(text, image)?;
    let api = HttpChatApi::new(&config.server_url, config.session_token.clone(), config.connect_timeout)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    api.post_message(&frame)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("failed to send message")?;
    info!(content_type = frame.content_type.as_str(), "message posted");

    println!("Message sent.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_rejected() {
        assert!(frame("", false).is_err());
        assert!(frame("   \n", true).is_err());
    }

    #[test]
    fn frame_kind_follows_the_flag() {
        let text = frame(" hi ", false).unwrap();
        assert_eq!(text, OutboundFrame::new("hi", ContentType::Text));

        let image = frame("https://img.example/a.png", true).unwrap();
        assert_eq!(image.content_type, ContentType::Image);
    }
}
