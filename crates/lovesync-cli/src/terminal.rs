//! Rendering of chat lines and notifications for the terminal.
//!
//! Styling goes through crossterm and is dropped when stdout is not a tty.

use std::io::IsTerminal;

use crossterm::style::Stylize;

use lovesync_core::messages::{ChatMessage, DeliveryState, Severity};
use lovesync_core::notify::Notification;

/// Whether to emit ANSI styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    pub color: bool,
}

impl Style {
    /// Color only when stdout is a terminal.
    pub fn detect() -> Self {
        Self {
            color: std::io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }
}

fn state_marker(state: DeliveryState) -> &'static str {
    match state {
        DeliveryState::Pending => " (sending)",
        DeliveryState::Sent => "",
        DeliveryState::Failed => " (failed)",
    }
}

/// One chat line: `[HH:MM] sender: content`.
///
/// `me` is printed as "you". Images show their URL behind an `[image]` tag.
pub fn format_message(message: &ChatMessage, me: &str, style: Style) -> String {
    let time = message.timestamp.format("%H:%M").to_string();
    let who = if !me.is_empty() && message.sender == me {
        "you".to_string()
    } else {
        message.sender.clone()
    };
    let body = if message.is_image() {
        format!("[image] {}", message.content)
    } else {
        message.content.clone()
    };
    let marker = state_marker(message.delivery_state);

    if !style.color {
        return format!("[{time}] {who}: {body}{marker}");
    }
    let who = if who == "you" { who.cyan() } else { who.magenta() };
    let marker = match message.delivery_state {
        DeliveryState::Failed => marker.red(),
        _ => marker.dark_grey(),
    };
    format!("{} {}: {body}{marker}", format!("[{time}]").dark_grey(), who.bold())
}

/// A notification line, prefixed with a severity tag.
pub fn format_notification(notification: &Notification, style: Style) -> String {
    let tag = match notification.severity {
        Severity::Success => "ok",
        Severity::Error => "error",
        Severity::Info => "info",
    };
    if !style.color {
        return format!("-- {tag}: {}", notification.text);
    }
    let tag = match notification.severity {
        Severity::Success => tag.green(),
        Severity::Error => tag.red(),
        Severity::Info => tag.blue(),
    };
    format!("-- {tag}: {}", notification.text)
}
