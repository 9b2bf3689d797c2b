//! `lovesync chat <pair-code>`: interactive chat on one channel.
//!
//! Lines typed on stdin are sent as text messages; lines starting with `/`
//! are commands. Incoming messages, connection changes and notifications
//! are printed as they happen. Own messages are printed once the server has
//! confirmed them (or once they fail).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use lovesync_client::{ChatSession, ConnectConfig, ConnectionState};
use lovesync_core::messages::{ChatMessage, DeliveryState};
use lovesync_core::notify::NotificationId;
use lovesync_core::SyncError;

use crate::terminal::{format_message, format_notification, Style};

const HELP: &str = "\
Commands:
  /image <url>   send an image by URL
  /retry         re-send the last failed message
  /discard       drop the last failed message
  /history       refetch the backlog
  /quit          leave the chat";

/// A parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Text(String),
    Image(String),
    Retry,
    Discard,
    History,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "image" | "img" if !arg.is_empty() => Input::Image(arg.to_string()),
        "retry" => Input::Retry,
        "discard" => Input::Discard,
        "history" => Input::History,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

/// Tracks what has been printed so each message appears once.
#[derive(Default)]
struct Printed {
    seen: HashMap<String, DeliveryState>,
    notified: HashSet<NotificationId>,
}

impl Printed {
    /// Lines for messages that are new or newly failed. Pending entries wait.
    fn fresh(&mut self, messages: &[ChatMessage], me: &str, style: Style) -> Vec<String> {
        let mut lines = Vec::new();
        for message in messages {
            if message.delivery_state == DeliveryState::Pending {
                continue;
            }
            let previous = self.seen.insert(message.id.clone(), message.delivery_state);
            if previous != Some(message.delivery_state) {
                lines.push(format_message(message, me, style));
            }
        }
        lines
    }

    fn notifications(&mut self, session: &ChatSession, style: Style) {
        for notification in session.notifications() {
            if self.notified.insert(notification.id) {
                println!("{}", format_notification(&notification, style));
            }
        }
    }
}

fn last_failed(session: &ChatSession) -> Option<String> {
    session
        .messages()
        .into_iter()
        .rev()
        .find(|m| m.delivery_state == DeliveryState::Failed)
        .map(|m| m.id)
}

/// Run the interactive chat loop until `/quit` or end of input.
pub async fn run(config: &ConnectConfig, pair_code: &str) -> Result<()> {
    let session = ChatSession::connect(config, pair_code)
        .with_context(|| format!("failed to open chat {pair_code}"))?;
    info!(pair_code = %pair_code, "chat session opened");

    let style = Style::detect();
    let me = config.identity.clone();
    println!("Chatting on {pair_code}. Type a message and press Enter, /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut changes = session.watch_messages();
    let mut states = session.subscribe_state();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut printed = Printed::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Help => println!("{HELP}"),
                    Input::Unknown(cmd) => println!("unknown command: {cmd} (try /help)"),
                    Input::Text(text) => report(session.send(&text).await),
                    Input::Image(url) => report(session.send_image(&url).await),
                    Input::Retry => match last_failed(&session) {
                        Some(id) => report(session.composer().retry(&id).await),
                        None => println!("nothing to retry"),
                    },
                    Input::Discard => match last_failed(&session) {
                        Some(id) => report(session.composer().discard(&id)),
                        None => println!("nothing to discard"),
                    },
                    Input::History => match session.refresh_history().await {
                        Ok(changed) => println!("history refreshed ({changed} new)"),
                        Err(e) => println!("history refresh failed: {e}"),
                    },
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                for line in printed.fresh(&session.messages(), &me, style) {
                    println!("{line}");
                }
            }
            state = states.recv() => match state {
                Ok(ConnectionState::Idle) => {
                    printed.notifications(&session, style);
                    println!("disconnected from {pair_code}");
                    break;
                }
                Ok(state) => debug!(%state, "connection state"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => printed.notifications(&session, style),
        }
    }

    session.close();
    Ok(())
}

/// Send errors are shown inline; the failed entry stays in the log.
fn report<T>(result: Result<T, SyncError>) {
    match result {
        Ok(_) => {}
        Err(SyncError::SendFailed { reason, .. }) => {
            println!("not sent: {reason} (/retry or /discard)");
        }
        Err(e) => println!("{e}"),
    }
}
