//! lovesync: terminal client for a paired chat.
//!
//! Opens the live channel for a pair code, prints the backlog, and sends
//! messages with delivery feedback. One-off `history` and `send` go over
//! REST without holding a socket.

mod commands;
mod config;
mod terminal;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::error;

/// lovesync chat client
#[derive(Parser)]
#[command(name = "lovesync", version, about = "Terminal client for lovesync paired chat")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Server base URL (overrides config)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Your account email (overrides config)
    #[arg(short = 'i', long = "identity", global = true)]
    identity: Option<String>,

    /// Session token sent as the `loveconnect` cookie
    #[arg(long, global = true, env = "LOVESYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join the live chat for a pair code
    Chat {
        /// Pair code (defaults to server.pair_code from config)
        pair_code: Option<String>,
    },

    /// Print the stored message backlog
    History {
        /// Show only the newest N messages
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print JSON instead of chat lines
        #[arg(long)]
        json: bool,
    },

    /// Send one message over REST
    Send {
        /// Message text (or image URL with --image)
        text: String,

        /// Send as an image URL
        #[arg(long)]
        image: bool,
    },

    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config (token redacted)
    Show,
    /// Interactively write a config file
    Init,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("lovesync: {e:#}");
        std::process::exit(1);
    }
}

const LOG_TARGETS: [&str; 4] = ["lovesync", "lovesync_cli", "lovesync_client", "lovesync_core"];

/// Filter directives: every lovesync crate at `debug` when verbose, else `warn`.
fn log_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "warn" };
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let mut cfg = config::Config::load(&config_path)?;

    // CLI flags override the file.
    if let Some(server) = cli.server {
        cfg.server.url = server;
    }
    if let Some(identity) = cli.identity {
        cfg.server.identity = identity;
    }
    if cli.token.is_some() {
        cfg.server.token = cli.token;
    }

    match cli.command {
        Command::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config::show(&cfg, &config_path),
            ConfigAction::Init => commands::config::init(&cfg, &config_path),
            ConfigAction::Path => commands::config::path(&config_path),
        },
        Command::Chat { pair_code } => {
            cfg.validate()?;
            let Some(pair_code) = pair_code.or_else(|| cfg.server.pair_code.clone()) else {
                bail!("no pair code given and none set in {}", config_path.display());
            };
            commands::chat::run(&cfg.connect_config(), &pair_code).await
        }
        Command::History { limit, json } => {
            cfg.validate()?;
            commands::history::run(&cfg.connect_config(), limit, json).await
        }
        Command::Send { text, image } => {
            cfg.validate()?;
            commands::send::run(&cfg.connect_config(), &text, image).await
        }
    }
}
