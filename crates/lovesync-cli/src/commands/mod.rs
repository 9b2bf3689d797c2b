//! CLI subcommand implementations.

pub mod chat;
pub mod config;
pub mod history;
pub mod send;
