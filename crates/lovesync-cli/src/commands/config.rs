//! `lovesync config`: inspect or create the config file.

use std::path::Path;

use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, Password};

use crate::config::Config;

/// Render the config as TOML with the session token hidden.
pub fn render(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.server.token.is_some() {
        shown.server.token = Some("<redacted>".to_string());
    }
    toml::to_string_pretty(&shown).context("failed to serialize config")
}

pub fn show(config: &Config, path: &Path) -> Result<()> {
    println!("# {}", path.display());
    print!("{}", render(config)?);
    Ok(())
}

pub fn path(path: &Path) -> Result<()> {
    println!("{}", path.display());
    Ok(())
}

/// Prompt for the server settings and write them to `path`.
pub fn init(existing: &Config, path: &Path) -> Result<()> {
    if path.exists()
        && !Confirm::new()
            .with_prompt(format!("{} exists. Overwrite?", path.display()))
            .default(false)
            .interact()?
    {
        println!("Left {} unchanged.", path.display());
        return Ok(());
    }

    let mut config = existing.clone();
    config.server.url = Input::new()
        .with_prompt("Server URL")
        .default(config.server.url.clone())
        .interact_text()?;
    config.server.identity = Input::new()
        .with_prompt("Your email")
        .with_initial_text(config.server.identity.clone())
        .interact_text()?;
    let token: String = Password::new()
        .with_prompt("Session token (leave empty to skip)")
        .allow_empty_password(true)
        .interact()?;
    if !token.is_empty() {
        config.server.token = Some(token);
    }
    let pair_code: String = Input::new()
        .with_prompt("Pair code (optional)")
        .allow_empty(true)
        .interact_text()?;
    config.server.pair_code = (!pair_code.trim().is_empty()).then(|| pair_code.trim().to_string());

    config.validate()?;
    config.save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
