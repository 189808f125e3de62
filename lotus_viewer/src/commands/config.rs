//! Config commands (set-server, show)

use crate::config::{config_file, Config};
use anyhow::{Context, Result};
use console::style;

/// Point the inspector at a different capture process
pub fn set_server(url: &str) -> Result<()> {
    let url = url.trim().trim_end_matches('/');
    reqwest::Url::parse(url).with_context(|| format!("Invalid server URL: {}", url))?;

    let mut config = Config::load()?;
    config.server_url = url.to_string();
    config.save()?;

    cliclack::log::success(format!("Server set to {}", style(url).cyan()))?;
    Ok(())
}

pub fn show() -> Result<()> {
    let config = Config::load()?;
    println!("Config file: {}", config_file().display());
    println!("Server URL:  {}", config.server_url);
    println!("Sessions:    {}/ws/lotus-<TAB_ID>", config.websocket_url());
    Ok(())
}
