//! Live inspector for one tab

use crate::config::Config;
use crate::inspector::{prompt, App};
use crate::replay::Replayer;
use crate::session::SessionClient;
use anyhow::{Context, Result};
use console::style;
use lotus_common::TabId;
use tokio::sync::mpsc;

pub async fn run(tab_id: TabId, server: Option<String>) -> Result<()> {
    use cliclack::{intro, outro};

    if tab_id < 0 {
        anyhow::bail!("Tab ids are non-negative, got {}", tab_id);
    }

    let mut config = Config::load()?;
    if let Some(server) = server {
        config.server_url = server;
    }
    let url = config.session_url(tab_id);

    intro(style(" lotus ").on_cyan().black().to_string())?;
    cliclack::log::info(format!(
        "Watching tab {} via {}",
        style(tab_id).cyan(),
        style(&url).dim()
    ))?;

    let (events, outbound) = SessionClient::new(url).spawn();
    let replayer = Replayer::new().context("Failed to build HTTP client")?;
    let app = App::new(tab_id, outbound, replayer);

    let (commands_tx, commands_rx) = mpsc::channel(16);
    let app_task = tokio::spawn(app.run(events, commands_rx));
    let prompt_task = tokio::task::spawn_blocking(move || prompt::run(commands_tx));

    // The prompt owns the command sender; once it returns the app stops and
    // takes the session client down with it
    let prompt_result = prompt_task.await.context("Prompt task panicked")?;
    app_task.await.context("Inspector task panicked")?;
    prompt_result?;

    outro("Bye")?;
    Ok(())
}
