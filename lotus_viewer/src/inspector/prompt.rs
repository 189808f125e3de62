//! Interactive command prompt
//!
//! Runs on a blocking thread and talks to the [`App`](super::App) task
//! through its command channel.

use super::Command;
use crate::mirror::{DeleteChoice, Relation};
use crate::replay::ReplayDraft;
use anyhow::Result;
use console::style;
use std::io;
use tokio::sync::{mpsc, oneshot};

const HELP: &str = "\
ls [filter]     List requests, newest first (filter on url or method)
show <id>       Show request and response details
replay <id>     Edit and resend a request
rm <id>         Delete a request from this view
clear           Clear the tab's history
status          Connection status
quit            Exit";

/// A parsed prompt line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    List(String),
    Show(String),
    Replay(String),
    Delete(String),
    Clear,
    Status,
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let require_id = |make: fn(String) -> Input| {
        if rest.is_empty() {
            Err(format!("Usage: {} <id>", word))
        } else {
            Ok(make(rest.to_string()))
        }
    };

    match word {
        "" => Ok(Input::Empty),
        "ls" | "list" => Ok(Input::List(rest.to_string())),
        "show" => require_id(Input::Show),
        "replay" => require_id(Input::Replay),
        "rm" | "delete" => require_id(Input::Delete),
        "clear" => Ok(Input::Clear),
        "status" => Ok(Input::Status),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        other => Err(format!("Unknown command: {} (try help)", other)),
    }
}

/// Read commands until the user quits or the inspector goes away
pub fn run(commands: mpsc::Sender<Command>) -> Result<()> {
    loop {
        let line: String = match cliclack::input(style("lotus").cyan().to_string())
            .placeholder("help")
            .required(false)
            .interact()
        {
            Ok(line) => line,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(message) => {
                cliclack::log::error(message)?;
                continue;
            }
        };

        let delivered = match input {
            Input::Empty => !commands.is_closed(),
            Input::Help => {
                cliclack::note("Commands", HELP)?;
                !commands.is_closed()
            }
            Input::Quit => return Ok(()),
            Input::List(filter) => commands.blocking_send(Command::List { filter }).is_ok(),
            Input::Show(id) => commands.blocking_send(Command::Show { id }).is_ok(),
            Input::Status => commands.blocking_send(Command::Status).is_ok(),
            Input::Replay(id) => edit_and_replay(&commands, id)?,
            Input::Delete(id) => delete(&commands, id)?,
            Input::Clear => {
                let confirmed = cliclack::confirm("Clear all captured requests for this tab?")
                    .initial_value(false)
                    .interact()?;
                !confirmed || commands.blocking_send(Command::Clear).is_ok()
            }
        };

        if !delivered {
            return Ok(());
        }
    }
}

/// Single-line form of a JSON document, for editing in one input field
fn compact(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|value| value.to_string())
        .unwrap_or_else(|_| text.to_string())
}

fn edit_and_replay(commands: &mpsc::Sender<Command>, id: String) -> Result<bool> {
    let (reply, rx) = oneshot::channel();
    if commands
        .blocking_send(Command::Draft {
            id: id.clone(),
            reply,
        })
        .is_err()
    {
        return Ok(false);
    }
    let Ok(found) = rx.blocking_recv() else {
        return Ok(false);
    };
    let draft = match found {
        Ok(draft) => draft,
        Err(message) => {
            cliclack::log::error(message)?;
            return Ok(true);
        }
    };

    let method: String = cliclack::input("Method")
        .default_input(&draft.method)
        .interact()?;
    let url: String = cliclack::input("URL").default_input(&draft.url).interact()?;
    let headers: String = cliclack::input("Headers (JSON object)")
        .default_input(&compact(&draft.headers))
        .required(false)
        .interact()?;
    let body: String = cliclack::input("Body")
        .default_input(&compact(&draft.body))
        .required(false)
        .interact()?;

    let draft = ReplayDraft {
        method,
        url,
        headers,
        body,
    };
    if let Err(e) = draft.parse_headers() {
        cliclack::log::error(e.to_string())?;
        return Ok(true);
    }

    cliclack::log::info(format!("Sending {} {}", draft.method, draft.url))?;
    Ok(commands.blocking_send(Command::Replay { id, draft }).is_ok())
}

fn delete(commands: &mpsc::Sender<Command>, id: String) -> Result<bool> {
    let (reply, rx) = oneshot::channel();
    if commands
        .blocking_send(Command::Relation {
            id: id.clone(),
            reply,
        })
        .is_err()
    {
        return Ok(false);
    }
    let Ok(relation) = rx.blocking_recv() else {
        return Ok(false);
    };

    let choice = match relation {
        Some(Relation::Root { children }) => Some(
            cliclack::select(format!("{} has {} replay(s)", id, children.len()))
                .item(
                    DeleteChoice::Cascade,
                    "Delete replays too",
                    "Removes the request and every replay of it",
                )
                .item(
                    DeleteChoice::KeepChildren,
                    "Keep replays",
                    "Replays stay and are marked orphaned",
                )
                .interact()?,
        ),
        _ => None,
    };

    Ok(commands.blocking_send(Command::Delete { id, choice }).is_ok())
}
