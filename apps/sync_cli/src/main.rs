use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use client_core::{load_config, ClientEvent, StoreChange, SyncClient};
use shared::domain::{MessageId, Scope, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Config file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    session_token: String,
    /// `global` or a group id.
    #[arg(long, default_value = "global")]
    scope: String,
}

enum Command {
    Send(String),
    Older,
    Open(Scope),
    Delete(MessageId),
    Who,
    Foreground(bool),
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };
    let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let command = match name {
        "older" => Command::Older,
        "open" => Command::Open(
            Scope::from_query_value(arg).ok_or_else(|| anyhow!("unknown scope '{arg}'"))?,
        ),
        "delete" if !arg.trim().is_empty() => Command::Delete(MessageId::new(arg.trim())),
        "who" => Command::Who,
        "bg" => Command::Foreground(false),
        "fg" => Command::Foreground(true),
        "quit" => Command::Quit,
        _ => bail!("unknown command '/{name}'"),
    };
    Ok(Some(command))
}

/// Returns `false` once the session is gone and the CLI should exit.
async fn print_event(client: &SyncClient, event: ClientEvent) -> bool {
    match event {
        ClientEvent::Store { scope, change } => match change {
            StoreChange::Inserted { message, .. } => {
                let text = message.body.as_text().unwrap_or("[file]");
                println!(
                    "[{scope}] #{} {}: {text}",
                    message.sequence, message.sender_display_name
                );
            }
            StoreChange::Removed { id, .. } => println!("[{scope}] message {id} deleted"),
            StoreChange::Cleared { removed } => println!("[{scope}] {removed} messages cleared"),
        },
        ClientEvent::Unread(_) => println!("== {}", client.window_title().await),
        ClientEvent::ConnectionStateChanged(state) => println!("** {}", state.status_text()),
        ClientEvent::PresenceUpdated(users) => println!("** {} users online", users.len()),
        ClientEvent::GroupUpdated(group) => println!("** group {} is now '{}'", group.group_id, group.name),
        ClientEvent::GroupRemoved(group_id) => println!("** group {group_id} is gone"),
        ClientEvent::Notice(notice) => eprintln!("!! {notice}"),
        ClientEvent::SessionEnded(end) => {
            println!("** session ended: {end:?}");
            return false;
        }
        ClientEvent::ConversationPhaseChanged { .. } | ClientEvent::ActiveScopeChanged(_) => {}
    }
    true
}

async fn run_command(client: &SyncClient, command: Command) -> Result<bool> {
    match command {
        Command::Send(text) => client.send_message(&text).await?,
        Command::Older => client.load_older().await,
        Command::Open(scope) => client.activate(scope).await,
        Command::Delete(message_id) => client.delete_message(message_id).await?,
        Command::Who => client.request_online_users().await?,
        Command::Foreground(foreground) => client.set_foreground(foreground).await,
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        config.server_url = server_url.trim_end_matches('/').to_string();
    }
    let scope = Scope::from_query_value(&args.scope)
        .ok_or_else(|| anyhow!("invalid --scope '{}'", args.scope))?;

    let client = SyncClient::connect(config)?;
    let mut events = BroadcastStream::new(client.subscribe_events());
    if !client
        .restore_session(UserId(args.user_id), args.session_token)
        .await?
    {
        bail!("session rejected by server; log in again");
    }
    client.activate(scope).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => match event {
                Some(Ok(event)) => {
                    if !print_event(&client, event).await {
                        break;
                    }
                }
                Some(Err(err)) => warn!(error = %err, "cli: event stream lagged"),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => match run_command(&client, command).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => eprintln!("!! {err}"),
                    },
                    Ok(None) => {}
                    Err(err) => eprintln!("!! {err}"),
                }
            }
        }
    }

    client.logout().await;
    client.shutdown().await;
    Ok(())
}
