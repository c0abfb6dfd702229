// ABOUTME: Interactive chat loop.
// ABOUTME: Reads lines from stdin while applying discovery task progress as it arrives.

use anyhow::Result;
use colored::Colorize;
use lumen_client::{ChatSession, ChatBackend, KeyValueStore, Renderer, Settings};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::Cli;
use crate::render::TerminalRenderer;

/// Slash commands understood by the prompt
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Tasks,
    Cancel(Option<&'a str>),
    Help,
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit") | Some("exit") => Input::Quit,
        Some("tasks") => Input::Tasks,
        Some("cancel") => Input::Cancel(parts.next()),
        Some("help") => Input::Help,
        _ => Input::Message(line),
    }
}

pub async fn run(cli: &Cli, settings: &Settings) -> Result<()> {
    let backend = Arc::new(settings.http_backend()?);
    let store = cli.history_store()?;

    println!(
        "{} {}",
        "lumen".green().bold(),
        format!("connected to {}", settings.server.base_url).dimmed()
    );
    println!("{}", "Type /help for commands, /quit to leave.".dimmed());

    let mut session = ChatSession::open(
        backend,
        store,
        TerminalRenderer::stdout(true),
        settings.context(),
        settings.session_config(),
    );
    // The user's own lines are already on screen
    session.renderer_mut().set_echo_user(false);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut session, &line).await {
                    break;
                }
            }
            Some(_) = session.next_event(), if session.has_pending_tasks() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if session.has_pending_tasks() {
        tracing::info!(tasks = ?session.pending_tasks(), "cancelling tasks on exit");
        session.cancel_all();
    }
    Ok(())
}

/// Returns false when the user asked to leave.
async fn handle_line<B, S, R>(session: &mut ChatSession<B, S, R>, line: &str) -> bool
where
    B: ChatBackend + 'static,
    S: KeyValueStore,
    R: Renderer,
{
    match parse_input(line) {
        Input::Quit => return false,
        Input::Help => {
            println!("{}", "  /tasks          list running discovery tasks".dimmed());
            println!("{}", "  /cancel [id]    cancel one task, or all of them".dimmed());
            println!("{}", "  /quit           leave (running tasks are cancelled)".dimmed());
        }
        Input::Tasks => {
            let tasks = session.pending_tasks();
            if tasks.is_empty() {
                println!("{}", "  no running tasks".dimmed());
            }
            for task_id in tasks {
                println!("  {}", task_id.cyan());
            }
        }
        Input::Cancel(Some(task_id)) => {
            if !session.cancel_task(task_id) {
                println!("{}", format!("  no running task {}", task_id).yellow());
            }
        }
        Input::Cancel(None) => session.cancel_all(),
        Input::Message(text) => {
            session.submit(text).await;
        }
    }
    true
}
