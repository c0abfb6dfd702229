// ABOUTME: Entry point for the lumen-chat terminal client.
// ABOUTME: Parses CLI args, loads settings, and runs the chosen command.

mod cli;
mod render;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Interactive mode logs to a file so output does not interleave with the chat
    match cli.command {
        None | Some(Command::Chat) => lumen_log::init_file("lumen-chat"),
        _ => lumen_log::init(),
    }

    let settings = cli.load_settings()?;
    tracing::debug!(?settings, "Loaded configuration");

    match &cli.command {
        None | Some(Command::Chat) => cli::chat::run(&cli, &settings).await,
        Some(Command::Send { message }) => cli::send::run(&cli, &settings, message).await,
        Some(Command::History { json }) => cli::history::show(&cli, *json),
        Some(Command::Clear) => cli::history::clear(&cli),
        Some(Command::Config { action }) => cli::config::run(&cli, action.as_ref(), &settings),
    }
}
