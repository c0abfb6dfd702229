// ABOUTME: History and clear commands.
// ABOUTME: Prints or deletes the saved conversation without contacting the backend.

use anyhow::Result;
use lumen_client::{LogStore, Renderer, Turn};

use super::Cli;
use crate::render::TerminalRenderer;

pub fn show(cli: &Cli, json: bool) -> Result<()> {
    let log = LogStore::new(cli.history_store()?);
    // Strict load so a corrupt file is reported instead of shown as empty
    let turns = log.try_load()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&turns)?);
        return Ok(());
    }

    print_turns(&mut TerminalRenderer::stdout(true), &turns);
    Ok(())
}

fn print_turns<W: std::io::Write>(renderer: &mut TerminalRenderer<W>, turns: &[Turn]) {
    for turn in turns {
        renderer.render_final(turn);
    }
}

pub fn clear(cli: &Cli) -> Result<()> {
    let log = LogStore::new(cli.history_store()?);
    log.clear()?;
    println!("Chat history cleared.");
    Ok(())
}
