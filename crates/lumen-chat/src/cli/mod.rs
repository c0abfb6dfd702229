// ABOUTME: CLI command definitions using clap.
// ABOUTME: Handles subcommands like send, chat, history, clear, config.

pub mod chat;
pub mod config;
pub mod history;
pub mod send;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lumen_client::{FileStore, Settings, SettingsOverrides};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lumen-chat", about = "Chat with a lumen backend from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Backend URL override (e.g., http://localhost:4556)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Status poll interval override in milliseconds
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Ask the backend for evolution mode discoveries
    #[arg(long, global = true)]
    pub evolution: bool,

    /// Config file (defaults to ~/.config/lumen/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for chat history (defaults to the platform data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive chat (the default)
    Chat,
    /// Send one message, wait for the final answer, and print it
    Send {
        /// Message to send
        message: String,
    },
    /// Print the saved conversation
    History {
        /// Print raw JSON turns instead of formatted lines
        #[arg(long)]
        json: bool,
    },
    /// Delete the saved conversation
    Clear,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show config file path
    Path,
    /// Set a config value, e.g. `chat.num_theories=2`
    Set { pair: String },
}

impl Cli {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            base_url: self.base_url.clone(),
            poll_interval_ms: self.poll_interval_ms,
            use_evolution_mode: self.evolution.then_some(true),
        }
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(Settings::default_path()?),
        }
    }

    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.config_path()?;
        Ok(Settings::load(Some(&path), &self.overrides())?)
    }

    pub fn history_store(&self) -> Result<FileStore> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => FileStore::default_dir()?,
        };
        Ok(FileStore::new(dir))
    }
}
