// ABOUTME: Shared logging setup for lumen binaries
// ABOUTME: init() for one-shot commands, init_file() for the interactive chat

use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// File-based logging for the interactive chat. Default: WARN level, RUST_LOG override.
/// Logs to <config_dir>/lumen/{app_name}/{app_name}.log so output never
/// interleaves with the rendered transcript.
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    let Some(config_dir) = dirs::config_dir() else {
        eprintln!("Warning: failed to set up file logging: could not determine config directory");
        return;
    };
    if let Err(e) = init_file_in(&config_dir, app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

/// Path of the log file for `app_name` under `config_dir`.
pub fn log_path(config_dir: &Path, app_name: &str) -> PathBuf {
    config_dir
        .join("lumen")
        .join(app_name)
        .join(format!("{app_name}.log"))
}

fn init_file_in(
    config_dir: &Path,
    app_name: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = log_path(config_dir, app_name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .try_init()?;

    Ok(())
}
