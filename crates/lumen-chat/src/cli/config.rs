// ABOUTME: Config command implementation.
// ABOUTME: Shows the effective settings, the config path, or updates one value.

use anyhow::{anyhow, Result};
use lumen_client::Settings;

use super::{Cli, ConfigAction};

pub fn run(cli: &Cli, action: Option<&ConfigAction>, settings: &Settings) -> Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            println!("{}", cli.config_path()?.display());
        }
        Some(ConfigAction::Set { pair }) => {
            let path = cli.config_path()?;
            // Edit the file as written, not the env/CLI-overridden view
            let mut on_disk = Settings::load_from_file(&path)?;
            set_pair(&mut on_disk, pair)?;
            on_disk.save(&path)?;
            println!("Updated {}", path.display());
        }
        None => {
            print!("{}", render(settings)?);
        }
    }
    Ok(())
}

fn set_pair(settings: &mut Settings, pair: &str) -> Result<()> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got {}", pair))?;
    settings.set(key.trim(), value.trim())?;
    Ok(())
}

/// Effective settings as TOML with passwords masked
fn render(settings: &Settings) -> Result<String> {
    let mut shown = settings.clone();
    for credential in [&mut shown.credentials.nextcloud, &mut shown.credentials.caldav]
        .into_iter()
        .flatten()
    {
        if !credential.password.is_empty() {
            credential.password = "***".to_string();
        }
    }
    Ok(toml::to_string_pretty(&shown)?)
}
