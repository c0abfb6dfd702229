// ABOUTME: Client settings file handling
// ABOUTME: TOML config with env var and .env support, plus the request context it produces

use crate::dispatch::HttpBackend;
use crate::error::LumenError;
use crate::models::ChatContext;
use crate::poller::PollerConfig;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backend cap on parallel discovery processes
pub const MAX_PARALLEL_THEORIES: u32 = 3;

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub chat: ChatSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:4556".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// 0 polls until the task reaches a terminal status
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    #[serde(default)]
    pub max_transport_retries: u32,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_duration_secs: default_max_duration(),
            max_transport_retries: 0,
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    3000
}

fn default_max_duration() -> u64 {
    30 * 60
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    #[serde(default)]
    pub use_evolution_mode: bool,
    #[serde(default = "default_num_theories")]
    pub num_theories: u32,
    #[serde(default)]
    pub persist_failures: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            use_evolution_mode: false,
            num_theories: default_num_theories(),
            persist_failures: false,
        }
    }
}

fn default_num_theories() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct CredentialSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nextcloud: Option<Credential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caldav: Option<Credential>,
}

/// Login for a third-party service the backend talks to on the user's behalf
#[derive(Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Credential {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Credential {
    pub fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.user.is_empty() && !self.password.is_empty()
    }
}

// Keep passwords out of debug logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Values given on the command line; highest precedence
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    pub base_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub use_evolution_mode: Option<bool>,
}

impl Settings {
    /// Load settings with precedence: CLI > env > .env > file > defaults
    pub fn load(path: Option<&Path>, overrides: &SettingsOverrides) -> Result<Self, LumenError> {
        // Load .env file if present (silently ignore if missing)
        let _ = dotenvy::dotenv();

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let mut settings = Self::load_from_file(&path)?;
        settings.apply_env(|key| std::env::var(key).ok());
        settings.apply_overrides(overrides)?;
        Ok(settings)
    }

    /// Read a settings file; a missing file yields defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, LumenError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| LumenError::Config(format!("Failed to read config: {}", e)))?;

        let mut settings: Self = toml::from_str(&content)
            .map_err(|e| LumenError::Config(format!("Failed to parse config: {}", e)))?;
        settings.server.base_url = normalize_base_url(&settings.server.base_url)?;
        Ok(settings)
    }

    /// Apply `LUMEN_*` environment overrides. Unparsable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LUMEN_BASE_URL") {
            match normalize_base_url(&url) {
                Ok(url) => self.server.base_url = url,
                Err(e) => tracing::warn!(error = %e, "ignoring LUMEN_BASE_URL"),
            }
        }
        if let Some(interval) = lookup("LUMEN_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.trim().parse::<u64>() {
                self.polling.interval_ms = ms;
            }
        }
        if let Some(evolution) = lookup("LUMEN_EVOLUTION") {
            if let Some(flag) = parse_flag(&evolution) {
                self.chat.use_evolution_mode = flag;
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &SettingsOverrides) -> Result<(), LumenError> {
        if let Some(url) = &overrides.base_url {
            self.server.base_url = normalize_base_url(url)?;
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.polling.interval_ms = ms;
        }
        if let Some(flag) = overrides.use_evolution_mode {
            self.chat.use_evolution_mode = flag;
        }
        Ok(())
    }

    /// Set one value by dotted key, e.g. `chat.num_theories`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), LumenError> {
        let invalid = |e: &dyn std::fmt::Display| {
            LumenError::Config(format!("invalid value for {}: {}", key, e))
        };
        match key {
            "server.base_url" => self.server.base_url = normalize_base_url(value)?,
            "server.request_timeout_secs" => {
                self.server.request_timeout_secs = value.parse().map_err(|e| invalid(&e))?
            }
            "server.connect_timeout_secs" => {
                self.server.connect_timeout_secs = value.parse().map_err(|e| invalid(&e))?
            }
            "polling.interval_ms" => {
                self.polling.interval_ms = value.parse().map_err(|e| invalid(&e))?
            }
            "polling.max_duration_secs" => {
                self.polling.max_duration_secs = value.parse().map_err(|e| invalid(&e))?
            }
            "polling.max_transport_retries" => {
                self.polling.max_transport_retries = value.parse().map_err(|e| invalid(&e))?
            }
            "polling.backoff_max_ms" => {
                self.polling.backoff_max_ms = value.parse().map_err(|e| invalid(&e))?
            }
            "chat.use_evolution_mode" => {
                self.chat.use_evolution_mode =
                    parse_flag(value).ok_or_else(|| invalid(&"expected true or false"))?
            }
            "chat.num_theories" => {
                self.chat.num_theories = value.parse().map_err(|e| invalid(&e))?
            }
            "chat.persist_failures" => {
                self.chat.persist_failures =
                    parse_flag(value).ok_or_else(|| invalid(&"expected true or false"))?
            }
            _ => {
                if let Some((service, field)) = key
                    .strip_prefix("credentials.")
                    .and_then(|rest| rest.split_once('.'))
                {
                    let slot = match service {
                        "nextcloud" => &mut self.credentials.nextcloud,
                        "caldav" => &mut self.credentials.caldav,
                        _ => return Err(LumenError::Config(format!("unknown key: {}", key))),
                    };
                    let credential = slot.get_or_insert_with(Credential::default);
                    match field {
                        "url" => credential.url = value.to_string(),
                        "user" => credential.user = value.to_string(),
                        "password" => credential.password = value.to_string(),
                        _ => return Err(LumenError::Config(format!("unknown key: {}", key))),
                    }
                } else {
                    return Err(LumenError::Config(format!("unknown key: {}", key)));
                }
            }
        }
        Ok(())
    }

    /// `num_theories` clamped to what the backend accepts
    pub fn num_theories(&self) -> u32 {
        self.chat.num_theories.clamp(1, MAX_PARALLEL_THEORIES)
    }

    /// Opaque fields sent with every chat request.
    pub fn context(&self) -> ChatContext {
        let mut context = ChatContext::new()
            .with("use_evolution_mode", self.chat.use_evolution_mode)
            .with("num_theories", self.num_theories());

        let services = [
            ("nextcloud_creds", &self.credentials.nextcloud),
            ("caldav_creds", &self.credentials.caldav),
        ];
        for (field, credential) in services {
            if let Some(c) = credential.as_ref().filter(|c| c.is_complete()) {
                context.insert(
                    field,
                    serde_json::json!({
                        "url": c.url,
                        "user": c.user,
                        "password": c.password,
                    }),
                );
            }
        }
        context
    }

    pub fn poller_config(&self) -> PollerConfig {
        let max_duration = match self.polling.max_duration_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        PollerConfig {
            interval: Duration::from_millis(self.polling.interval_ms.max(1)),
            max_duration,
            max_transport_retries: self.polling.max_transport_retries,
            backoff_max: Duration::from_millis(self.polling.backoff_max_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poller: self.poller_config(),
            persist_failures: self.chat.persist_failures,
        }
    }

    pub fn http_backend(&self) -> Result<HttpBackend, LumenError> {
        HttpBackend::with_timeouts(
            &self.server.base_url,
            Duration::from_secs(self.server.request_timeout_secs),
            Duration::from_secs(self.server.connect_timeout_secs),
        )
    }

    pub fn save(&self, path: &Path) -> Result<(), LumenError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LumenError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| LumenError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| LumenError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn default_path() -> Result<PathBuf, LumenError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LumenError::Config("Could not find config directory".to_string()))?;
        Ok(config_dir.join("lumen").join("config.toml"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Normalize a backend address: default to http, drop a trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String, LumenError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(LumenError::Config("base URL is empty".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = url::Url::parse(&with_scheme)
        .map_err(|e| LumenError::Config(format!("invalid base URL {}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(with_scheme),
        other => Err(LumenError::Config(format!(
            "unsupported scheme {} in base URL {}",
            other, raw
        ))),
    }
}
