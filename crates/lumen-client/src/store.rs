// ABOUTME: Key-value backed persistence for the conversation log
// ABOUTME: Versioned JSON envelope, whole-log rewrite on append, lossy recovery on corruption

use crate::error::LumenError;
use crate::models::Turn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Storage key under which the history envelope is kept
pub const HISTORY_KEY: &str = "chat_history";

/// Current layout version of the history envelope
pub const HISTORY_VERSION: u32 = 1;

/// Minimal durable key-value surface (the role local storage plays in a browser)
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LumenError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LumenError>;
    fn remove(&self, key: &str) -> Result<(), LumenError>;
}

/// In-memory store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, LumenError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| LumenError::Storage(std::io::Error::other("store lock poisoned")))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LumenError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LumenError::Storage(std::io::Error::other("store lock poisoned")))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LumenError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LumenError::Storage(std::io::Error::other("store lock poisoned")))?;
        entries.remove(key);
        Ok(())
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, LumenError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LumenError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), LumenError> {
        (**self).remove(key)
    }
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location: <data_dir>/lumen
    pub fn default_dir() -> Result<PathBuf, LumenError> {
        dirs::data_dir()
            .map(|d| d.join("lumen"))
            .ok_or_else(|| LumenError::Config("could not determine data directory".to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, LumenError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LumenError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        // Write then rename so a crash never leaves a half-written log
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LumenError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    turns: Vec<Turn>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLayout {
    Versioned(Envelope),
    Legacy(Vec<Turn>),
}

/// Append-only log of final turns, rewritten in full on every append.
///
/// Assumes a single writer per store; two sessions appending to the same
/// backing store will lose each other's turns.
pub struct LogStore<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> LogStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_key(store, HISTORY_KEY)
    }

    pub fn with_key(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Append a final turn. Pending placeholders are rejected.
    pub fn append(&self, turn: Turn) -> Result<(), LumenError> {
        if !turn.is_final() {
            return Err(LumenError::PendingTurn);
        }
        // Corrupt history is replaced; an unreadable store must not be clobbered
        let mut turns = match self.try_load() {
            Ok(turns) => turns,
            Err(LumenError::StorageCorrupt(reason)) => {
                tracing::warn!(key = %self.key, %reason, "overwriting corrupt chat history");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        turns.push(turn);
        self.write(turns)
    }

    /// All persisted turns, oldest first. Corrupt data yields an empty log.
    pub fn load_all(&self) -> Vec<Turn> {
        match self.try_load() {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "discarding unreadable chat history");
                Vec::new()
            }
        }
    }

    /// Strict variant of [`LogStore::load_all`] that reports why loading failed.
    pub fn try_load(&self) -> Result<Vec<Turn>, LumenError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let layout: StoredLayout = serde_json::from_str(&raw)
            .map_err(|e| LumenError::StorageCorrupt(e.to_string()))?;
        let turns = match layout {
            StoredLayout::Versioned(env) if env.version == HISTORY_VERSION => env.turns,
            StoredLayout::Versioned(env) => {
                return Err(LumenError::StorageCorrupt(format!(
                    "unsupported history version {}",
                    env.version
                )))
            }
            StoredLayout::Legacy(turns) => turns,
        };

        if turns.iter().any(|t| !t.is_final()) {
            return Err(LumenError::StorageCorrupt(
                "history contains a pending turn".to_string(),
            ));
        }
        Ok(turns)
    }

    /// Remove the durable log entirely
    pub fn clear(&self) -> Result<(), LumenError> {
        self.store.remove(&self.key)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn write(&self, turns: Vec<Turn>) -> Result<(), LumenError> {
        let envelope = Envelope {
            version: HISTORY_VERSION,
            turns,
        };
        let raw = serde_json::to_string(&envelope)?;
        self.store.set(&self.key, &raw)
    }
}
