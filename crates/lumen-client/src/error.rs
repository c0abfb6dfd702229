// ABOUTME: Error types for lumen-client
// ABOUTME: Unified error taxonomy for network, backend, task, and storage failures

use thiserror::Error;

/// Errors that can occur in lumen-client operations
#[derive(Debug, Error)]
pub enum LumenError {
    /// Transport-level failure (connect, timeout, non-success status without a body).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered but reported an explicit `error` field.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A polled task reached the terminal `failed` state.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The persisted history could not be decoded.
    #[error("Stored history is corrupt: {0}")]
    StorageCorrupt(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown placeholder handle: {0}")]
    UnknownHandle(u64),

    #[error("Placeholder {0} was already finalized")]
    AlreadyFinalized(u64),

    #[error("Task {0} is already being polled")]
    AlreadyPolling(String),

    #[error("Pending turns cannot be persisted")]
    PendingTurn,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for LumenError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LumenError::InvalidResponse(err.to_string())
        } else {
            LumenError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LumenError {
    fn from(err: serde_json::Error) -> Self {
        LumenError::InvalidResponse(err.to_string())
    }
}

impl LumenError {
    /// Text shown to the user when this error ends a turn.
    pub fn user_message(&self) -> String {
        match self {
            LumenError::Backend(msg) => format!("Error: {}", msg),
            LumenError::TaskFailed(msg) => format!("AutoSCI Error: {}", msg),
            LumenError::Network(_) | LumenError::InvalidResponse(_) => {
                "Sorry, something went wrong with the request.".to_string()
            }
            other => format!("Error: {}", other),
        }
    }
}
