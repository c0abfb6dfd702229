// ABOUTME: Data models for lumen-client
// ABOUTME: Turn, task status, and the JSON wire types of the chat backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who a turn is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Whether a turn is resolved or still a placeholder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    #[default]
    Final,
    Pending,
}

/// One message unit in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Set when the turn records a failed outcome
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), TurnStatus::Final)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), TurnStatus::Final)
    }

    /// A final assistant turn carrying an error outcome
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content)
        }
    }

    /// An in-flight assistant placeholder
    pub fn pending(content: impl Into<String>, task_id: Option<String>) -> Self {
        Self {
            task_id,
            ..Self::new(Role::Assistant, content.into(), TurnStatus::Pending)
        }
    }

    fn new(role: Role, content: String, status: TurnStatus) -> Self {
        Self {
            role,
            content,
            status,
            task_id: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.status == TurnStatus::Final
    }
}

/// Progress counter reported by a running task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

/// Status of a backend task as reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[serde(alias = "pending")]
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Opaque credentials and settings forwarded with every chat request.
///
/// The dispatcher never interprets these fields; they are flattened into the
/// request body next to `message`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Body of `POST /chat`
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    #[serde(flatten)]
    pub context: &'a ChatContext,
}

/// Action tag for a reply that started a background task
pub const ACTION_ASYNC_INITIATE: &str = "autosci_initiate_prompt";
/// Action tag of the older two-step trigger (no task id, caller posts `/execute_autosci`)
pub const ACTION_LEGACY_INITIATE: &str = "autosci_initiate";

/// Reply of `POST /chat` and `POST /execute_autosci`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Acknowledgement text of `/execute_autosci`
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply of `GET /check_autosci_status/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReply {
    pub status: TaskStatus,
    #[serde(default, alias = "result")]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Option<Progress>,
}

impl StatusReply {
    pub fn running(progress: Option<Progress>) -> Self {
        Self {
            status: TaskStatus::Running,
            response: None,
            error: None,
            progress,
        }
    }

    pub fn completed(response: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            response: Some(response.into()),
            error: None,
            progress: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            response: None,
            error: Some(error.into()),
            progress: None,
        }
    }
}
