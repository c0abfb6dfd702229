// ABOUTME: Request dispatcher and the HTTP chat backend
// ABOUTME: One outbound request per send, classified into immediate, async-task, or failure

use crate::error::LumenError;
use crate::models::{
    ChatContext, ChatReply, ChatRequest, StatusReply, ACTION_ASYNC_INITIATE,
    ACTION_LEGACY_INITIATE,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The remote chat service, as consumed by the dispatcher and the poller
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `POST /chat`
    async fn chat(&self, message: &str, context: &ChatContext) -> Result<ChatReply, LumenError>;

    /// `POST /execute_autosci`
    async fn execute_autosci(&self, context: &ChatContext) -> Result<ChatReply, LumenError>;

    /// `GET /check_autosci_status/{task_id}`
    async fn check_status(&self, task_id: &str) -> Result<StatusReply, LumenError>;
}

/// Result of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The backend answered synchronously
    Immediate { text: String },
    /// The backend created a background task that must be polled
    AsyncStarted {
        task_id: String,
        ack: Option<String>,
    },
    /// Older two-step trigger: the caller must follow up with `send_execute`
    LegacyTrigger { ack: String },
    /// Network or backend failure, already phrased for display
    Failed { error_text: String },
}

/// Sends chat requests and classifies the replies. Never retries.
pub struct Dispatcher<B> {
    backend: Arc<B>,
}

impl<B: ChatBackend> Dispatcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Send a user message with the opaque context attached.
    pub async fn send(&self, user_text: &str, context: &ChatContext) -> Outcome {
        tracing::debug!(len = user_text.len(), "dispatching chat message");
        match self.backend.chat(user_text, context).await {
            Ok(reply) => Self::classify(reply, "Error"),
            Err(e) => {
                tracing::warn!(error = %e, "chat request failed");
                Outcome::Failed {
                    error_text: e.user_message(),
                }
            }
        }
    }

    /// Follow-up request for [`Outcome::LegacyTrigger`].
    pub async fn send_execute(&self, context: &ChatContext) -> Outcome {
        tracing::debug!("dispatching autosci execution");
        match self.backend.execute_autosci(context).await {
            Ok(reply) => Self::classify(reply, "AutoSCI Error"),
            Err(e) => {
                tracing::warn!(error = %e, "autosci execution request failed");
                Outcome::Failed {
                    error_text:
                        "Sorry, something went wrong while trying to make an AutoSCI discovery."
                            .to_string(),
                }
            }
        }
    }

    fn classify(reply: ChatReply, error_prefix: &str) -> Outcome {
        if let Some(error) = reply.error {
            return Outcome::Failed {
                error_text: format!("{}: {}", error_prefix, error),
            };
        }

        match reply.action.as_deref() {
            Some(ACTION_ASYNC_INITIATE) => match reply.task_id {
                Some(task_id) => Outcome::AsyncStarted {
                    task_id,
                    ack: reply.response,
                },
                None => Outcome::Failed {
                    error_text: LumenError::InvalidResponse(
                        "async reply without task_id".to_string(),
                    )
                    .user_message(),
                },
            },
            Some(ACTION_LEGACY_INITIATE) => Outcome::LegacyTrigger {
                ack: reply.response.unwrap_or_default(),
            },
            _ => match (reply.response, reply.task_id) {
                (Some(text), _) => Outcome::Immediate { text },
                (None, Some(task_id)) => Outcome::AsyncStarted {
                    task_id,
                    ack: reply.message,
                },
                (None, None) => Outcome::Failed {
                    error_text: LumenError::InvalidResponse(
                        "reply had neither response nor task_id".to_string(),
                    )
                    .user_message(),
                },
            },
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`ChatBackend`] over JSON/HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, LumenError> {
        Self::with_timeouts(base_url, Duration::from_secs(120), Duration::from_secs(10))
    }

    pub fn with_timeouts(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, LumenError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LumenError::Config(format!("invalid base URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(LumenError::Config(format!(
                "base URL cannot carry paths: {}",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, LumenError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LumenError::Config(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, LumenError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => Err(LumenError::Backend(err.error)),
            Err(_) => Err(LumenError::Network(format!("backend returned {}", status))),
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn chat(&self, message: &str, context: &ChatContext) -> Result<ChatReply, LumenError> {
        let url = self.endpoint(&["chat"])?;
        let resp = self
            .client
            .post(url)
            .json(&ChatRequest { message, context })
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn execute_autosci(&self, context: &ChatContext) -> Result<ChatReply, LumenError> {
        let url = self.endpoint(&["execute_autosci"])?;
        let resp = self.client.post(url).json(context).send().await?;
        Self::read_json(resp).await
    }

    async fn check_status(&self, task_id: &str) -> Result<StatusReply, LumenError> {
        let url = self.endpoint(&["check_autosci_status", task_id])?;
        let resp = self.client.get(url).send().await?;
        Self::read_json(resp).await
    }
}
