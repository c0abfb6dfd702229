// ABOUTME: Core library for lumen - chat history, rendering contract, dispatch, task polling
// ABOUTME: Shared by lumen-chat and any other front end that renders a conversation

pub mod dispatch;
pub mod error;
pub mod markup;
pub mod models;
pub mod poller;
pub mod render;
pub mod session;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;

pub use dispatch::{ChatBackend, Dispatcher, HttpBackend, Outcome};
pub use error::LumenError;
pub use markup::RenderedContent;
pub use models::{ChatContext, ChatReply, Progress, Role, StatusReply, TaskStatus, Turn, TurnStatus};
pub use poller::{PollEvent, PollEventKind, PollState, PollerConfig, TaskPoller, TaskRegistry};
pub use render::{Element, ElementStyle, FinalizeOutcome, PlaceholderHandle, Renderer, Transcript};
pub use session::{ChatSession, SessionConfig, SubmitResult};
pub use settings::{Settings, SettingsOverrides};
pub use store::{FileStore, KeyValueStore, LogStore, MemoryStore};
