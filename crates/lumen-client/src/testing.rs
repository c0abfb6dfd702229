// ABOUTME: Scripted in-process backend for unit tests
// ABOUTME: Replays queued replies and counts calls per endpoint

use crate::dispatch::ChatBackend;
use crate::error::LumenError;
use crate::models::{ChatContext, ChatReply, StatusReply};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct ScriptedBackend {
    chat: Mutex<VecDeque<Result<ChatReply, LumenError>>>,
    execute: Mutex<VecDeque<Result<ChatReply, LumenError>>>,
    status: Mutex<VecDeque<Result<StatusReply, LumenError>>>,
    last_chat: Mutex<Option<(String, ChatContext)>>,
    chat_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, reply: Result<ChatReply, LumenError>) {
        self.chat.lock().unwrap().push_back(reply);
    }

    pub fn push_execute(&self, reply: Result<ChatReply, LumenError>) {
        self.execute.lock().unwrap().push_back(reply);
    }

    /// Queue status replies; once drained, the task reports `running`.
    pub fn push_status(&self, reply: Result<StatusReply, LumenError>) {
        self.status.lock().unwrap().push_back(reply);
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn last_chat(&self) -> Option<(String, ChatContext)> {
        self.last_chat.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, message: &str, context: &ChatContext) -> Result<ChatReply, LumenError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_chat.lock().unwrap() = Some((message.to_string(), context.clone()));
        self.chat
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LumenError::Network("no scripted chat reply".into())))
    }

    async fn execute_autosci(&self, _context: &ChatContext) -> Result<ChatReply, LumenError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.execute
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LumenError::Network("no scripted execute reply".into())))
    }

    async fn check_status(&self, _task_id: &str) -> Result<StatusReply, LumenError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusReply::running(None)))
    }
}
