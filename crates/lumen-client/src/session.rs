// ABOUTME: Chat session: owns the log, renderer, dispatcher, and task pollers
// ABOUTME: Reconciles dispatch outcomes and poll events into rendered and persisted turns

use crate::dispatch::{ChatBackend, Dispatcher, Outcome};
use crate::error::LumenError;
use crate::models::{ChatContext, Progress, Role, Turn};
use crate::poller::{PollEvent, PollEventKind, PollerConfig, TaskRegistry};
use crate::render::{FinalizeOutcome, PlaceholderHandle, Renderer};
use crate::store::{KeyValueStore, LogStore};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Text of a fresh assistant placeholder
pub const THINKING_TEXT: &str = "Thinking...";

/// Text a cancelled task's placeholder resolves to
pub const CANCELLED_TEXT: &str = "Discovery cancelled.";

/// Behaviour switches for a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub poller: PollerConfig,
    /// Also persist failed turns (flagged `is_error`) so reloads show them
    pub persist_failures: bool,
}

/// What happened to a submitted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    /// Blank input; nothing was sent
    Ignored,
    /// The reply was final immediately
    Answered,
    /// The request failed; the placeholder shows the error
    Failed,
    /// A background task now owns the placeholder
    Polling { task_id: String },
}

/// One conversation: the only writer of its log.
pub struct ChatSession<B, S, R> {
    dispatcher: Dispatcher<B>,
    log: LogStore<S>,
    renderer: R,
    context: ChatContext,
    config: SessionConfig,
    tasks: TaskRegistry,
    events_tx: mpsc::UnboundedSender<PollEvent>,
    events_rx: mpsc::UnboundedReceiver<PollEvent>,
}

impl<B, S, R> ChatSession<B, S, R>
where
    B: ChatBackend + 'static,
    S: KeyValueStore,
    R: Renderer,
{
    /// Create a session and rehydrate the renderer from the persisted log.
    pub fn open(
        backend: Arc<B>,
        store: S,
        renderer: R,
        context: ChatContext,
        config: SessionConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut session = Self {
            dispatcher: Dispatcher::new(backend),
            log: LogStore::new(store),
            renderer,
            context,
            config,
            tasks: TaskRegistry::new(),
            events_tx,
            events_rx,
        };
        session.rehydrate();
        session
    }

    fn rehydrate(&mut self) {
        let turns = self.log.load_all();
        tracing::debug!(count = turns.len(), "rehydrating conversation");
        for turn in &turns {
            self.renderer.render_final(turn);
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn context(&self) -> &ChatContext {
        &self.context
    }

    pub fn set_context(&mut self, context: ChatContext) {
        self.context = context;
    }

    /// Persisted turns, oldest first
    pub fn history(&self) -> Vec<Turn> {
        self.log.load_all()
    }

    pub fn clear_history(&self) -> Result<(), LumenError> {
        self.log.clear()
    }

    /// Ids of tasks still being polled
    pub fn pending_tasks(&self) -> Vec<String> {
        self.tasks.task_ids()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Send one user message and resolve or hand off its reply placeholder.
    pub async fn submit(&mut self, text: &str) -> SubmitResult {
        let text = text.trim();
        if text.is_empty() {
            return SubmitResult::Ignored;
        }

        let user_turn = Turn::user(text);
        self.renderer.render_final(&user_turn);
        self.persist(user_turn);

        let handle = self
            .renderer
            .render_placeholder(Role::Assistant, THINKING_TEXT);

        let mut outcome = self.dispatcher.send(text, &self.context).await;
        if let Outcome::LegacyTrigger { ack } = &outcome {
            if !ack.is_empty() {
                self.update_placeholder(handle, ack);
            }
            outcome = match self.dispatcher.send_execute(&self.context).await {
                Outcome::LegacyTrigger { .. } => Outcome::Failed {
                    error_text: LumenError::InvalidResponse(
                        "execution request asked to be triggered again".to_string(),
                    )
                    .user_message(),
                },
                other => other,
            };
        }

        self.resolve(handle, outcome)
    }

    fn resolve(&mut self, handle: PlaceholderHandle, outcome: Outcome) -> SubmitResult {
        match outcome {
            Outcome::Immediate { text } => {
                self.finalize(handle, &text, FinalizeOutcome::Ok);
                self.persist(Turn::assistant(text));
                SubmitResult::Answered
            }
            Outcome::AsyncStarted { task_id, ack } => {
                if let Some(ack) = ack.filter(|a| !a.is_empty()) {
                    self.update_placeholder(handle, &ack);
                }
                match self.tasks.start(
                    self.dispatcher.backend().clone(),
                    &task_id,
                    handle,
                    self.config.poller.clone(),
                    self.events_tx.clone(),
                ) {
                    Ok(()) => SubmitResult::Polling { task_id },
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "could not track task");
                        self.fail(handle, e.user_message(), None);
                        SubmitResult::Failed
                    }
                }
            }
            Outcome::Failed { error_text } => {
                self.fail(handle, error_text, None);
                SubmitResult::Failed
            }
            Outcome::LegacyTrigger { ack } => {
                // Only reachable if a caller feeds an unresolved trigger here
                self.fail(handle, format!("Error: unexpected trigger: {}", ack), None);
                SubmitResult::Failed
            }
        }
    }

    /// Wait for the next poll event and apply it.
    ///
    /// Returns `None` once no task is being polled. Events from tasks that
    /// were cancelled or already resolved are skipped.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        while !self.tasks.is_empty() {
            let event = self.events_rx.recv().await?;
            if self.apply(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Apply poll events until every task has resolved.
    pub async fn run_until_idle(&mut self) {
        while self.next_event().await.is_some() {}
    }

    /// Apply one poll event. Returns false when the event was stale.
    pub fn apply(&mut self, event: &PollEvent) -> bool {
        match self.tasks.placeholder_for(&event.task_id) {
            Some(handle) if handle == event.handle => {}
            _ => {
                tracing::warn!(task_id = %event.task_id, "ignoring event for untracked task");
                return false;
            }
        }

        match &event.kind {
            PollEventKind::Progress(progress) => {
                self.update_placeholder(event.handle, &progress_text(progress));
            }
            PollEventKind::Completed(text) => {
                self.tasks.release(&event.task_id);
                tracing::info!(task_id = %event.task_id, "task completed");
                self.finalize(event.handle, text, FinalizeOutcome::Ok);
                let mut turn = Turn::assistant(text.clone());
                turn.task_id = Some(event.task_id.clone());
                self.persist(turn);
            }
            PollEventKind::Failed(reason) => {
                self.tasks.release(&event.task_id);
                tracing::info!(task_id = %event.task_id, %reason, "task failed");
                let text = LumenError::TaskFailed(reason.clone()).user_message();
                self.fail(event.handle, text, Some(event.task_id.clone()));
            }
        }
        true
    }

    /// Stop polling one task and resolve its placeholder as cancelled.
    pub fn cancel_task(&mut self, task_id: &str) -> bool {
        let Some(handle) = self.tasks.placeholder_for(task_id) else {
            return false;
        };
        self.tasks.cancel(task_id);
        self.finalize(handle, CANCELLED_TEXT, FinalizeOutcome::Error);
        true
    }

    /// Cancel every running task (e.g. when the user leaves).
    pub fn cancel_all(&mut self) {
        for task_id in self.tasks.task_ids() {
            self.cancel_task(&task_id);
        }
    }

    fn fail(&mut self, handle: PlaceholderHandle, text: String, task_id: Option<String>) {
        self.finalize(handle, &text, FinalizeOutcome::Error);
        if self.config.persist_failures {
            let mut turn = Turn::error(text);
            turn.task_id = task_id;
            self.persist(turn);
        }
    }

    fn finalize(&mut self, handle: PlaceholderHandle, text: &str, outcome: FinalizeOutcome) {
        if let Err(e) = self.renderer.finalize(handle, text, outcome) {
            tracing::warn!(handle = handle.id(), error = %e, "placeholder finalize rejected");
        }
    }

    fn update_placeholder(&mut self, handle: PlaceholderHandle, text: &str) {
        if let Err(e) = self.renderer.update(handle, text) {
            tracing::warn!(handle = handle.id(), error = %e, "placeholder update rejected");
        }
    }

    fn persist(&self, turn: Turn) {
        if let Err(e) = self.log.append(turn) {
            tracing::warn!(error = %e, "failed to persist turn");
        }
    }
}

fn progress_text(progress: &Progress) -> String {
    format!(
        "Discovery in progress: {} of {} theories complete...",
        progress.completed, progress.total
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatReply, StatusReply, ACTION_ASYNC_INITIATE, ACTION_LEGACY_INITIATE};
    use crate::render::{ElementStyle, Transcript};
    use crate::store::MemoryStore;
    use crate::testing::ScriptedBackend;
    use std::time::Duration;

    type TestSession = ChatSession<ScriptedBackend, Arc<MemoryStore>, Transcript>;

    fn session_with(backend: Arc<ScriptedBackend>, store: Arc<MemoryStore>) -> TestSession {
        session_config(backend, store, SessionConfig::default())
    }

    fn session_config(
        backend: Arc<ScriptedBackend>,
        store: Arc<MemoryStore>,
        mut config: SessionConfig,
    ) -> TestSession {
        config.poller.interval = Duration::from_secs(2);
        ChatSession::open(backend, store, Transcript::new(), ChatContext::new(), config)
    }

    fn immediate(text: &str) -> ChatReply {
        ChatReply {
            response: Some(text.into()),
            ..Default::default()
        }
    }

    fn async_started(task_id: &str) -> ChatReply {
        ChatReply {
            action: Some(ACTION_ASYNC_INITIATE.into()),
            task_id: Some(task_id.into()),
            response: Some("AutoSCI mode acknowledged.".into()),
            ..Default::default()
        }
    }

    fn contents(turns: &[Turn]) -> Vec<(Role, &str)> {
        turns.iter().map(|t| (t.role, t.content.as_str())).collect()
    }

    #[tokio::test]
    async fn test_hello_immediate_end_to_end() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(immediate("hi there")));
        let mut session = session_with(backend, Arc::new(MemoryStore::new()));

        assert_eq!(session.submit("hello").await, SubmitResult::Answered);

        let history = session.history();
        assert_eq!(
            contents(&history),
            vec![(Role::User, "hello"), (Role::Assistant, "hi there")]
        );
        let elements = session.renderer().elements();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].content.plain_text(), "hi there");
        assert!(!elements[1].pending);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut session = session_with(backend.clone(), Arc::new(MemoryStore::new()));
        assert_eq!(session.submit("   ").await, SubmitResult::Ignored);
        assert_eq!(backend.chat_calls(), 0);
        assert!(session.renderer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_task_completes_and_persists_once() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(async_started("t-1")));
        backend.push_status(Ok(StatusReply::running(Some(Progress { completed: 1, total: 3 }))));
        backend.push_status(Ok(StatusReply::running(Some(Progress { completed: 2, total: 3 }))));
        backend.push_status(Ok(StatusReply::completed("X")));
        let mut session = session_with(backend.clone(), Arc::new(MemoryStore::new()));

        let result = session.submit("make a discovery").await;
        assert_eq!(result, SubmitResult::Polling { task_id: "t-1".into() });
        assert_eq!(session.pending_tasks(), vec!["t-1".to_string()]);

        // Nothing but the user turn is persisted while the task runs
        assert_eq!(session.history().len(), 1);
        let placeholder = &session.renderer().elements()[1];
        assert!(placeholder.pending);
        assert_eq!(placeholder.content.plain_text(), "AutoSCI mode acknowledged.");

        let first = session.next_event().await.unwrap();
        assert_eq!(first.kind, PollEventKind::Progress(Progress { completed: 1, total: 3 }));
        assert!(session.renderer().elements()[1]
            .content
            .plain_text()
            .contains("1 of 3"));

        session.run_until_idle().await;
        assert!(!session.has_pending_tasks());

        let history = session.history();
        assert_eq!(
            contents(&history),
            vec![(Role::User, "make a discovery"), (Role::Assistant, "X")]
        );
        assert_eq!(history[1].task_id.as_deref(), Some("t-1"));
        assert_eq!(session.renderer().elements()[1].content.plain_text(), "X");
        assert_eq!(session.renderer().pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_task_failure_not_persisted() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(async_started("t-2")));
        backend.push_status(Ok(StatusReply::failed("E")));
        let mut session = session_with(backend, Arc::new(MemoryStore::new()));

        session.submit("discover").await;
        session.run_until_idle().await;

        let element = &session.renderer().elements()[1];
        assert_eq!(element.style, ElementStyle::Error);
        assert!(element.content.plain_text().contains('E'));
        assert_eq!(contents(&session.history()), vec![(Role::User, "discover")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_task_failure_persisted_when_enabled() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(async_started("t-3")));
        backend.push_status(Ok(StatusReply::failed("E")));
        let config = SessionConfig {
            persist_failures: true,
            ..SessionConfig::default()
        };
        let mut session = session_config(backend, Arc::new(MemoryStore::new()), config);

        session.submit("discover").await;
        session.run_until_idle().await;

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert!(history[1].is_error);
        assert_eq!(history[1].content, "AutoSCI Error: E");
    }

    #[tokio::test]
    async fn test_dispatch_failure_renders_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Err(LumenError::Network("refused".into())));
        let mut session = session_with(backend, Arc::new(MemoryStore::new()));

        assert_eq!(session.submit("hello").await, SubmitResult::Failed);
        let element = &session.renderer().elements()[1];
        assert_eq!(element.style, ElementStyle::Error);
        assert_eq!(
            element.content.plain_text(),
            "Sorry, something went wrong with the request."
        );
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_trigger_runs_execute() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(ChatReply {
            action: Some(ACTION_LEGACY_INITIATE.into()),
            response: Some("Initiating AutoSCI...".into()),
            ..Default::default()
        }));
        backend.push_execute(Ok(immediate("Concept: Echoes")));
        let mut session = session_with(backend.clone(), Arc::new(MemoryStore::new()));

        assert_eq!(session.submit("autosci").await, SubmitResult::Answered);
        assert_eq!(backend.execute_calls(), 1);
        assert_eq!(
            contents(&session.history()),
            vec![(Role::User, "autosci"), (Role::Assistant, "Concept: Echoes")]
        );
    }

    #[tokio::test]
    async fn test_rehydrates_after_reload() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(immediate("**hi** there")));
        {
            let mut session = session_with(backend.clone(), store.clone());
            session.submit("hello").await;
        }

        let reloaded = session_with(backend, store);
        let elements = reloaded.renderer().elements();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].style, ElementStyle::User);
        assert_eq!(elements[1].content.to_html(), "<b>hi</b> there");
    }

    #[tokio::test]
    async fn test_corrupt_store_opens_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(crate::store::HISTORY_KEY, "[{\"role\": \"user\", \"content\"")
            .unwrap();
        let session = session_with(Arc::new(ScriptedBackend::new()), store);
        assert!(session.renderer().is_empty());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_user_script_rendered_literally() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(immediate("ok")));
        let mut session = session_with(backend, Arc::new(MemoryStore::new()));
        session.submit("<script>alert(1)</script>").await;
        let html = session.renderer().to_html();
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_placeholder_and_ignores_late_events() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(async_started("t-4")));
        let mut session = session_with(backend.clone(), Arc::new(MemoryStore::new()));
        session.submit("discover").await;
        let handle = session.tasks.placeholder_for("t-4").unwrap();

        assert!(session.cancel_task("t-4"));
        assert!(!session.cancel_task("t-4"));
        assert!(!session.has_pending_tasks());

        let element = &session.renderer().elements()[1];
        assert!(!element.pending);
        assert_eq!(element.content.plain_text(), CANCELLED_TEXT);

        // A completion that raced the cancel must not touch the render or log
        let late = PollEvent {
            task_id: "t-4".into(),
            handle,
            kind: PollEventKind::Completed("late".into()),
        };
        assert!(!session.apply(&late));
        assert_eq!(session.renderer().elements()[1].content.plain_text(), CANCELLED_TEXT);
        assert_eq!(session.history().len(), 1);
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_task_id_fails_second_placeholder() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(async_started("same")));
        backend.push_chat(Ok(async_started("same")));
        let mut session = session_with(backend, Arc::new(MemoryStore::new()));

        assert!(matches!(session.submit("one").await, SubmitResult::Polling { .. }));
        assert_eq!(session.submit("two").await, SubmitResult::Failed);
        assert_eq!(session.pending_tasks(), vec!["same".to_string()]);
        session.cancel_all();
        assert_eq!(session.renderer().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_context_forwarded() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(immediate("ok")));
        let mut session = session_with(backend.clone(), Arc::new(MemoryStore::new()));
        session.set_context(ChatContext::new().with("use_evolution_mode", true));
        session.submit("hi").await;
        let (_, context) = backend.last_chat().unwrap();
        assert_eq!(context.get("use_evolution_mode"), Some(&serde_json::Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_clear_history() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(immediate("ok")));
        let mut session = session_with(backend, Arc::new(MemoryStore::new()));
        session.submit("hi").await;
        session.clear_history().unwrap();
        assert!(session.history().is_empty());
    }
}
