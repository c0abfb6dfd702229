// ABOUTME: Task poller: periodic status checks for one background task
// ABOUTME: Explicit Running -> Completed/Failed/Cancelled state machine driven by a cancellable tokio task

use crate::dispatch::ChatBackend;
use crate::error::LumenError;
use crate::models::{Progress, TaskStatus};
use crate::render::PlaceholderHandle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a polled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Running)
    }
}

/// Polling cadence and limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay before each status check
    pub interval: Duration,
    /// Give up with `Failed` after this long; `None` polls until a terminal status
    pub max_duration: Option<Duration>,
    /// Transport failures tolerated in a row before the task is failed
    pub max_transport_retries: u32,
    /// Upper bound for the doubling retry delay
    pub backoff_max: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_duration: Some(Duration::from_secs(30 * 60)),
            max_transport_retries: 0,
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl PollerConfig {
    /// Never shorter than the normal poll interval, whatever `backoff_max` says
    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.interval
            .saturating_mul(factor)
            .min(self.backoff_max)
            .max(self.interval)
    }
}

/// What a poller observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEventKind {
    Progress(Progress),
    Completed(String),
    Failed(String),
}

/// Message from a poller to the session that owns the placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollEvent {
    pub task_id: String,
    pub handle: PlaceholderHandle,
    pub kind: PollEventKind,
}

impl PollEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, PollEventKind::Progress(_))
    }
}

/// Handle to one running poll loop
pub struct TaskPoller {
    task_id: String,
    handle: PlaceholderHandle,
    cancel: CancellationToken,
    state: watch::Receiver<PollState>,
}

impl TaskPoller {
    /// Start polling `task_id` on the current tokio runtime.
    ///
    /// Events are delivered on `events`; the placeholder `handle` is carried
    /// through so the receiver can tell which element each event belongs to.
    pub fn start<B: ChatBackend + 'static>(
        backend: Arc<B>,
        task_id: String,
        handle: PlaceholderHandle,
        config: PollerConfig,
        events: mpsc::UnboundedSender<PollEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(PollState::Running);

        tracing::info!(task_id = %task_id, interval_ms = config.interval.as_millis() as u64, "starting task poller");

        let poll_loop = PollLoop {
            backend,
            task_id: task_id.clone(),
            handle,
            config,
            events,
            cancel: cancel.clone(),
            state: state_tx,
        };
        tokio::spawn(poll_loop.run());

        Self {
            task_id,
            handle,
            cancel,
            state: state_rx,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn placeholder(&self) -> PlaceholderHandle {
        self.handle
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Stop polling. Calling this more than once, or after the task has
    /// already finished, has no effect.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(task_id = %self.task_id, "cancelling task poller");
            self.cancel.cancel();
        }
    }

    /// Wait until the poll loop has stopped and return its final state.
    pub async fn stopped(&mut self) -> PollState {
        match self.state.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            // Sender dropped without a terminal state: the loop is gone
            Err(_) => PollState::Cancelled,
        }
    }
}

struct PollLoop<B> {
    backend: Arc<B>,
    task_id: String,
    handle: PlaceholderHandle,
    config: PollerConfig,
    events: mpsc::UnboundedSender<PollEvent>,
    cancel: CancellationToken,
    state: watch::Sender<PollState>,
}

impl<B: ChatBackend> PollLoop<B> {
    async fn run(self) {
        let final_state = self.poll().await;
        tracing::info!(task_id = %self.task_id, state = ?final_state, "task poller stopped");
        self.state.send_replace(final_state);
    }

    async fn poll(&self) -> PollState {
        let started = Instant::now();
        let mut delay = self.config.interval;
        let mut transport_failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PollState::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(max) = self.config.max_duration {
                if started.elapsed() >= max {
                    let reason = format!("timed out after {}s", max.as_secs());
                    return self.finish(PollEventKind::Failed(reason), PollState::Failed);
                }
            }

            tracing::debug!(task_id = %self.task_id, "checking task status");
            let result = self.backend.check_status(&self.task_id).await;

            // The request is not aborted on cancel; its answer is dropped instead
            if self.cancel.is_cancelled() {
                tracing::warn!(task_id = %self.task_id, "ignoring status response after cancel");
                return PollState::Cancelled;
            }

            match result {
                Ok(reply) => {
                    transport_failures = 0;
                    delay = self.config.interval;
                    match reply.status {
                        TaskStatus::Running => {
                            if let Some(progress) = reply.progress {
                                if !self.emit(PollEventKind::Progress(progress)) {
                                    return PollState::Cancelled;
                                }
                            }
                        }
                        TaskStatus::Completed => {
                            let text = reply.response.unwrap_or_default();
                            return self.finish(PollEventKind::Completed(text), PollState::Completed);
                        }
                        TaskStatus::Failed => {
                            let reason = reply
                                .error
                                .unwrap_or_else(|| "Unknown error occurred".to_string());
                            return self.finish(PollEventKind::Failed(reason), PollState::Failed);
                        }
                        TaskStatus::Unknown => {
                            let reason = "unexpected task status".to_string();
                            return self.finish(PollEventKind::Failed(reason), PollState::Failed);
                        }
                    }
                }
                Err(e @ (LumenError::Network(_) | LumenError::InvalidResponse(_)))
                    if transport_failures < self.config.max_transport_retries =>
                {
                    transport_failures += 1;
                    delay = self.config.retry_delay(transport_failures);
                    tracing::warn!(
                        task_id = %self.task_id,
                        error = %e,
                        attempt = transport_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "status check failed, retrying"
                    );
                }
                Err(e) => {
                    tracing::warn!(task_id = %self.task_id, error = %e, "status check failed");
                    let reason = format!("status check failed: {}", e);
                    return self.finish(PollEventKind::Failed(reason), PollState::Failed);
                }
            }
        }
    }

    fn finish(&self, kind: PollEventKind, state: PollState) -> PollState {
        if self.emit(kind) {
            state
        } else {
            PollState::Cancelled
        }
    }

    /// Returns false when nobody is listening any more.
    fn emit(&self, kind: PollEventKind) -> bool {
        let event = PollEvent {
            task_id: self.task_id.clone(),
            handle: self.handle,
            kind,
        };
        self.events.send(event).is_ok()
    }
}

/// Active pollers keyed by task id; at most one per task.
#[derive(Default)]
pub struct TaskRegistry {
    active: HashMap<String, TaskPoller>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `task_id` unless it is already tracked.
    ///
    /// A task stays tracked until `release` or `cancel`, even after its poll
    /// loop has stopped, so a terminal event still waiting to be applied
    /// keeps its owner.
    pub fn start<B: ChatBackend + 'static>(
        &mut self,
        backend: Arc<B>,
        task_id: &str,
        handle: PlaceholderHandle,
        config: PollerConfig,
        events: mpsc::UnboundedSender<PollEvent>,
    ) -> Result<(), LumenError> {
        if self.active.contains_key(task_id) {
            return Err(LumenError::AlreadyPolling(task_id.to_string()));
        }
        let poller = TaskPoller::start(backend, task_id.to_string(), handle, config, events);
        self.active.insert(task_id.to_string(), poller);
        Ok(())
    }

    /// Placeholder owned by the poller of `task_id`, if it is still tracked
    pub fn placeholder_for(&self, task_id: &str) -> Option<PlaceholderHandle> {
        self.active.get(task_id).map(TaskPoller::placeholder)
    }

    /// Stop tracking `task_id` after its terminal event was applied.
    pub fn release(&mut self, task_id: &str) -> Option<TaskPoller> {
        self.active.remove(task_id)
    }

    /// Cancel and forget one task. Returns false if it was not tracked.
    pub fn cancel(&mut self, task_id: &str) -> bool {
        match self.active.remove(task_id) {
            Some(poller) => {
                poller.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, poller) in self.active.drain() {
            poller.cancel();
        }
    }

    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusReply;
    use crate::render::{Renderer, Transcript};
    use crate::models::Role;
    use crate::testing::ScriptedBackend;

    fn handle() -> PlaceholderHandle {
        Transcript::new().render_placeholder(Role::Assistant, "...")
    }

    fn fast_config() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(2000),
            max_duration: None,
            max_transport_retries: 0,
            backoff_max: Duration::from_secs(10),
        }
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<PollEvent>) -> Vec<PollEventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            kinds.push(event.kind);
            if terminal {
                break;
            }
        }
        kinds
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_then_completed() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(Ok(StatusReply::running(Some(Progress { completed: 1, total: 3 }))));
        backend.push_status(Ok(StatusReply::running(Some(Progress { completed: 2, total: 3 }))));
        backend.push_status(Ok(StatusReply::completed("X")));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = TaskPoller::start(backend.clone(), "t-1".into(), handle(), fast_config(), tx);

        let kinds = drain(&mut rx).await;
        assert_eq!(
            kinds,
            vec![
                PollEventKind::Progress(Progress { completed: 1, total: 3 }),
                PollEventKind::Progress(Progress { completed: 2, total: 3 }),
                PollEventKind::Completed("X".into()),
            ]
        );
        assert_eq!(poller.stopped().await, PollState::Completed);

        // No further checks after the terminal response
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_stops() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(Ok(StatusReply::running(None)));
        backend.push_status(Ok(StatusReply::failed("E")));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = TaskPoller::start(backend.clone(), "t-2".into(), handle(), fast_config(), tx);

        assert_eq!(drain(&mut rx).await, vec![PollEventKind::Failed("E".into())]);
        assert_eq!(poller.stopped().await, PollState::Failed);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_terminal_by_default() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(Err(LumenError::Network("reset by peer".into())));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = TaskPoller::start(backend.clone(), "t-3".into(), handle(), fast_config(), tx);

        let kinds = drain(&mut rx).await;
        assert_eq!(kinds.len(), 1);
        assert!(matches!(&kinds[0], PollEventKind::Failed(reason) if reason.contains("reset by peer")));
        assert_eq!(poller.stopped().await, PollState::Failed);
        assert_eq!(backend.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_retried_when_configured() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(Err(LumenError::Network("blip".into())));
        backend.push_status(Err(LumenError::Network("blip".into())));
        backend.push_status(Ok(StatusReply::completed("done")));

        let config = PollerConfig {
            max_transport_retries: 2,
            ..fast_config()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = TaskPoller::start(backend.clone(), "t-4".into(), handle(), config, tx);

        assert_eq!(drain(&mut rx).await, vec![PollEventKind::Completed("done".into())]);
        assert_eq!(poller.stopped().await, PollState::Completed);
        assert_eq!(backend.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(Err(LumenError::Backend("Task not found".into())));

        let config = PollerConfig {
            max_transport_retries: 5,
            ..fast_config()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = TaskPoller::start(backend.clone(), "t-5".into(), handle(), config, tx);

        let kinds = drain(&mut rx).await;
        assert!(matches!(&kinds[0], PollEventKind::Failed(reason) if reason.contains("Task not found")));
        assert_eq!(poller.stopped().await, PollState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_times_out() {
        let backend = Arc::new(ScriptedBackend::new());
        let config = PollerConfig {
            max_duration: Some(Duration::from_secs(10)),
            ..fast_config()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = TaskPoller::start(backend.clone(), "t-6".into(), handle(), config, tx);

        let kinds = drain(&mut rx).await;
        assert!(matches!(&kinds[0], PollEventKind::Failed(reason) if reason.contains("timed out")));
        assert_eq!(poller.stopped().await, PollState::Failed);
        // Checks at 2s, 4s, 6s, 8s; the 10s tick times out before checking
        assert_eq!(backend.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_stops_checks() {
        let backend = Arc::new(ScriptedBackend::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = TaskPoller::start(backend.clone(), "t-7".into(), handle(), fast_config(), tx);

        tokio::time::sleep(Duration::from_millis(4500)).await;
        let calls = backend.status_calls();
        assert_eq!(calls, 2);

        poller.cancel();
        poller.cancel();
        assert_eq!(poller.stopped().await, PollState::Cancelled);
        poller.cancel();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.status_calls(), calls);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_stops_poller() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(Ok(StatusReply::running(Some(Progress { completed: 1, total: 2 }))));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut poller = TaskPoller::start(backend.clone(), "t-8".into(), handle(), fast_config(), tx);
        assert_eq!(poller.stopped().await, PollState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_rejects_duplicate_task() {
        let backend = Arc::new(ScriptedBackend::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = TaskRegistry::new();
        let h = handle();
        registry
            .start(backend.clone(), "dup", h, fast_config(), tx.clone())
            .unwrap();
        let err = registry
            .start(backend.clone(), "dup", h, fast_config(), tx.clone())
            .unwrap_err();
        assert!(matches!(err, LumenError::AlreadyPolling(id) if id == "dup"));
        assert_eq!(registry.placeholder_for("dup"), Some(h));
        assert_eq!(registry.task_ids(), vec!["dup".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_cancel() {
        let backend = Arc::new(ScriptedBackend::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = TaskRegistry::new();
        registry
            .start(backend.clone(), "a", handle(), fast_config(), tx.clone())
            .unwrap();
        registry
            .start(backend.clone(), "b", handle(), fast_config(), tx)
            .unwrap();
        assert!(registry.cancel("a"));
        assert!(!registry.cancel("a"));
        assert_eq!(registry.len(), 1);
        registry.cancel_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = PollerConfig {
            interval: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
            ..PollerConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_secs(4));
        assert_eq!(config.retry_delay(2), Duration::from_secs(8));
        assert_eq!(config.retry_delay(3), Duration::from_secs(10));
        assert_eq!(config.retry_delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_delay_floored_at_interval() {
        let config = PollerConfig {
            interval: Duration::from_secs(2),
            backoff_max: Duration::ZERO,
            ..PollerConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(5), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_backoff_retries_at_poll_cadence() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_status(Err(LumenError::Network("blip".into())));
        backend.push_status(Err(LumenError::Network("blip".into())));
        backend.push_status(Ok(StatusReply::completed("done")));

        let config = PollerConfig {
            max_transport_retries: 5,
            backoff_max: Duration::ZERO,
            ..fast_config()
        };
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _poller = TaskPoller::start(backend.clone(), "t-9".into(), handle(), config, tx);

        assert_eq!(drain(&mut rx).await, vec![PollEventKind::Completed("done".into())]);
        // Three checks, each a full interval apart
        assert!(started.elapsed() >= Duration::from_millis(6000));
        assert_eq!(backend.status_calls(), 3);
    }

    #[test]
    fn test_poll_state_terminal() {
        assert!(!PollState::Running.is_terminal());
        assert!(PollState::Completed.is_terminal());
        assert!(PollState::Failed.is_terminal());
        assert!(PollState::Cancelled.is_terminal());
    }
}
