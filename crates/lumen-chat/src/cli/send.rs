// ABOUTME: Send command implementation for CLI scripting.
// ABOUTME: Sends one message, waits out any discovery task, and prints the final answer.

use anyhow::{bail, Result};
use lumen_client::{ChatSession, Settings, SubmitResult};
use std::sync::Arc;

use super::Cli;
use crate::render::TerminalRenderer;

pub async fn run(cli: &Cli, settings: &Settings, message: &str) -> Result<()> {
    let backend = Arc::new(settings.http_backend()?);
    let store = cli.history_store()?;
    // History is persisted but not replayed for one-shot sends
    let mut renderer = TerminalRenderer::stdout(true);
    renderer.set_muted(true);

    let mut session = ChatSession::open(
        backend,
        store,
        renderer,
        settings.context(),
        settings.session_config(),
    );
    session.renderer_mut().set_muted(false);

    match session.submit(message).await {
        SubmitResult::Ignored => bail!("message is empty"),
        SubmitResult::Failed => bail!("request failed"),
        SubmitResult::Answered => Ok(()),
        SubmitResult::Polling { task_id } => {
            tracing::info!(%task_id, "waiting for discovery task");
            tokio::select! {
                _ = session.run_until_idle() => {}
                _ = tokio::signal::ctrl_c() => {
                    session.cancel_all();
                    bail!("cancelled");
                }
            }
            let finished_ok = session
                .renderer()
                .transcript()
                .elements()
                .last()
                .is_some_and(|e| e.style == lumen_client::ElementStyle::Assistant);
            if finished_ok {
                Ok(())
            } else {
                bail!("discovery task {} failed", task_id)
            }
        }
    }
}
