//! Watch command handlers
//!
//! Mirror a stream until the server finishes or closes it, or the user hits
//! Ctrl-C.
//! The stream is always stopped (and its socket closed) before returning.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use boardsync_core::stream::endpoint;
use boardsync_core::views::{execution_processes_seed, task_attempts_seed};
use boardsync_core::{
    CollapseReplaces, Completion, CompletionNotifier, Config, ConnectionState,
    ExecutionProcessView, Stream, StreamEvent, TaskAttemptView,
};

use crate::output::Output;

/// Default endpoint for execution processes
pub const EXECUTION_PROCESSES_ENDPOINT: &str = "/api/execution-processes/stream/ws";

/// Default endpoint for task attempts
pub const TASK_ATTEMPTS_ENDPOINT: &str = "/api/task-attempts/stream/ws";

/// Watch an execution-process stream
pub async fn processes(
    config: &Config,
    endpoint: String,
    show_dropped: bool,
    output: &Output,
) -> Result<()> {
    let url = resolve(config, &endpoint)?;

    let mut stream = Stream::new(config.stream_config())
        .with_initial(execution_processes_seed)
        .with_dedupe(Arc::new(CollapseReplaces));
    let mut events = stream
        .take_events()
        .context("Stream events already taken")?;

    let mut processes = stream.select(ExecutionProcessView::from_snapshot);
    let mut running = stream.select(|s| ExecutionProcessView::from_snapshot(s).is_attempt_running());
    let mut notifier = CompletionNotifier::new(|c: &Completion| output.print_completion(c));

    stream.start(url).await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }

            view = processes.changed() => {
                let Ok(view) = view else { break };
                let visible = view.visible();
                if show_dropped {
                    output.print_processes(view.all());
                } else {
                    output.print_processes(&visible);
                }
                notifier.observe(&visible);
            }

            is_running = running.changed() => {
                let Ok(is_running) = is_running else { break };
                output.print_running(is_running);
            }

            event = events.recv() => {
                if !handle_event(event, output) {
                    break;
                }
            }
        }
    }

    stream.stop().await;
    notifier.reset();
    Ok(())
}

/// Watch a task-attempt stream
pub async fn attempts(config: &Config, endpoint: String, output: &Output) -> Result<()> {
    let url = resolve(config, &endpoint)?;

    let mut stream = Stream::new(config.stream_config()).with_initial(task_attempts_seed);
    let mut events = stream
        .take_events()
        .context("Stream events already taken")?;
    let mut attempts = stream.select(TaskAttemptView::from_snapshot);

    stream.start(url).await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }

            view = attempts.changed() => {
                let Ok(view) = view else { break };
                output.print_attempts(view.all());
            }

            event = events.recv() => {
                if !handle_event(event, output) {
                    break;
                }
            }
        }
    }

    stream.stop().await;
    Ok(())
}

fn resolve(config: &Config, endpoint: &str) -> Result<String> {
    let url = endpoint::resolve(&config.server_url, endpoint)
        .with_context(|| format!("Invalid endpoint: {}", endpoint))?;
    // Fail early on endpoints the stream could never connect to
    endpoint::stream_address(&url).with_context(|| format!("Invalid endpoint: {}", url))?;
    Ok(url)
}

/// Report one stream event; returns false once watching should end
fn handle_event(event: Option<StreamEvent>, output: &Output) -> bool {
    match event {
        Some(StreamEvent::StatusChanged(status)) => {
            output.print_health(&status.health());
            // A clean close is never retried; finishing is reported by its own event
            if status.state == ConnectionState::Disconnected && !status.finished {
                output.message("Server closed the stream.");
                return false;
            }
            true
        }
        Some(StreamEvent::Error(message)) => {
            output.warning(&message);
            true
        }
        Some(StreamEvent::SnapshotUpdated { .. }) => true,
        Some(StreamEvent::Finished) => {
            output.message("Stream finished.");
            false
        }
        None => false,
    }
}
