//! Boardsync Core Library
//!
//! This crate keeps a local, read-only mirror of server-owned board state
//! (execution processes, task attempts) that the server publishes as a
//! stream of JSON-Patch operations over a WebSocket.
//!
//! # Architecture
//!
//! - **Stream**: one driver task per live stream; it owns the socket,
//!   batches patches onto an immutable snapshot and reconnects with backoff
//! - **Views**: typed projections over a snapshot, derived on demand
//!
//! # Quick Start
//!
//! ```text
//! let mut stream = Stream::new(config.stream_config())
//!     .with_initial(views::execution_processes_seed);
//! stream.start(endpoint::resolve(&config.server_url, "/api/execution-processes/stream/ws")?).await;
//!
//! let mut running = stream.select(|s| ExecutionProcessView::from_snapshot(s).is_attempt_running());
//! while let Ok(is_running) = running.changed().await {
//!     println!("running: {}", is_running);
//! }
//! ```
//!
//! # Modules
//!
//! - `stream`: connection manager, patch batcher and stream client
//! - `patch`: JSON-Patch application
//! - `views`: derived process and attempt views
//! - `notifier`: coding agent completion notifications
//! - `models`: data structures for processes and attempts
//! - `config`: application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod notifier;
pub mod patch;
pub mod stream;
pub mod views;

pub use config::Config;
pub use error::{StreamError, StreamResult};
pub use models::{ExecutionProcess, ExecutionProcessStatus, ExecutionRunReason, TaskAttempt};
pub use notifier::{Completion, CompletionNotifier, Notify};
pub use stream::{
    CollapseReplaces, ConnectionHealth, ConnectionState, Selector, Stream, StreamConfig,
    StreamEvent, StreamStatus,
};
pub use views::{ExecutionProcessView, TaskAttemptView};
