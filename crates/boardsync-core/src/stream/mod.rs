//! Patch stream client
//!
//! Keeps a local mirror of server-owned state by consuming JSON-Patch
//! messages over a WebSocket.
//!
//! ## Protocol
//!
//! 1. Connect via WebSocket (the endpoint's `http` scheme becomes `ws`)
//! 2. Receive `{"JsonPatch": [...]}` messages and apply them in order
//! 3. Stop on `{"finished": true}`; a finished stream never reconnects
//!
//! ## Usage
//!
//! ```ignore
//! let mut stream = Stream::new(StreamConfig::default())
//!     .with_initial(execution_processes_seed);
//! stream.start("http://localhost:3000/api/execution-processes/stream/ws").await;
//!
//! let mut running = stream.select(|s| ExecutionProcessView::from_snapshot(s).is_attempt_running());
//! while let Ok(is_running) = running.changed().await { ... }
//! ```

mod batcher;
mod client;
mod connection;
pub mod endpoint;
mod message;
mod selector;

pub use batcher::{describe, CollapseReplaces, DedupePolicy, Flush, PatchBatcher};
pub use client::{InitialFn, InjectFn, Snapshot, Stream, StreamConfig, StreamEvent};
pub use connection::{
    Backoff, Connection, ConnectionHealth, ConnectionState, Inbound, StreamStatus,
};
pub use message::StreamMessage;
pub use selector::Selector;
