//! Stream error handling
//!
//! Typed errors for the patch stream. Transport, parse and patch errors
//! are recoverable: the stream keeps running and reports them through its
//! last-error value. `Inactive` and `Closed` indicate an integration bug
//! on the caller's side.

use thiserror::Error;

/// Errors that can occur while mirroring a patch stream
#[derive(Error, Debug)]
pub enum StreamError {
    /// Endpoint cannot be turned into a WebSocket address
    #[error("Invalid stream endpoint '{endpoint}': {details}")]
    InvalidEndpoint { endpoint: String, details: String },

    /// Connection refused, reset, or otherwise lost
    #[error("Connection failed: {0}")]
    Transport(String),

    /// Message could not be parsed as a stream message
    #[error("Failed to parse stream message: {0}")]
    Parse(#[from] serde_json::Error),

    /// A patch operation did not resolve against the current snapshot
    #[error("Failed to apply batch of {batch_len} operations: {source}")]
    Patch {
        batch_len: usize,
        #[source]
        source: json_patch::PatchError,
    },

    /// Selector was read while no stream is active
    #[error("No active stream: selectors can only be read while a stream is running")]
    Inactive,

    /// The owning stream was dropped
    #[error("Stream closed")]
    Closed,
}

impl StreamError {
    /// Check if the stream recovers from this error on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::Transport(_) | StreamError::Parse(_) | StreamError::Patch { .. }
        )
    }

    /// Short label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::InvalidEndpoint { .. } => "endpoint",
            StreamError::Transport(_) => "transport",
            StreamError::Parse(_) => "parse",
            StreamError::Patch { .. } => "patch",
            StreamError::Inactive => "inactive",
            StreamError::Closed => "closed",
        }
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
