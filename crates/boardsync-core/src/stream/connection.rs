//! Connection state machine
//!
//! Tracks the lifecycle of one stream connection independently of the
//! socket itself. The driver task feeds it transport events and acts on
//! what it returns:
//!
//! ```text
//! Disconnected --connect--> Connecting --open--> Connected
//! Connected --unclean close--> Reconnecting --timer--> Connecting
//! Connected --finished--> Disconnected (terminal)
//! any --teardown--> Disconnected (reset)
//! ```

use std::time::Duration;

use json_patch::PatchOperation;
use tracing::{debug, warn};

use super::endpoint::stream_address;
use super::message::StreamMessage;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected, not trying
    #[default]
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and receiving patches
    Connected,
    /// Waiting for the backoff timer before connecting again
    Reconnecting,
}

/// Snapshot of the connection's observable state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamStatus {
    pub state: ConnectionState,
    /// Most recent recoverable error, cleared on a successful open
    pub last_error: Option<String>,
    /// Server signalled the end of the stream
    pub finished: bool,
}

impl StreamStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Indicator suitable for a connection-health display
    pub fn health(&self) -> ConnectionHealth {
        if self.finished {
            return ConnectionHealth::Finished;
        }
        match self.state {
            ConnectionState::Connecting => ConnectionHealth::Connecting,
            ConnectionState::Reconnecting => ConnectionHealth::Reconnecting,
            ConnectionState::Connected => ConnectionHealth::Connected,
            ConnectionState::Disconnected => ConnectionHealth::Offline(self.last_error.clone()),
        }
    }
}

/// What a connection-health indicator should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionHealth {
    Connecting,
    Reconnecting,
    Connected,
    /// Clean end of stream, not an error
    Finished,
    /// Disconnected, with the error that caused it (if any)
    Offline(Option<String>),
}

impl std::fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionHealth::Connecting => write!(f, "connecting"),
            ConnectionHealth::Reconnecting => write!(f, "reconnecting"),
            ConnectionHealth::Connected => write!(f, "connected"),
            ConnectionHealth::Finished => write!(f, "finished"),
            ConnectionHealth::Offline(None) => write!(f, "offline"),
            ConnectionHealth::Offline(Some(err)) => write!(f, "offline ({})", err),
        }
    }
}

/// Exponential reconnect delay: `min(cap, base * 2^(attempt - 1))`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(8))
    }
}

/// What the driver should do with an incoming message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Enqueue these operations
    Patch(Vec<PatchOperation>),
    /// Flush pending operations, then close cleanly
    Finished,
    /// Message was discarded; the stream continues
    Malformed(String),
    /// Connection is no longer live; drop the message
    Ignored,
}

/// Connection lifecycle for a single endpoint
#[derive(Debug)]
pub struct Connection {
    /// HTTP endpoint; `None` once torn down
    endpoint: Option<String>,
    backoff: Backoff,
    state: ConnectionState,
    attempts: u32,
    finished: bool,
    reconnect_pending: bool,
    last_error: Option<String>,
}

impl Connection {
    pub fn new(endpoint: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            backoff,
            state: ConnectionState::Disconnected,
            attempts: 0,
            finished: false,
            reconnect_pending: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            last_error: self.last_error.clone(),
            finished: self.finished,
        }
    }

    /// Whether events should still be processed
    fn is_live(&self) -> bool {
        self.endpoint.is_some() && !self.finished
    }

    /// Begin a connection attempt, returning the WebSocket address
    ///
    /// Returns `None` if the stream has finished, was torn down, or the
    /// endpoint can't be translated (recorded as the last error).
    pub fn connect(&mut self) -> Option<String> {
        if !self.is_live() {
            return None;
        }
        let endpoint = self.endpoint.as_deref()?;

        match stream_address(endpoint) {
            Ok(address) => {
                self.state = ConnectionState::Connecting;
                Some(address)
            }
            Err(e) => {
                warn!("Cannot connect: {}", e);
                self.last_error = Some(e.to_string());
                self.state = ConnectionState::Disconnected;
                None
            }
        }
    }

    /// Transport opened
    pub fn on_open(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        self.attempts = 0;
        self.reconnect_pending = false;
        self.last_error = None;
        self.state = ConnectionState::Connected;
        true
    }

    /// Classify an incoming text payload
    pub fn on_message(&mut self, text: &str) -> Inbound {
        self.on_decoded(StreamMessage::decode(text))
    }

    /// Classify an already-decoded message
    pub fn on_decoded(&mut self, message: crate::error::StreamResult<StreamMessage>) -> Inbound {
        if !self.is_live() || self.state != ConnectionState::Connected {
            return Inbound::Ignored;
        }

        match message {
            Ok(StreamMessage::JsonPatch(ops)) => Inbound::Patch(ops),
            Ok(StreamMessage::Finished(true)) => {
                debug!("Stream finished by server");
                self.finished = true;
                self.reconnect_pending = false;
                self.state = ConnectionState::Disconnected;
                Inbound::Finished
            }
            Ok(StreamMessage::Finished(false)) => Inbound::Ignored,
            Err(e) => {
                let message = e.to_string();
                warn!("Discarding stream message: {}", message);
                self.last_error = Some(message.clone());
                Inbound::Malformed(message)
            }
        }
    }

    /// Record a transport or processing error without changing state
    pub fn on_error(&mut self, message: impl Into<String>) {
        if !self.is_live() {
            return;
        }
        self.last_error = Some(message.into());
    }

    /// Transport closed; returns the reconnect delay to schedule, if any
    ///
    /// A clean close (normal close code) ends the connection without a
    /// reconnect, as does any close after a finished message. At most one
    /// reconnect is pending at a time.
    pub fn on_close(&mut self, clean: bool) -> Option<Duration> {
        if !self.is_live() {
            return None;
        }
        if clean {
            self.state = ConnectionState::Disconnected;
            return None;
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.reconnect_pending {
            return None;
        }

        let delay = self.backoff.delay_for(self.attempts);
        debug!(
            "Connection lost, reconnect attempt {} in {:?}",
            self.attempts, delay
        );
        self.state = ConnectionState::Reconnecting;
        self.reconnect_pending = true;
        Some(delay)
    }

    /// Backoff timer fired; returns the address to reconnect to
    pub fn on_reconnect_timer(&mut self) -> Option<String> {
        if !self.reconnect_pending {
            return None;
        }
        self.reconnect_pending = false;
        self.connect()
    }

    /// Reset everything; later events are ignored
    pub fn teardown(&mut self) {
        self.endpoint = None;
        self.reconnect_pending = false;
        self.attempts = 0;
        self.finished = false;
        self.last_error = None;
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        Connection::new("http://localhost:3000/api/stream/ws", Backoff::default())
    }

    fn open(conn: &mut Connection) {
        assert!(conn.connect().is_some());
        assert!(conn.on_open());
    }

    #[test]
    fn test_backoff_sequence() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (1..=6).map(|n| backoff.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn test_connect_translates_address() {
        let mut conn = connection();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let address = conn.connect().unwrap();
        assert_eq!(address, "ws://localhost:3000/api/stream/ws");
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert!(conn.on_open());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_invalid_endpoint_records_error() {
        let mut conn = Connection::new("ftp://nope", Backoff::default());
        assert!(conn.connect().is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.status().last_error.is_some());
    }

    #[test]
    fn test_unclean_closes_back_off() {
        let mut conn = connection();
        conn.connect();

        // N consecutive failures with no successful open in between
        let mut delays = Vec::new();
        for _ in 0..5 {
            let delay = conn.on_close(false).unwrap();
            assert_eq!(conn.state(), ConnectionState::Reconnecting);
            delays.push(delay.as_secs());
            assert!(conn.on_reconnect_timer().is_some());
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut conn = connection();
        conn.connect();
        conn.on_close(false);
        conn.on_reconnect_timer();
        conn.on_close(false);
        assert_eq!(conn.attempts(), 2);

        conn.on_reconnect_timer();
        conn.on_error("Connection failed");
        assert!(conn.on_open());
        assert_eq!(conn.attempts(), 0);
        assert!(conn.status().last_error.is_none());

        assert_eq!(conn.on_close(false), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_only_one_reconnect_pending() {
        let mut conn = connection();
        open(&mut conn);

        assert!(conn.on_close(false).is_some());
        assert!(conn.on_close(false).is_none());
        assert!(conn.reconnect_pending());
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let mut conn = connection();
        open(&mut conn);

        assert!(conn.on_close(true).is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.reconnect_pending());
    }

    #[test]
    fn test_patch_message() {
        let mut conn = connection();
        open(&mut conn);

        let inbound =
            conn.on_message(r#"{"JsonPatch":[{"op":"remove","path":"/execution_processes/p1"}]}"#);
        assert!(matches!(inbound, Inbound::Patch(ref ops) if ops.len() == 1));
    }

    #[test]
    fn test_malformed_message_keeps_stream() {
        let mut conn = connection();
        open(&mut conn);

        assert!(matches!(conn.on_message("garbage"), Inbound::Malformed(_)));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.status().last_error.is_some());
    }

    #[test]
    fn test_finished_is_terminal() {
        let mut conn = connection();
        open(&mut conn);

        assert_eq!(conn.on_message(r#"{"finished":true}"#), Inbound::Finished);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.status().health(), ConnectionHealth::Finished);

        // Nothing on the closed socket moves the state again
        assert!(conn.on_close(false).is_none());
        assert!(!conn.on_open());
        assert_eq!(conn.on_message(r#"{"JsonPatch":[]}"#), Inbound::Ignored);
        conn.on_error("late error");
        assert!(conn.connect().is_none());
        assert!(conn.on_reconnect_timer().is_none());

        let status = conn.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.finished);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut conn = connection();
        open(&mut conn);
        conn.on_close(false);

        conn.teardown();
        conn.teardown();

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.attempts(), 0);
        assert!(!conn.reconnect_pending());
        assert!(conn.on_close(false).is_none());
        assert!(conn.on_reconnect_timer().is_none());
        assert!(conn.endpoint().is_none());
    }

    #[test]
    fn test_teardown_after_finished() {
        let mut conn = connection();
        open(&mut conn);
        conn.on_message(r#"{"finished":true}"#);

        conn.teardown();
        assert!(!conn.is_finished());
        assert!(conn.on_close(false).is_none());
    }

    #[test]
    fn test_health_shows_error_only_when_offline() {
        let mut status = StreamStatus {
            state: ConnectionState::Reconnecting,
            last_error: Some("Connection failed".to_string()),
            finished: false,
        };
        assert_eq!(status.health(), ConnectionHealth::Reconnecting);

        status.state = ConnectionState::Disconnected;
        assert_eq!(
            status.health(),
            ConnectionHealth::Offline(Some("Connection failed".to_string()))
        );

        status.finished = true;
        assert_eq!(status.health(), ConnectionHealth::Finished);
    }
}
