//! Stream client implementation
//!
//! `Stream` owns one live patch stream at a time. Starting it seeds a
//! snapshot and spawns a driver task that keeps a WebSocket open,
//! batches incoming patches onto the snapshot, and reconnects with
//! backoff. Stopping it detaches the task, waits for it to close the
//! socket, and only then discards the snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, info_span, warn, Instrument};

use super::batcher::{DedupePolicy, Flush, PatchBatcher};
use super::connection::{Backoff, Connection, Inbound, StreamStatus};
use super::message::StreamMessage;
use super::selector::Selector;

/// Shared, immutable view of the mirrored state
pub type Snapshot = Arc<Value>;

/// Builds the starting snapshot for a fresh stream
pub type InitialFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Seeds entries the server won't send retroactively
pub type InjectFn = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// How long to wait for the close frame to go out on shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timing configuration for a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// First reconnect delay; doubles per failed attempt
    pub reconnect_base: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_max: Duration,
    /// Scheduler tick that pending patches are flushed on
    pub flush_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(8),
            flush_interval: Duration::from_millis(16),
        }
    }
}

impl StreamConfig {
    fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_base, self.reconnect_max)
    }
}

/// Events emitted by a running stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection status changed
    StatusChanged(StreamStatus),
    /// A batch was applied and a new snapshot published
    SnapshotUpdated { applied: usize },
    /// Server ended the stream; no reconnect will follow
    Finished,
    /// Recoverable error; the stream keeps going
    Error(String),
}

/// Commands sent to the driver task
#[derive(Debug)]
enum StreamCommand {
    Shutdown,
}

struct RunningTask {
    endpoint: String,
    command_tx: mpsc::Sender<StreamCommand>,
    handle: JoinHandle<()>,
}

/// A patch-synchronized mirror of one server stream
pub struct Stream {
    config: StreamConfig,
    /// Short id used in log lines
    id: String,
    initial: InitialFn,
    inject: Option<InjectFn>,
    dedupe: Option<Arc<dyn DedupePolicy>>,
    /// Bumped on every start and stop; stale tasks stop publishing
    generation: Arc<AtomicU64>,
    snapshot_tx: Arc<watch::Sender<Option<Snapshot>>>,
    status_tx: Arc<watch::Sender<StreamStatus>>,
    status_rx: watch::Receiver<StreamStatus>,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    /// Events are only queued once someone holds the receiver
    events_taken: Arc<AtomicBool>,
    task: Option<RunningTask>,
}

impl Stream {
    /// Create an idle stream
    pub fn new(config: StreamConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(StreamStatus::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let id = format!("stream-{}", &uuid::Uuid::new_v4().to_string()[..8]);

        Self {
            config,
            id,
            initial: Arc::new(|| Value::Object(Default::default())),
            inject: None,
            dedupe: None,
            generation: Arc::new(AtomicU64::new(0)),
            snapshot_tx: Arc::new(snapshot_tx),
            status_tx: Arc::new(status_tx),
            status_rx,
            event_tx,
            event_rx: Some(event_rx),
            events_taken: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Set the factory for the starting snapshot
    pub fn with_initial<F>(mut self, initial: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.initial = Arc::new(initial);
        self
    }

    /// Seed entries into every fresh snapshot
    pub fn with_injector<F>(mut self, inject: F) -> Self
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        self.inject = Some(Arc::new(inject));
        self
    }

    /// Filter each batch through `policy` before applying it
    pub fn with_dedupe(mut self, policy: Arc<dyn DedupePolicy>) -> Self {
        self.dedupe = Some(policy);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Endpoint of the running stream, if any
    pub fn endpoint(&self) -> Option<&str> {
        self.task.as_ref().map(|task| task.endpoint.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Get the current status
    pub fn status(&self) -> StreamStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.status_rx.clone()
    }

    /// Take the event receiver (can only be called once)
    ///
    /// Events that happened before this call are not queued.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        let rx = self.event_rx.take()?;
        self.events_taken.store(true, Ordering::SeqCst);
        Some(rx)
    }

    /// Current snapshot, `None` while no stream is active
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to raw snapshot publications
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Derive a value from the snapshot that only reports real changes
    pub fn select<T, F>(&self, select: F) -> Selector<T, F>
    where
        T: PartialEq + Clone,
        F: Fn(&Value) -> T,
    {
        Selector::new(self.snapshot_tx.subscribe(), select)
    }

    /// Start mirroring `endpoint`
    ///
    /// A stream already running for the same endpoint is left alone, even
    /// if it has finished. A different endpoint tears the old one down and
    /// starts from a fresh snapshot.
    pub async fn start(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        if self.endpoint() == Some(endpoint.as_str()) {
            return;
        }
        self.stop().await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut seed = (self.initial)();
        if let Some(inject) = &self.inject {
            inject(&mut seed);
        }
        let snapshot = Arc::new(seed);
        self.snapshot_tx.send_replace(Some(snapshot.clone()));
        self.status_tx.send_replace(StreamStatus::default());

        let mut batcher = PatchBatcher::new();
        if let Some(policy) = &self.dedupe {
            batcher = batcher.with_dedupe(policy.clone());
        }

        let (command_tx, command_rx) = mpsc::channel(4);
        let task = StreamTask {
            conn: Connection::new(endpoint.clone(), self.config.backoff()),
            batcher,
            snapshot,
            flush_interval: self.config.flush_interval,
            publisher: Publisher {
                generation,
                current: self.generation.clone(),
                snapshot_tx: self.snapshot_tx.clone(),
                status_tx: self.status_tx.clone(),
                event_tx: self.event_tx.clone(),
                events_taken: self.events_taken.clone(),
            },
            command_rx,
        };

        let span = info_span!("stream", id = %self.id);
        info!(parent: &span, "Starting stream for {}", endpoint);
        let handle = tokio::spawn(task.run().instrument(span));

        self.task = Some(RunningTask {
            endpoint,
            command_tx,
            handle,
        });
    }

    /// Switch to another endpoint, or stop with `None`
    pub async fn set_endpoint(&mut self, endpoint: Option<String>) {
        match endpoint {
            Some(endpoint) => self.start(endpoint).await,
            None => self.stop().await,
        }
    }

    /// Tear the stream down and discard the snapshot
    ///
    /// Safe to call repeatedly, and after the stream has finished.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            // Detach the task before it closes the socket
            self.generation.fetch_add(1, Ordering::SeqCst);
            let _ = task.command_tx.send(StreamCommand::Shutdown).await;
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!("Stream task for {} ended abnormally: {}", task.endpoint, e);
                }
            }
            info!("Stopped stream {} for {}", self.id, task.endpoint);
        }

        self.snapshot_tx.send_replace(None);
        let reset = StreamStatus::default();
        let previous = self.status_tx.send_replace(reset.clone());
        if previous != reset && self.events_taken.load(Ordering::SeqCst) {
            let _ = self.event_tx.send(StreamEvent::StatusChanged(reset));
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            task.handle.abort();
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint())
            .field("status", &self.status())
            .finish()
    }
}

/// Publishes on behalf of one generation of the driver task
struct Publisher {
    generation: u64,
    current: Arc<AtomicU64>,
    snapshot_tx: Arc<watch::Sender<Option<Snapshot>>>,
    status_tx: Arc<watch::Sender<StreamStatus>>,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    events_taken: Arc<AtomicBool>,
}

impl Publisher {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn snapshot(&self, snapshot: Snapshot, applied: usize) {
        let published = self.snapshot_tx.send_if_modified(|slot| {
            if !self.is_current() {
                return false;
            }
            *slot = Some(snapshot);
            true
        });
        if published {
            self.emit(StreamEvent::SnapshotUpdated { applied });
        }
    }

    fn status(&self, status: StreamStatus) {
        let changed = self.status_tx.send_if_modified(|slot| {
            if !self.is_current() || *slot == status {
                return false;
            }
            *slot = status.clone();
            true
        });
        if changed {
            self.emit(StreamEvent::StatusChanged(status));
        }
    }

    fn emit(&self, event: StreamEvent) {
        if self.is_current() && self.events_taken.load(Ordering::SeqCst) {
            let _ = self.event_tx.send(event);
        }
    }
}

/// Why a WebSocket session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Finished,
    Closed { clean: bool },
}

/// Driver task: the only writer of the snapshot
struct StreamTask {
    conn: Connection,
    batcher: PatchBatcher,
    snapshot: Snapshot,
    flush_interval: Duration,
    publisher: Publisher,
    command_rx: mpsc::Receiver<StreamCommand>,
}

impl StreamTask {
    /// Main loop with reconnection
    async fn run(mut self) {
        let mut address = self.conn.connect();

        loop {
            self.publish_status();

            let Some(url) = address.take() else {
                // Finished, closed cleanly, or unusable endpoint
                if let Some(err) = self.conn.status().last_error {
                    self.publisher.emit(StreamEvent::Error(err));
                }
                let _ = self.command_rx.recv().await;
                break;
            };

            debug!("Connecting to {}", url);
            let connected = tokio::select! {
                biased;
                _ = self.command_rx.recv() => break,
                result = connect_async(url.as_str()) => result,
            };

            let end = match connected {
                Ok((ws_stream, _response)) => {
                    self.conn.on_open();
                    self.publish_status();
                    info!("Connected to {}", url);
                    self.run_session(ws_stream).await
                }
                Err(e) => {
                    let message = format!("Connection failed: {}", e);
                    warn!("{}", message);
                    self.conn.on_error(message.clone());
                    self.publisher.emit(StreamEvent::Error(message));
                    SessionEnd::Closed { clean: false }
                }
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Finished => {
                    info!("Stream finished");
                    self.publish_status();
                    self.publisher.emit(StreamEvent::Finished);
                    let _ = self.command_rx.recv().await;
                    break;
                }
                SessionEnd::Closed { clean } => {
                    let Some(delay) = self.conn.on_close(clean) else {
                        continue;
                    };
                    self.publish_status();
                    tokio::select! {
                        biased;
                        _ = self.command_rx.recv() => break,
                        _ = tokio::time::sleep(delay) => {
                            address = self.conn.on_reconnect_timer();
                        }
                    }
                }
            }
        }

        self.batcher.cancel();
        self.conn.teardown();
        debug!("Stream task exiting");
    }

    /// Pump one WebSocket connection until it ends
    async fn run_session(&mut self, ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();
        let mut flush_at: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.command_rx.recv() => {
                    // Stop reading before anything else so no late message lands
                    drop(read);
                    self.batcher.cancel();
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await;
                    return SessionEnd::Shutdown;
                }

                _ = sleep_until(flush_at) => {
                    flush_at = None;
                    self.flush();
                }

                msg = read.next() => {
                    let inbound = match msg {
                        Some(Ok(Message::Text(text))) => self.conn.on_message(&text),
                        Some(Ok(Message::Binary(bytes))) => {
                            self.conn.on_decoded(StreamMessage::decode_bytes(&bytes))
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let clean = frame
                                .as_ref()
                                .is_some_and(|frame| frame.code == CloseCode::Normal);
                            debug!("Server closed connection (clean={})", clean);
                            self.flush();
                            return SessionEnd::Closed { clean };
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            let message = format!("Connection lost: {}", e);
                            warn!("{}", message);
                            self.conn.on_error(message.clone());
                            self.publisher.emit(StreamEvent::Error(message));
                            self.flush();
                            return SessionEnd::Closed { clean: false };
                        }
                        None => {
                            self.flush();
                            return SessionEnd::Closed { clean: false };
                        }
                    };

                    match inbound {
                        Inbound::Patch(ops) => {
                            debug!("Received {} patch operations", ops.len());
                            if self.batcher.enqueue(ops) {
                                flush_at = Some(Instant::now() + self.flush_interval);
                            }
                        }
                        Inbound::Finished => {
                            // Patches that arrived before the finish are kept
                            self.flush();
                            let close = Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "finished".into(),
                            }));
                            let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.send(close)).await;
                            return SessionEnd::Finished;
                        }
                        Inbound::Malformed(message) => {
                            self.publish_status();
                            self.publisher.emit(StreamEvent::Error(message));
                        }
                        Inbound::Ignored => {}
                    }
                }
            }
        }
    }

    /// Apply pending operations and publish the result
    fn flush(&mut self) {
        match self.batcher.flush(&self.snapshot) {
            Ok(Flush::Empty) => {}
            Ok(Flush::Applied { snapshot, applied }) => {
                debug!("Applied {} operations", applied);
                let snapshot = Arc::new(snapshot);
                self.snapshot = snapshot.clone();
                self.publisher.snapshot(snapshot, applied);
            }
            Err(e) => {
                // Snapshot stays at the last good state
                let message = e.to_string();
                self.conn.on_error(message.clone());
                self.publish_status();
                self.publisher.emit(StreamEvent::Error(message));
            }
        }
    }

    fn publish_status(&self) {
        self.publisher.status(self.conn.status());
    }
}

/// Sleep until `deadline`, or forever if there is none
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
