//! Connection Manager
//!
//! State machine for the single server connection:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!       ^             |            |
//!       |   failure   v   failure  v
//!       +-------- Disconnected -> Reconnecting -> (attempt) -> Connected
//! ```
//!
//! Every transition runs under the `lifecycle` lock, so connect, disconnect,
//! failure handling and reconnect attempts never interleave. Each live
//! connection is a [`Session`] with its own id. Failure reports carry the id
//! of the session that observed them, and reports from a session that is no
//! longer current are ignored.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::session;
use crate::commands::{run_command_worker, Command, CommandHandler, IgnoreCommands, OutboundSink};
use crate::config::ClientConfig;
use crate::dispatcher::MessageDispatcher;
use crate::events::{ConnectionState, ConnectionStatusChanged, SyncEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::{SyncMetrics, SyncStatistics};
use crate::protocol::message_types as mt;
use crate::protocol::{DedupCache, EnvelopeCodec};
use crate::{NetworkError, Result};

/// Device-side sync client
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

/// Who is asking for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Initiator {
    Caller,
    ReconnectLoop,
}

/// What a failed write does to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnSendFailure {
    /// Run the connection failure handler
    FailConnection,
    /// Return the error only; the heartbeat counter decides
    ReturnError,
}

pub(crate) struct ClientInner {
    this: Weak<ClientInner>,
    pub(crate) config: ClientConfig,
    codec: EnvelopeCodec,
    state: RwLock<ConnectionState>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    writer: tokio::sync::Mutex<Option<SessionWriter>>,
    /// Wakes an in-flight connect so `disconnect` need not wait it out
    connect_cancel: Notify,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    next_session_id: AtomicU64,
    pub(crate) heartbeat: HeartbeatMonitor,
    pub(crate) dedup: Arc<Mutex<DedupCache>>,
    pub(crate) metrics: SyncMetrics,
    pub(crate) dispatcher: MessageDispatcher,
    events: broadcast::Sender<SyncEvent>,
    pending_worker: Mutex<Option<PendingWorker>>,
}

/// Command worker parts, spawned on first connect
struct PendingWorker {
    queue: mpsc::Receiver<Command>,
    handler: Arc<dyn CommandHandler>,
}

#[derive(Default)]
struct Lifecycle {
    session: Option<Session>,
    reconnect_task: Option<JoinHandle<()>>,
}

/// One live connection and its tasks
struct Session {
    id: u64,
    peer: SocketAddr,
    shutdown: watch::Sender<bool>,
    receive_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

struct SessionWriter {
    session_id: u64,
    half: OwnedWriteHalf,
}

impl SyncClient {
    /// Client that only publishes commands as events
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_handler(config, Arc::new(IgnoreCommands))
    }

    /// Client whose commands are answered by `handler`
    pub fn with_handler(config: ClientConfig, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        config.validate()?;

        let metrics = SyncMetrics::new();
        let heartbeat = HeartbeatMonitor::new(
            config.heartbeat_interval,
            config.max_heartbeat_failures,
            metrics.clone(),
        );
        let (events, _) = broadcast::channel(config.event_capacity);
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_capacity);
        let dispatcher =
            MessageDispatcher::new(heartbeat.clone(), events.clone(), command_tx, metrics.clone());

        let inner = Arc::new_cyclic(|this| ClientInner {
            this: this.clone(),
            codec: EnvelopeCodec::new(config.protocol_version.clone(), config.device_name.clone()),
            state: RwLock::new(ConnectionState::Disconnected),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            writer: tokio::sync::Mutex::new(None),
            connect_cancel: Notify::new(),
            reconnecting: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            next_session_id: AtomicU64::new(1),
            heartbeat,
            dedup: Arc::new(Mutex::new(DedupCache::new(config.dedup_capacity))),
            metrics,
            dispatcher,
            events,
            pending_worker: Mutex::new(Some(PendingWorker {
                queue: command_rx,
                handler,
            })),
            config,
        });

        Ok(Self { inner })
    }

    /// Open the connection
    ///
    /// Returns immediately when already connected. A successful connect
    /// cancels any reconnect loop in progress.
    pub async fn connect(&self) -> Result<()> {
        self.inner.establish(Initiator::Caller).await
    }

    /// Close the connection and stop reconnecting; never fails
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Disconnect, wait one reconnect interval, connect
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await;
        tokio::time::sleep(self.inner.config.reconnect_interval).await;
        self.connect().await
    }

    /// Send `payload` inside a freshly built envelope
    pub async fn send_protocol_message(&self, message_type: &str, payload: Value) -> Result<()> {
        self.inner.send_message(message_type, payload).await
    }

    /// Send a caller-built envelope
    ///
    /// `raw` must be a JSON object with a string `messageType`; it is sent
    /// compacted and newline-terminated.
    pub async fn send_data(&self, raw: &str) -> Result<()> {
        let frame = self.inner.codec.frame_raw(raw)?;
        self.inner
            .write_frame(&frame, None, OnSendFailure::FailConnection)
            .await
    }

    /// Send one heartbeat outside the schedule
    pub async fn send_heartbeat(&self) -> Result<()> {
        self.send_protocol_message(mt::HEARTBEAT, heartbeat_payload())
            .await
    }

    /// Tell the server about a device-side error
    pub async fn report_error(&self, code: &str, message: &str) -> Result<()> {
        self.send_protocol_message(mt::ERROR, json!({ "code": code, "message": message }))
            .await
    }

    /// Ask the server for the board layout
    pub async fn request_boards(&self) -> Result<()> {
        self.send_protocol_message(mt::REQUEST_BOARDS, json!({}))
            .await
    }

    /// Upload locker access log records
    pub async fn upload_access_logs(&self, logs: Value) -> Result<()> {
        self.send_protocol_message(mt::UPLOAD_ACCESS_LOGS, json!({ "logs": logs }))
            .await
    }

    /// True when connected and a socket is held
    pub async fn check_connection(&self) -> bool {
        self.state().is_connected() && self.inner.writer.lock().await.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Consecutive heartbeat failures on the current connection
    pub fn heartbeat_failures(&self) -> u32 {
        self.inner.heartbeat.consecutive_failures()
    }

    pub fn get_statistics(&self) -> SyncStatistics {
        let mut stats = self.inner.metrics.snapshot();
        stats.reconnect_attempts = self.inner.reconnect_attempts.load(Ordering::Acquire);
        stats
    }

    /// Receive connection, data and command events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }
}

/// `data` of a heartbeat envelope
pub(crate) fn heartbeat_payload() -> Value {
    json!({ "status": "online" })
}

impl ClientInner {
    fn arc(&self) -> Option<Arc<ClientInner>> {
        self.this.upgrade()
    }

    pub(crate) fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Half-close the live socket so every later write fails
    #[cfg(test)]
    pub(crate) async fn close_write_side(&self) {
        if let Some(writer) = self.writer.lock().await.as_mut() {
            let _ = writer.half.shutdown().await;
        }
    }

    fn set_state(&self, state: ConnectionState, status: impl Into<String>) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous == state {
            return;
        }

        let status = status.into();
        debug!(from = %previous, to = %state, status = %status, "Connection state changed");
        let _ = self
            .events
            .send(SyncEvent::ConnectionStatusChanged(ConnectionStatusChanged {
                is_connected: state.is_connected(),
                state,
                status,
                address: self.config.server_address.clone(),
                port: self.config.port,
                timestamp: Utc::now(),
            }));
    }

    /// Connect under the lifecycle lock
    pub(crate) async fn establish(&self, initiator: Initiator) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.session.is_some() {
            debug!("Already connected");
            return Ok(());
        }

        let this = self.arc().ok_or(NetworkError::NotConnected)?;
        let endpoint = self.config.endpoint();
        let cancelled = self.connect_cancel.notified();
        self.set_state(ConnectionState::Connecting, format!("Connecting to {}", endpoint));
        info!(endpoint = %endpoint, "Connecting to sync server");

        let opened = tokio::select! {
            opened = self.open_stream(&endpoint) => opened,
            _ = cancelled => Err(NetworkError::connect_cancelled(&endpoint)),
        };
        let (stream, peer) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(error = %e, endpoint = %endpoint, "Connect failed");
                self.metrics.record_failure_type(e.code());
                let fallback = if self.reconnecting.load(Ordering::Acquire) {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Disconnected
                };
                self.set_state(fallback, format!("Connect failed: {}", e));
                return Err(e);
            }
        };

        let (read_half, write_half) = stream.into_split();
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown, shutdown_rx) = watch::channel(false);

        *self.writer.lock().await = Some(SessionWriter {
            session_id,
            half: write_half,
        });
        self.heartbeat.reset();
        self.start_command_worker();

        let receive_task = tokio::spawn(session::receive_loop(
            this.clone(),
            session_id,
            peer,
            read_half,
            shutdown_rx.clone(),
        ));
        let heartbeat_task = tokio::spawn(session::heartbeat_loop(this, session_id, shutdown_rx));

        lifecycle.session = Some(Session {
            id: session_id,
            peer,
            shutdown,
            receive_task,
            heartbeat_task,
        });

        if let Some(task) = lifecycle.reconnect_task.take() {
            // the loop finishing here must not cancel itself
            if initiator == Initiator::Caller {
                task.abort();
            }
        }
        self.reconnecting.store(false, Ordering::Release);
        self.reconnect_attempts.store(0, Ordering::Release);

        self.metrics.record_connected();
        info!(peer = %peer, session_id, "Connected to sync server");
        self.set_state(ConnectionState::Connected, format!("Connected to {}", endpoint));
        Ok(())
    }

    async fn open_stream(&self, endpoint: &str) -> Result<(TcpStream, SocketAddr)> {
        let deadline = self.config.connect_timeout;
        let stream = match timeout(deadline, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(NetworkError::connect_failed(endpoint, e)),
            Err(_) => {
                return Err(NetworkError::connect_timeout(
                    endpoint,
                    deadline.as_millis() as u64,
                ))
            }
        };

        let peer = stream
            .peer_addr()
            .map_err(|e| NetworkError::connect_failed(endpoint, e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not set TCP_NODELAY");
        }
        Ok((stream, peer))
    }

    fn start_command_worker(&self) {
        let Some(pending) = self.pending_worker.lock().take() else {
            return;
        };
        debug!("Starting command worker");
        tokio::spawn(run_command_worker(
            pending.queue,
            pending.handler,
            self.this.clone(),
        ));
    }

    async fn disconnect(&self) {
        self.connect_cancel.notify_waiters();
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(task) = lifecycle.reconnect_task.take() {
            task.abort();
            let _ = task.await;
            info!("Reconnect loop cancelled");
        }
        self.reconnecting.store(false, Ordering::Release);
        self.reconnect_attempts.store(0, Ordering::Release);

        self.teardown(&mut lifecycle).await;
        self.set_state(ConnectionState::Disconnected, "Disconnected");
    }

    /// Stop the session tasks and close the socket
    ///
    /// Returns once both tasks have exited, so nothing touches the old socket
    /// afterwards.
    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        let Some(session) = lifecycle.session.take() else {
            return;
        };

        let _ = session.shutdown.send(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.half.shutdown().await {
                debug!(error = %e, "Socket shutdown failed");
            }
        }

        for task in [session.receive_task, session.heartbeat_task] {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(session_id = session.id, "Session task panicked");
                }
            }
        }

        self.metrics.record_disconnected();
        info!(peer = %session.peer, session_id = session.id, "Disconnected from sync server");
    }

    /// Queue a failure observed by `session_id`
    ///
    /// Handled on its own task: the reporter may be one of the tasks the
    /// handler has to wait for.
    pub(crate) fn report_failure(&self, session_id: u64, error: NetworkError) {
        let Some(this) = self.arc() else {
            return;
        };
        tokio::spawn(async move { this.handle_connection_failure(session_id, error).await });
    }

    async fn handle_connection_failure(&self, session_id: u64, error: NetworkError) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.session.as_ref().map(|s| s.id) != Some(session_id) {
            debug!(session_id, error = %error, "Ignoring failure from a closed session");
            return;
        }

        warn!(session_id, error = %error, "Connection failed");
        self.metrics.record_failure_type(error.code());
        self.teardown(&mut lifecycle).await;
        self.set_state(ConnectionState::Disconnected, format!("Connection lost: {}", error));

        if self.config.reconnect_enabled {
            self.start_reconnect(&mut lifecycle);
        }
    }

    fn start_reconnect(&self, lifecycle: &mut Lifecycle) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            debug!("Reconnect already in progress");
            return;
        }
        let Some(this) = self.arc() else {
            self.reconnecting.store(false, Ordering::Release);
            return;
        };

        self.reconnect_attempts.store(0, Ordering::Release);
        self.set_state(
            ConnectionState::Reconnecting,
            format!("Reconnecting every {:?}", self.config.reconnect_interval),
        );
        lifecycle.reconnect_task = Some(tokio::spawn(async move { this.reconnect_loop().await }));
    }

    /// Fixed-interval reconnect; 0 max attempts retries forever
    async fn reconnect_loop(self: Arc<Self>) {
        let max_attempts = self.config.max_reconnect_attempts;
        loop {
            tokio::time::sleep(self.config.reconnect_interval).await;

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1;
            info!(attempt, max_attempts, "Reconnecting to sync server");

            match self.establish(Initiator::ReconnectLoop).await {
                Ok(()) => {
                    info!(attempt, "Reconnected");
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    if max_attempts > 0 && attempt >= max_attempts {
                        let mut lifecycle = self.lifecycle.lock().await;
                        lifecycle.reconnect_task = None;
                        self.reconnecting.store(false, Ordering::Release);
                        error!(attempts = attempt, "Reconnect attempts exhausted, giving up");
                        self.set_state(
                            ConnectionState::Disconnected,
                            format!("Gave up after {} reconnect attempts", attempt),
                        );
                        return;
                    }
                }
            }
        }
    }

    pub(crate) async fn send_message(&self, message_type: &str, data: Value) -> Result<()> {
        let frame = self.codec.frame(message_type, data)?;
        self.write_frame(&frame, None, OnSendFailure::FailConnection)
            .await
    }

    /// Write one frame with a single write call
    ///
    /// With `session` set, the write only goes out on that session's socket.
    pub(crate) async fn write_frame(
        &self,
        frame: &str,
        session: Option<u64>,
        on_failure: OnSendFailure,
    ) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(NetworkError::NotConnected)?;
        if session.is_some_and(|id| id != writer.session_id) {
            return Err(NetworkError::NotConnected);
        }

        let session_id = writer.session_id;
        let result = write_fully(&mut writer.half, frame.as_bytes(), self.config.send_timeout).await;
        drop(guard);

        match result {
            Ok(()) => {
                self.metrics.record_send(frame.len());
                Ok(())
            }
            Err(e) => {
                if on_failure == OnSendFailure::FailConnection {
                    self.report_failure(session_id, e.clone());
                }
                Err(e)
            }
        }
    }
}

/// Write the whole frame within `deadline`
///
/// A failure after part of the frame went out is a `PartialSend`; the stream
/// framing is lost at that point.
async fn write_fully(
    half: &mut OwnedWriteHalf,
    bytes: &[u8],
    deadline: std::time::Duration,
) -> Result<()> {
    let mut sent = 0usize;
    let outcome = timeout(deadline, async {
        while sent < bytes.len() {
            match half.write(&bytes[sent..]).await? {
                0 => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero)),
                n => sent += n,
            }
        }
        half.flush().await
    })
    .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        _ if sent > 0 && sent < bytes.len() => {
            Err(NetworkError::partial_send(sent, bytes.len()))
        }
        Ok(Err(e)) => Err(NetworkError::send_with_source("Socket write failed", e)),
        Err(_) => Err(NetworkError::send(format!(
            "Write timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}

#[async_trait]
impl OutboundSink for ClientInner {
    async fn send_message(&self, message_type: &str, data: Value) -> Result<()> {
        ClientInner::send_message(self, message_type, data).await
    }
}
