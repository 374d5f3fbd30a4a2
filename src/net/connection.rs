//! Line-oriented peer connection.
//!
//! A [`Connection`] owns one TCP stream to a remote peer. Two tokio tasks
//! serve it:
//!
//! - the read loop frames newline-delimited UTF-8 with
//!   [`LinesCodec`] and hands every line to the [`ConnectionHandler`];
//! - the write loop is the only writer on the socket and drains a bounded
//!   queue filled by [`Connection::send`].
//!
//! State machine: `Connecting → Open → {Closed, Failed}`. Terminal states
//! are never left; reconnecting means building a new connection.
//! [`ConnectionHandler::on_closed`] fires exactly once, after the terminal
//! state is set. A dial that never opens does not fire it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use super::ConnectionId;
use crate::error::CollabError;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Dial in progress.
    Connecting,
    /// Stream established; reads and writes flow.
    Open,
    /// Closed by either side without error.
    Closed,
    /// Connect, read or write error.
    Failed,
}

impl ConnectionState {
    /// Returns `true` for `Closed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Tunables shared by every connection of a server or client.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Longest accepted inbound line, in bytes.
    pub max_line_length: usize,
    /// Capacity of the per-connection outbound queue.
    pub outbound_queue: usize,
    /// Upper bound on a dial attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_line_length: 1024 * 1024,
            outbound_queue: 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Receives the traffic and lifecycle of a connection.
///
/// Called from the connection's read task; implementations must not block.
pub trait ConnectionHandler: Send + Sync {
    /// A complete line arrived (without its terminator).
    fn on_message(&self, connection: &Arc<Connection>, message: String);

    /// The connection reached `Closed` or `Failed`. Called exactly once.
    fn on_closed(&self, connection: &Arc<Connection>);
}

/// Point-in-time description of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Remote address, once known.
    pub peer_addr: Option<SocketAddr>,
    /// User name announced by the peer.
    pub name: Option<String>,
    /// `true` when this process dialed the connection.
    pub is_local: bool,
    /// Current state.
    pub state: ConnectionState,
    /// Handshake completed.
    pub valid: bool,
    /// Whether messages are written to this peer.
    pub ok_to_send: bool,
    /// Whether messages from this peer are processed.
    pub ok_to_receive: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last error, if the connection failed.
    pub last_error: Option<String>,
}

/// One full-duplex line stream to a peer.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    is_local: bool,
    peer_addr: OnceLock<SocketAddr>,
    name: RwLock<Option<String>>,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    outbound: mpsc::Sender<String>,
    shutdown: watch::Sender<bool>,
    flushed: watch::Sender<bool>,
    closed_notified: AtomicBool,
    valid: AtomicBool,
    ok_to_send: AtomicBool,
    ok_to_receive: AtomicBool,
    created_at: DateTime<Utc>,
}

impl Connection {
    fn pending(is_local: bool, options: &ConnectionOptions) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(options.outbound_queue.max(1));
        let (shutdown, _) = watch::channel(false);
        let (flushed, _) = watch::channel(false);
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            is_local,
            peer_addr: OnceLock::new(),
            name: RwLock::new(None),
            state: Mutex::new(ConnectionState::Connecting),
            last_error: Mutex::new(None),
            outbound,
            shutdown,
            flushed,
            closed_notified: AtomicBool::new(false),
            valid: AtomicBool::new(false),
            ok_to_send: AtomicBool::new(true),
            ok_to_receive: AtomicBool::new(true),
            created_at: Utc::now(),
        });
        (connection, rx)
    }

    /// Wraps a stream returned by `accept` and starts its read and write
    /// tasks.
    #[must_use]
    pub fn accepted(
        stream: TcpStream,
        handler: Arc<dyn ConnectionHandler>,
        options: &ConnectionOptions,
    ) -> Arc<Self> {
        let (connection, rx) = Self::pending(false, options);
        connection.start_io(stream, rx, handler, options);
        connection
    }

    /// Dials `host:port` and starts the connection's tasks.
    ///
    /// Never fails: on refusal, timeout or resolution failure the returned
    /// connection is `Failed` and [`Connection::last_error`] describes why.
    /// Callers check [`Connection::is_connection_ok`].
    pub async fn dial(
        host: &str,
        port: u16,
        handler: Arc<dyn ConnectionHandler>,
        options: &ConnectionOptions,
    ) -> Arc<Self> {
        let (connection, rx) = Self::pending(true, options);
        let addr = format!("{host}:{port}");
        tracing::debug!(conn = %connection.id, %addr, "dialing peer");

        let attempt = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr)).await;
        let result = match attempt {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(source),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        };

        match result {
            Ok(stream) => connection.start_io(stream, rx, handler, options),
            Err(source) => {
                let err = CollabError::Connect { addr, source };
                tracing::warn!(conn = %connection.id, error = %err, "dial failed");
                connection.record_error(&err);
                connection.transition(ConnectionState::Failed);
                connection.flushed.send_replace(true);
            }
        }
        connection
    }

    fn start_io(
        self: &Arc<Self>,
        stream: TcpStream,
        rx: mpsc::Receiver<String>,
        handler: Arc<dyn ConnectionHandler>,
        options: &ConnectionOptions,
    ) {
        if let Ok(addr) = stream.peer_addr() {
            let _ = self.peer_addr.set(addr);
        }
        if !self.transition(ConnectionState::Open) {
            self.flushed.send_replace(true);
            return;
        }
        let (reader, writer) = stream.into_split();
        tokio::spawn(read_loop(
            Arc::clone(self),
            reader,
            handler,
            options.max_line_length,
        ));
        tokio::spawn(write_loop(Arc::clone(self), writer, rx));
        tracing::info!(conn = %self.id, peer = ?self.peer_addr(), local = self.is_local, "connection open");
    }

    /// Queues one line for delivery to the peer.
    ///
    /// # Errors
    ///
    /// - [`CollabError::InvalidEnvelope`] if `message` contains a line break.
    /// - [`CollabError::ConnectionClosed`] if the connection is not open.
    /// - [`CollabError::QueueFull`] if the outbound queue is saturated.
    pub fn send(&self, message: impl Into<String>) -> Result<(), CollabError> {
        let message = message.into();
        if message.contains('\n') {
            return Err(CollabError::InvalidEnvelope(
                "message contains a line break".to_string(),
            ));
        }
        if self.state() != ConnectionState::Open {
            return Err(CollabError::ConnectionClosed(self.id));
        }
        self.outbound.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => CollabError::QueueFull(self.id),
            mpsc::error::TrySendError::Closed(_) => CollabError::ConnectionClosed(self.id),
        })
    }

    /// Closes the connection. Queued lines are flushed before the socket
    /// shuts down. Closing a terminal connection does nothing.
    pub fn close(&self) {
        if self.transition(ConnectionState::Closed) {
            tracing::debug!(conn = %self.id, "closing connection");
        }
        self.shutdown.send_replace(true);
    }

    /// Waits until the writer has flushed the queue and shut the socket
    /// down. Returns at once for a dial that never opened.
    pub async fn closed(&self) {
        let mut flushed = self.flushed.subscribe();
        loop {
            if *flushed.borrow_and_update() {
                return;
            }
            if flushed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// `true` when this process dialed the connection.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.is_local
    }

    /// Remote address, once connected.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr.get().copied()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` while the connection is open.
    #[must_use]
    pub fn is_connection_ok(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Description of the error that failed the connection.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// User name announced by the peer.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the peer's user name.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = Some(name.into());
    }

    /// Handshake completed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Marks the handshake state.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }

    /// Whether outgoing fan-out includes this peer.
    #[must_use]
    pub fn ok_to_send(&self) -> bool {
        self.ok_to_send.load(Ordering::Acquire)
    }

    /// Enables or disables fan-out to this peer.
    pub fn set_ok_to_send(&self, ok: bool) {
        self.ok_to_send.store(ok, Ordering::Release);
    }

    /// Whether messages from this peer are routed.
    #[must_use]
    pub fn ok_to_receive(&self) -> bool {
        self.ok_to_receive.load(Ordering::Acquire)
    }

    /// Enables or disables routing of this peer's messages.
    pub fn set_ok_to_receive(&self, ok: bool) {
        self.ok_to_receive.store(ok, Ordering::Release);
    }

    /// Snapshot of this connection.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer_addr: self.peer_addr(),
            name: self.name(),
            is_local: self.is_local,
            state: self.state(),
            valid: self.is_valid(),
            ok_to_send: self.ok_to_send(),
            ok_to_receive: self.ok_to_receive(),
            created_at: self.created_at,
            last_error: self.last_error(),
        }
    }

    /// Moves to `next` unless already terminal. `Open` is only reachable
    /// from `Connecting`. Returns `true` if the state changed.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let allowed = match (*state, next) {
            (current, _) if current.is_terminal() => false,
            (ConnectionState::Connecting, ConnectionState::Open) => true,
            (_, ConnectionState::Open | ConnectionState::Connecting) => false,
            _ => true,
        };
        if allowed {
            *state = next;
        }
        allowed
    }

    fn record_error(&self, err: &CollabError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    fn fail(&self, err: &CollabError) {
        if self.transition(ConnectionState::Failed) {
            self.record_error(err);
            tracing::warn!(conn = %self.id, error = %err, "connection failed");
        }
        self.shutdown.send_replace(true);
    }

    fn notify_closed(self: &Arc<Self>, handler: &dyn ConnectionHandler) {
        if !self.closed_notified.swap(true, Ordering::AcqRel) {
            tracing::info!(conn = %self.id, state = ?self.state(), "connection closed");
            handler.on_closed(self);
        }
    }
}

fn codec_error(err: LinesCodecError) -> CollabError {
    match err {
        LinesCodecError::Io(source) => CollabError::Stream(source),
        LinesCodecError::MaxLineLengthExceeded => CollabError::Stream(io::Error::new(
            io::ErrorKind::InvalidData,
            "line exceeds maximum length",
        )),
    }
}

async fn read_loop(
    connection: Arc<Connection>,
    reader: OwnedReadHalf,
    handler: Arc<dyn ConnectionHandler>,
    max_line_length: usize,
) {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length));
    let mut shutdown = connection.shutdown.subscribe();
    let already_closed = *shutdown.borrow();

    if !already_closed {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = lines.next() => match frame {
                    Some(Ok(line)) => handler.on_message(&connection, line),
                    Some(Err(err)) => {
                        connection.fail(&codec_error(err));
                        break;
                    }
                    None => {
                        tracing::debug!(conn = %connection.id, "peer closed stream");
                        break;
                    }
                },
            }
        }
    }

    connection.transition(ConnectionState::Closed);
    connection.shutdown.send_replace(true);
    connection.notify_closed(handler.as_ref());
}

async fn write_loop(
    connection: Arc<Connection>,
    writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
) {
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    let mut shutdown = connection.shutdown.subscribe();
    let mut failed = false;

    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                biased;
                queued = rx.recv() => {
                    let Some(line) = queued else { break };
                    if let Err(err) = sink.send(line).await {
                        connection.fail(&codec_error(err));
                        failed = true;
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    if !failed && connection.state() != ConnectionState::Failed {
        while let Ok(line) = rx.try_recv() {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    }
    let _ = SinkExt::<String>::close(&mut sink).await;
    connection.flushed.send_replace(true);
}
