//! Relay server: accepts peers and fans their lines out to each other.
//!
//! Architecture:
//! ```text
//! Peer A ──┐                         ┌──► Peer B
//!          ├── Connection ── route ──┤
//! Peer C ──┘        │                └──► Peer C   (never back to A)
//!                   ▼
//!            ServerListener (owner decides: Broadcast | Drop)
//! ```
//!
//! The live connection set is mutated by the accept loop (adds) and by
//! every connection's read task (removals); it sits behind a
//! [`std::sync::RwLock`] and every fan-out iterates a snapshot.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Connection, ConnectionHandler, ConnectionId, ConnectionOptions, ConnectionState};
use crate::error::CollabError;

/// What the server does with a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    /// Write the message to every other live connection.
    Broadcast,
    /// Consume the message locally.
    Drop,
}

/// Lifecycle and routing callbacks for the server's owner.
///
/// All methods have no-op defaults; the default routing policy is
/// [`Relay::Broadcast`].
pub trait ServerListener: Send + Sync {
    /// The server bound `addr` and is accepting.
    fn on_server_started(&self, _addr: SocketAddr) {}

    /// The server stopped accepting and closed its connections.
    fn on_server_stopped(&self) {}

    /// A connection joined the live set.
    fn on_client_added(&self, _connection: &Arc<Connection>) {}

    /// A connection left the live set. Called once per connection.
    fn on_client_removed(&self, _connection: &Arc<Connection>) {}

    /// A line arrived on `connection`; decide whether to relay it.
    fn on_message(&self, _connection: &Arc<Connection>, _message: &str) -> Relay {
        Relay::Broadcast
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    /// Connections ever added to the live set.
    pub total_connections: u64,
    /// Connections currently in the live set.
    pub active_connections: usize,
    /// Lines received from peers.
    pub messages_routed: u64,
    /// Lines relayed to at least one other peer.
    pub messages_relayed: u64,
    /// Whether the accept loop runs.
    pub is_running: bool,
    /// Bound address while running.
    pub local_addr: Option<SocketAddr>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

struct ServerInner {
    bind_host: String,
    options: ConnectionOptions,
    listener: Arc<dyn ServerListener>,
    connections: RwLock<Vec<Arc<Connection>>>,
    /// Serializes membership changes with their listener callbacks, so
    /// `on_client_added` always precedes `on_client_removed`.
    membership: Mutex<()>,
    running: Mutex<Option<Running>>,
    total_connections: AtomicU64,
    messages_routed: AtomicU64,
    messages_relayed: AtomicU64,
}

/// Relay server handle. Cloning shares the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_host", &self.inner.bind_host)
            .field("local_addr", &self.local_addr())
            .field("connections", &self.inner.snapshot().len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a stopped server that will bind on `bind_host`.
    #[must_use]
    pub fn new(
        listener: Arc<dyn ServerListener>,
        bind_host: impl Into<String>,
        options: ConnectionOptions,
    ) -> Self {
        let bind_host = bind_host.into();
        let inner = Arc::new(ServerInner {
            bind_host,
            options,
            listener,
            connections: RwLock::new(Vec::new()),
            membership: Mutex::new(()),
            running: Mutex::new(None),
            total_connections: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
        });
        Self { inner }
    }

    /// Binds `bind_host:port` and starts accepting. Port `0` picks a free
    /// port; the bound address is returned.
    ///
    /// # Errors
    ///
    /// - [`CollabError::AlreadyRunning`] if the server is accepting.
    /// - [`CollabError::Bind`] if the port cannot be bound.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, CollabError> {
        if self.is_running() {
            return Err(CollabError::AlreadyRunning);
        }
        let addr = format!("{}:{port}", self.inner.bind_host);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| CollabError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        {
            let mut running = self.inner.lock_running();
            if running.is_some() {
                return Err(CollabError::AlreadyRunning);
            }
            let accept_task = tokio::spawn(accept_loop(Arc::clone(&self.inner), listener, shutdown_rx));
            *running = Some(Running {
                local_addr,
                shutdown,
                accept_task,
            });
        }

        tracing::info!(addr = %local_addr, "collaboration server listening");
        self.inner.listener.on_server_started(local_addr);
        Ok(local_addr)
    }

    /// Stops accepting and closes every live connection. Does nothing if
    /// the server is not running.
    ///
    /// Returns once the listening socket is released, so the port can be
    /// bound again right away.
    pub async fn stop(&self) {
        let Some(running) = self.inner.lock_running().take() else {
            return;
        };
        running.shutdown.send_replace(true);
        if let Err(err) = running.accept_task.await {
            tracing::warn!(error = %err, "accept loop ended abnormally");
        }
        for connection in self.inner.snapshot() {
            connection.close();
        }
        tracing::info!(addr = %running.local_addr, "collaboration server stopped");
        self.inner.listener.on_server_stopped();
    }

    /// Dials `host:port`, marks the connection local and adopts it into
    /// the live set when it opens. The connection is returned in either
    /// state; check [`Connection::is_connection_ok`].
    pub async fn connect_to(&self, host: &str, port: u16) -> Arc<Connection> {
        let handler: Arc<dyn ConnectionHandler> = Arc::clone(&self.inner) as Arc<dyn ConnectionHandler>;
        let connection = Connection::dial(host, port, handler, &self.inner.options).await;
        if connection.is_connection_ok() {
            self.inner.adopt(&connection);
        }
        connection
    }

    /// Adopts an externally created connection into the live set.
    ///
    /// Returns `false` if the connection is already terminal or present.
    /// The connection must route its traffic to this server, i.e. it was
    /// built with [`Server::handler`].
    pub fn add_connection(&self, connection: &Arc<Connection>) -> bool {
        self.inner.adopt(connection)
    }

    /// The handler to build connections that feed this server.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn ConnectionHandler> {
        Arc::clone(&self.inner) as Arc<dyn ConnectionHandler>
    }

    /// Writes `message` to every live connection.
    pub fn write(&self, message: &str) -> usize {
        self.inner.write_excluding(message, None)
    }

    /// Writes `message` to every live connection except `exclude`.
    ///
    /// Connections with `ok_to_send` disabled are skipped. Per-connection
    /// failures are logged and do not stop the fan-out. Returns the number
    /// of connections the message was queued on.
    pub fn write_excluding(&self, message: &str, exclude: Option<ConnectionId>) -> usize {
        self.inner.write_excluding(message, exclude)
    }

    /// Closes one connection.
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::ConnectionNotFound`] if `id` is not live.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), CollabError> {
        let connection = self
            .connection(id)
            .ok_or(CollabError::ConnectionNotFound(id))?;
        connection.close();
        Ok(())
    }

    /// Live connections in insertion order.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner.snapshot()
    }

    /// Looks up a live connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner
            .read_connections()
            .iter()
            .find(|c| c.id() == id)
            .map(Arc::clone)
    }

    /// Returns `true` if any connection is live.
    #[must_use]
    pub fn has_clients(&self) -> bool {
        !self.inner.read_connections().is_empty()
    }

    /// Returns `true` while the accept loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock_running().is_some()
    }

    /// Bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock_running().as_ref().map(|r| r.local_addr)
    }

    /// Snapshot of server statistics.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.inner.total_connections.load(Ordering::Relaxed),
            active_connections: self.inner.read_connections().len(),
            messages_routed: self.inner.messages_routed.load(Ordering::Relaxed),
            messages_relayed: self.inner.messages_relayed.load(Ordering::Relaxed),
            is_running: self.is_running(),
            local_addr: self.local_addr(),
        }
    }
}

impl ServerInner {
    fn read_connections(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Connection>>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_connections(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Connection>>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_membership(&self) -> std::sync::MutexGuard<'_, ()> {
        self.membership.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.read_connections().clone()
    }

    /// Inserts `connection` unless it is terminal or already present.
    ///
    /// Runs under the membership lock, as does `on_closed`. A connection
    /// sets its terminal state before `on_closed` runs, so it is either
    /// never inserted, or inserted and announced before it is removed.
    fn adopt(&self, connection: &Arc<Connection>) -> bool {
        let _membership = self.lock_membership();
        {
            let mut list = self.write_connections();
            if connection.state().is_terminal() || list.iter().any(|c| c.id() == connection.id()) {
                return false;
            }
            list.push(Arc::clone(connection));
        }
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            conn = %connection.id(),
            peer = ?connection.peer_addr(),
            local = connection.is_local(),
            "client added"
        );
        self.listener.on_client_added(connection);
        true
    }

    fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut list = self.write_connections();
        list.iter()
            .position(|c| c.id() == id)
            .map(|index| list.remove(index))
    }

    fn write_excluding(&self, message: &str, exclude: Option<ConnectionId>) -> usize {
        let mut written = 0;
        for connection in self.snapshot() {
            if Some(connection.id()) == exclude
                || !connection.ok_to_send()
                || connection.state() != ConnectionState::Open
            {
                continue;
            }
            match connection.send(message) {
                Ok(()) => written += 1,
                Err(err) => {
                    tracing::warn!(conn = %connection.id(), error = %err, "dropping message for peer");
                }
            }
        }
        written
    }
}

impl ConnectionHandler for ServerInner {
    fn on_message(&self, connection: &Arc<Connection>, message: String) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        if !connection.ok_to_receive() {
            tracing::trace!(conn = %connection.id(), "ignoring message from muted peer");
            return;
        }
        match self.listener.on_message(connection, &message) {
            Relay::Broadcast => {
                let written = self.write_excluding(&message, Some(connection.id()));
                if written > 0 {
                    self.messages_relayed.fetch_add(1, Ordering::Relaxed);
                }
                tracing::trace!(conn = %connection.id(), peers = written, "relayed message");
            }
            Relay::Drop => {}
        }
    }

    fn on_closed(&self, connection: &Arc<Connection>) {
        let _membership = self.lock_membership();
        if let Some(removed) = self.remove(connection.id()) {
            tracing::info!(conn = %removed.id(), state = ?removed.state(), "client removed");
            self.listener.on_client_removed(&removed);
        }
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    let handler: Arc<dyn ConnectionHandler> = Arc::clone(&inner) as Arc<dyn ConnectionHandler>;
    if *shutdown.borrow() {
        return;
    }
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!(%addr, "accepted tcp connection");
                    let connection = Connection::accepted(stream, Arc::clone(&handler), &inner.options);
                    inner.adopt(&connection);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    tracing::debug!("accept loop finished");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Default)]
    struct Counts {
        started: AtomicUsize,
        stopped: AtomicUsize,
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    struct Recorder {
        counts: Counts,
        removed_tx: mpsc::UnboundedSender<ConnectionId>,
        added_tx: mpsc::UnboundedSender<ConnectionId>,
        policy: Relay,
    }

    impl ServerListener for Recorder {
        fn on_server_started(&self, _addr: SocketAddr) {
            self.counts.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_server_stopped(&self) {
            self.counts.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_client_added(&self, connection: &Arc<Connection>) {
            self.counts.added.fetch_add(1, Ordering::SeqCst);
            let _ = self.added_tx.send(connection.id());
        }

        fn on_client_removed(&self, connection: &Arc<Connection>) {
            self.counts.removed.fetch_add(1, Ordering::SeqCst);
            let _ = self.removed_tx.send(connection.id());
        }

        fn on_message(&self, _connection: &Arc<Connection>, _message: &str) -> Relay {
            self.policy
        }
    }

    struct Harness {
        server: Server,
        recorder: Arc<Recorder>,
        added: mpsc::UnboundedReceiver<ConnectionId>,
        removed: mpsc::UnboundedReceiver<ConnectionId>,
        port: u16,
    }

    async fn harness(policy: Relay) -> Harness {
        let (added_tx, added) = mpsc::unbounded_channel();
        let (removed_tx, removed) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            counts: Counts::default(),
            removed_tx,
            added_tx,
            policy,
        });
        let server = Server::new(
            Arc::clone(&recorder) as Arc<dyn ServerListener>,
            "127.0.0.1",
            ConnectionOptions::default(),
        );
        let Ok(addr) = server.start(0).await else {
            panic!("start failed");
        };
        Harness {
            server,
            recorder,
            added,
            removed,
            port: addr.port(),
        }
    }

    async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
        let Ok(value) = tokio::time::timeout(Duration::from_secs(5), fut).await else {
            panic!("timed out");
        };
        value
    }

    struct RawPeer {
        lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl RawPeer {
        async fn send(&mut self, line: &str) {
            let framed = format!("{line}\n");
            assert!(self.writer.write_all(framed.as_bytes()).await.is_ok());
        }

        async fn recv(&mut self) -> Option<String> {
            let Ok(line) = within(self.lines.next_line()).await else {
                panic!("read failed");
            };
            line
        }

        async fn recv_nothing(&mut self) {
            let outcome =
                tokio::time::timeout(Duration::from_millis(200), self.lines.next_line()).await;
            assert!(outcome.is_err(), "unexpected line: {outcome:?}");
        }
    }

    async fn join(h: &mut Harness) -> RawPeer {
        let Ok(stream) = TcpStream::connect(("127.0.0.1", h.port)).await else {
            panic!("connect failed");
        };
        assert!(within(h.added.recv()).await.is_some());
        let (reader, writer) = stream.into_split();
        RawPeer {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    #[tokio::test]
    async fn relays_to_others_but_not_sender() {
        let mut h = harness(Relay::Broadcast).await;
        let mut a = join(&mut h).await;
        let mut b = join(&mut h).await;

        a.send("hello").await;
        assert_eq!(b.recv().await.as_deref(), Some("hello"));
        a.recv_nothing().await;
        assert_eq!(h.server.stats().messages_relayed, 1);
    }

    #[tokio::test]
    async fn drop_policy_consumes_message() {
        let mut h = harness(Relay::Drop).await;
        let mut a = join(&mut h).await;
        let mut b = join(&mut h).await;

        a.send("secret").await;
        b.recv_nothing().await;
        assert_eq!(h.server.stats().messages_routed, 1);
    }

    #[tokio::test]
    async fn disconnect_reports_once_and_relaying_continues() {
        let mut h = harness(Relay::Broadcast).await;
        let a = join(&mut h).await;
        let mut b = join(&mut h).await;
        let mut c = join(&mut h).await;
        assert_eq!(h.server.connections().len(), 3);

        drop(a);
        assert!(within(h.removed.recv()).await.is_some());
        assert_eq!(h.server.connections().len(), 2);

        b.send("still here").await;
        assert_eq!(c.recv().await.as_deref(), Some("still here"));
        b.recv_nothing().await;
        assert_eq!(h.recorder.counts.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_closes_every_connection() {
        let mut h = harness(Relay::Broadcast).await;
        let mut a = join(&mut h).await;
        let mut b = join(&mut h).await;

        h.server.stop().await;
        assert!(!h.server.is_running());
        assert!(within(h.removed.recv()).await.is_some());
        assert!(within(h.removed.recv()).await.is_some());
        assert!(!h.server.has_clients());
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);

        assert_eq!(h.recorder.counts.started.load(Ordering::SeqCst), 1);
        assert_eq!(h.recorder.counts.stopped.load(Ordering::SeqCst), 1);

        h.server.stop().await;
        assert_eq!(h.recorder.counts.stopped.load(Ordering::SeqCst), 1);
        assert!(TcpStream::connect(("127.0.0.1", h.port)).await.is_err());
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_bind_conflict_surfaces() {
        let h = harness(Relay::Broadcast).await;
        assert!(matches!(h.server.start(0).await, Err(CollabError::AlreadyRunning)));

        let other = Server::new(
            Arc::clone(&h.recorder) as Arc<dyn ServerListener>,
            "127.0.0.1",
            ConnectionOptions::default(),
        );
        assert!(matches!(other.start(h.port).await, Err(CollabError::Bind { .. })));
        assert!(!other.is_running());
    }

    #[tokio::test]
    async fn connect_to_adopts_local_connection() {
        let mut host = harness(Relay::Broadcast).await;
        let mut guest = harness(Relay::Broadcast).await;

        let connection = guest.server.connect_to("127.0.0.1", host.port).await;
        assert!(connection.is_connection_ok());
        assert!(connection.is_local());
        assert!(within(guest.added.recv()).await.is_some());
        assert!(within(host.added.recv()).await.is_some());

        let mut peer = join(&mut host).await;
        peer.send("from host side").await;

        // The guest relays to its own peers; here it has none besides the host.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(guest.server.stats().messages_routed, 1);
    }

    #[tokio::test]
    async fn muted_peer_is_skipped() {
        let mut h = harness(Relay::Broadcast).await;
        let mut a = join(&mut h).await;
        let mut b = join(&mut h).await;

        for connection in h.server.connections() {
            connection.set_ok_to_send(false);
        }
        a.send("quiet").await;
        b.recv_nothing().await;
    }

    #[tokio::test]
    async fn stopped_server_restarts_on_same_port() {
        let mut h = harness(Relay::Broadcast).await;
        let _peer = join(&mut h).await;

        h.server.stop().await;
        let Ok(addr) = h.server.start(h.port).await else {
            panic!("restart failed");
        };
        assert_eq!(addr.port(), h.port);
        let _again = join(&mut h).await;
        assert_eq!(h.recorder.counts.started.load(Ordering::SeqCst), 2);
    }

    /// Records the order of membership callbacks per connection.
    #[derive(Default)]
    struct Timeline {
        events: Mutex<std::collections::HashMap<ConnectionId, Vec<&'static str>>>,
    }

    impl Timeline {
        fn push(&self, id: ConnectionId, event: &'static str) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(id)
                .or_default()
                .push(event);
        }
    }

    impl ServerListener for Timeline {
        fn on_client_added(&self, connection: &Arc<Connection>) {
            self.push(connection.id(), "added");
        }

        fn on_client_removed(&self, connection: &Arc<Connection>) {
            self.push(connection.id(), "removed");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn added_always_precedes_removed() {
        let timeline = Arc::new(Timeline::default());
        let server = Server::new(
            Arc::clone(&timeline) as Arc<dyn ServerListener>,
            "127.0.0.1",
            ConnectionOptions::default(),
        );
        let Ok(addr) = server.start(0).await else {
            panic!("start failed");
        };

        for _ in 0..300 {
            if let Ok(stream) = TcpStream::connect(addr).await {
                drop(stream);
            }
        }

        within(async {
            loop {
                let settled = {
                    let events = timeline.events.lock().unwrap_or_else(PoisonError::into_inner);
                    for history in events.values() {
                        assert_eq!(history.first(), Some(&"added"), "{history:?}");
                        assert!(history.len() <= 2, "{history:?}");
                    }
                    events.values().all(|history| history.len() == 2)
                };
                if settled && !server.has_clients() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        server.stop().await;
    }

    #[tokio::test]
    async fn disconnect_unknown_is_not_found() {
        let h = harness(Relay::Broadcast).await;
        assert!(matches!(
            h.server.disconnect(ConnectionId::new()),
            Err(CollabError::ConnectionNotFound(_))
        ));
    }
}
