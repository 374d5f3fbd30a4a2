//! The collaboration session.
//!
//! Architecture:
//! ```text
//!  local participants ──► Coordinator ──► NetworkBridge ──► write ──► Server ──► peers
//!                             ▲                                          │
//!                             └──── bridge.emit ◄── dispatch ◄── on_message
//! ```
//!
//! Outbound lines get a fresh `<session>_<counter>` ID that is recorded in
//! the seen cache, so a copy relayed back by the mesh is dropped. Inbound
//! lines are deduplicated, dispatched by kind and, for chat and events,
//! handed back to the server to relay to the other peers.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::bridge::NetworkBridge;
use super::envelope::{Envelope, EventRecord, MessageKind};
use super::inbound::{self, InboundGuard};
use super::seen::SeenMessages;
use crate::domain::{
    Coordinator, CoordinatorSet, Event, EventClass, NoticeBus, Participant, SessionNotice,
};
use crate::error::CollabError;
use crate::net::{
    Connection, ConnectionId, ConnectionInfo, ConnectionOptions, Relay, Server, ServerListener,
    ServerStats,
};

/// Body of an accepting `collab.acknewuser` reply.
const ACK_OK: &str = "ok";
/// Body of a refusing `collab.acknewuser` reply.
const ACK_NO: &str = "no";

/// Settings for a [`CollabSession`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Name announced to peers.
    pub user_name: String,
    /// Interface the server binds when hosting.
    pub bind_host: String,
    /// Admit every peer that announces itself.
    pub accept_all: bool,
    /// Write local changes to the network.
    pub ok_to_send: bool,
    /// Apply remote changes other than chat.
    pub ok_to_receive: bool,
    /// Forward relayable messages to the other peers.
    pub ok_to_relay: bool,
    /// Capacity of the seen-message cache.
    pub seen_capacity: usize,
    /// Capacity of the notice bus.
    pub notice_capacity: usize,
    /// Per-connection tunables.
    pub connection: ConnectionOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_name: "anonymous".to_string(),
            bind_host: "0.0.0.0".to_string(),
            accept_all: true,
            ok_to_send: true,
            ok_to_receive: true,
            ok_to_relay: true,
            seen_capacity: 1000,
            notice_capacity: 1024,
            connection: ConnectionOptions::default(),
        }
    }
}

/// Collaboration manager: one per process.
pub struct CollabSession {
    session_id: Uuid,
    user_name: String,
    counter: AtomicU64,
    accept_all: AtomicBool,
    ok_to_send: AtomicBool,
    ok_to_receive: AtomicBool,
    ok_to_relay: AtomicBool,
    connection_options: ConnectionOptions,
    seen: Mutex<SeenMessages>,
    coordinators: CoordinatorSet,
    bridges: RwLock<BTreeMap<EventClass, Arc<NetworkBridge>>>,
    notices: NoticeBus,
    server: Server,
    this: Weak<CollabSession>,
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("session_id", &self.session_id)
            .field("user_name", &self.user_name)
            .field("server", &self.server)
            .field("classes", &self.coordinators.classes())
            .finish_non_exhaustive()
    }
}

/// Routes server callbacks into the session without keeping it alive.
struct SessionListener {
    session: Weak<CollabSession>,
}

impl ServerListener for SessionListener {
    fn on_server_started(&self, addr: SocketAddr) {
        if let Some(session) = self.session.upgrade() {
            session.notices.publish(SessionNotice::ServerStarted {
                addr,
                timestamp: Utc::now(),
            });
        }
    }

    fn on_server_stopped(&self) {
        if let Some(session) = self.session.upgrade() {
            session.notices.publish(SessionNotice::ServerStopped {
                timestamp: Utc::now(),
            });
        }
    }

    fn on_client_added(&self, connection: &Arc<Connection>) {
        if let Some(session) = self.session.upgrade() {
            session.notices.publish(SessionNotice::ClientAdded {
                connection: connection.id(),
                is_local: connection.is_local(),
                timestamp: Utc::now(),
            });
        }
    }

    fn on_client_removed(&self, connection: &Arc<Connection>) {
        if let Some(session) = self.session.upgrade() {
            session.notices.publish(SessionNotice::ClientRemoved {
                connection: connection.id(),
                timestamp: Utc::now(),
            });
        }
    }

    fn on_message(&self, connection: &Arc<Connection>, message: &str) -> Relay {
        match self.session.upgrade() {
            Some(session) => session.handle_line(connection, message),
            None => Relay::Drop,
        }
    }
}

impl CollabSession {
    /// Creates a session whose server is not yet hosting.
    #[must_use]
    pub fn new(settings: SessionSettings) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let listener = Arc::new(SessionListener {
                session: Weak::clone(this),
            });
            let server = Server::new(
                listener,
                settings.bind_host.clone(),
                settings.connection.clone(),
            );
            Self {
                session_id: Uuid::new_v4(),
                user_name: settings.user_name,
                counter: AtomicU64::new(0),
                accept_all: AtomicBool::new(settings.accept_all),
                ok_to_send: AtomicBool::new(settings.ok_to_send),
                ok_to_receive: AtomicBool::new(settings.ok_to_receive),
                ok_to_relay: AtomicBool::new(settings.ok_to_relay),
                connection_options: settings.connection,
                seen: Mutex::new(SeenMessages::new(settings.seen_capacity)),
                coordinators: CoordinatorSet::new(),
                bridges: RwLock::new(BTreeMap::new()),
                notices: NoticeBus::new(settings.notice_capacity),
                server,
                this: Weak::clone(this),
            }
        })
    }

    // -- Hosting and dialing ----------------------------------------------

    /// Starts accepting peers on `port` (`0` picks a free port).
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::AlreadyRunning`] or [`CollabError::Bind`].
    pub async fn start_hosting(&self, port: u16) -> Result<SocketAddr, CollabError> {
        let addr = self.server.start(port).await?;
        tracing::info!(%addr, user = %self.user_name, "hosting collaboration session");
        Ok(addr)
    }

    /// Stops accepting and closes every connection.
    pub async fn stop_hosting(&self) {
        self.server.stop().await;
    }

    /// Says goodbye to every peer, stops hosting and waits up to `grace`
    /// for the close requests to reach the wire.
    pub async fn shutdown(&self, grace: Duration) {
        let connections = self.server.connections();
        self.disconnect_all();
        self.server.stop().await;
        let flushed = join_all(connections.iter().map(|c| c.closed()));
        if tokio::time::timeout(grace, flushed).await.is_err() {
            tracing::warn!(peers = connections.len(), "peers not flushed before shutdown");
        }
    }

    /// Dials a peer, joins it to the mesh and announces this user.
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::Connect`] if the peer cannot be reached.
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<Arc<Connection>, CollabError> {
        let connection =
            Connection::dial(host, port, self.server.handler(), &self.connection_options).await;
        if !connection.is_connection_ok() {
            let reason = connection
                .last_error()
                .unwrap_or_else(|| "connection failed".to_string());
            return Err(CollabError::Connect {
                addr: format!("{host}:{port}"),
                source: io::Error::other(reason),
            });
        }
        connection.set_valid(true);
        self.server.add_connection(&connection);
        let hello = self.envelope(MessageKind::NewUser, "");
        connection.send(hello.encode())?;
        tracing::info!(conn = %connection.id(), %host, port, "joined collaboration peer");
        Ok(connection)
    }

    /// Sends a close request to one peer and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`CollabError::ConnectionNotFound`] if `id` is not live.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), CollabError> {
        let connection = self
            .server
            .connection(id)
            .ok_or(CollabError::ConnectionNotFound(id))?;
        self.say_goodbye(&connection);
        Ok(())
    }

    /// Sends a close request to every peer and closes all connections.
    pub fn disconnect_all(&self) {
        for connection in self.server.connections() {
            self.say_goodbye(&connection);
        }
    }

    fn say_goodbye(&self, connection: &Arc<Connection>) {
        let bye = self.envelope(MessageKind::Close, "");
        if let Err(err) = connection.send(bye.encode()) {
            tracing::debug!(conn = %connection.id(), error = %err, "close request not sent");
        }
        connection.close();
    }

    // -- Coordinators -----------------------------------------------------

    /// Returns the coordinator for `class`, joined to the network.
    ///
    /// Local events of the class are written to every peer; remote events
    /// are delivered to the local participants.
    ///
    /// # Errors
    ///
    /// Propagates registration failures of the network bridge.
    pub fn bridge(&self, class: impl Into<EventClass>) -> Result<Arc<Coordinator>, CollabError> {
        let class = class.into();
        let coordinator = self.coordinators.get_or_create(&class);
        let mut bridges = self
            .bridges
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let bridged = bridges
            .get(&class)
            .is_some_and(|bridge| coordinator.contains(bridge.id()));
        if !bridged {
            let bridge = Arc::new(NetworkBridge::new(class.clone(), Weak::clone(&self.this)));
            coordinator.register(Arc::clone(&bridge) as Arc<dyn Participant>)?;
            tracing::debug!(%class, "bridged event class to network");
            bridges.insert(class, bridge);
        }
        Ok(coordinator)
    }

    /// Coordinators owned by this session.
    #[must_use]
    pub const fn coordinators(&self) -> &CoordinatorSet {
        &self.coordinators
    }

    fn bridge_for(&self, class: &EventClass) -> Option<Arc<NetworkBridge>> {
        self.bridges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .map(Arc::clone)
    }

    // -- Outbound ---------------------------------------------------------

    /// Sends a chat line to every peer. Returns the number of peers.
    pub fn send_chat(&self, text: &str) -> usize {
        self.write(MessageKind::Chat, text)
    }

    /// Wraps `body` in a new envelope and writes it to every peer.
    ///
    /// Nothing is written while sending is disabled, without peers, or from
    /// inside the dispatch of an inbound message. Returns the number of
    /// peers the line was queued on.
    pub fn write(&self, kind: MessageKind, body: &str) -> usize {
        if !self.ok_to_send() {
            tracing::trace!(%kind, "sending disabled");
            return 0;
        }
        if inbound::active() {
            tracing::trace!(%kind, "suppressing write during inbound dispatch");
            return 0;
        }
        if !self.server.has_clients() {
            return 0;
        }
        let envelope = self.envelope(kind, body);
        self.server.write(&envelope.encode())
    }

    pub(crate) fn forward_local_event(&self, event: &Event) {
        match serde_json::to_string(&EventRecord::from(event)) {
            Ok(body) => {
                let peers = self.write(MessageKind::Event, &body);
                tracing::trace!(class = %event.class(), command = event.command(), peers, "forwarded event");
            }
            Err(err) => {
                tracing::warn!(class = %event.class(), error = %err, "event payload not serializable");
            }
        }
    }

    /// Builds an envelope with a fresh ID and marks the ID as seen.
    fn envelope(&self, kind: MessageKind, body: &str) -> Envelope {
        let id = format!(
            "{}_{}",
            self.session_id.simple(),
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        self.lock_seen().check_and_insert(&id);
        Envelope::new(id, kind, &self.user_name, body)
    }

    fn lock_seen(&self) -> MutexGuard<'_, SeenMessages> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Inbound ----------------------------------------------------------

    fn handle_line(&self, connection: &Arc<Connection>, line: &str) -> Relay {
        let envelope = match Envelope::parse(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(conn = %connection.id(), error = %err, "dropping malformed line");
                return Relay::Drop;
            }
        };
        // Lines from unjoined peers are not recorded as seen, so a copy
        // relayed by a joined peer still counts.
        if envelope.kind != MessageKind::NewUser && !connection.is_valid() {
            tracing::debug!(conn = %connection.id(), kind = %envelope.kind, "ignoring message from unjoined peer");
            return Relay::Drop;
        }
        if self.lock_seen().check_and_insert(&envelope.id) {
            tracing::trace!(conn = %connection.id(), id = %envelope.id, "duplicate message");
            return Relay::Drop;
        }
        if !self.ok_to_receive() && envelope.kind != MessageKind::Chat {
            tracing::trace!(conn = %connection.id(), kind = %envelope.kind, "receiving disabled");
            return Relay::Drop;
        }

        let _guard = InboundGuard::enter();
        match envelope.kind {
            MessageKind::NewUser => self.admit(connection, &envelope),
            MessageKind::AckNewUser => self.acknowledged(connection, &envelope),
            MessageKind::Close => {
                tracing::info!(conn = %connection.id(), user = %envelope.user, "peer requested close");
                connection.close();
            }
            MessageKind::Chat => {
                self.notices.publish(SessionNotice::Chat {
                    from: envelope.user.clone(),
                    text: envelope.body.clone(),
                    timestamp: Utc::now(),
                });
            }
            MessageKind::Event => self.apply_remote_event(connection, &envelope),
        }

        if envelope.kind.should_relay() && self.ok_to_relay() {
            Relay::Broadcast
        } else {
            Relay::Drop
        }
    }

    fn admit(&self, connection: &Arc<Connection>, envelope: &Envelope) {
        if !self.accept_all() {
            let refusal = self.envelope(MessageKind::AckNewUser, ACK_NO);
            if let Err(err) = connection.send(refusal.encode()) {
                tracing::debug!(conn = %connection.id(), error = %err, "refusal not sent");
            }
            tracing::info!(conn = %connection.id(), user = %envelope.user, "refused peer");
            self.notices.publish(SessionNotice::ConnectionRejected {
                connection: connection.id(),
                timestamp: Utc::now(),
            });
            connection.close();
            return;
        }

        connection.set_valid(true);
        self.name_peer(connection, &envelope.user);
        let ack = self.envelope(MessageKind::AckNewUser, ACK_OK);
        if let Err(err) = connection.send(ack.encode()) {
            tracing::warn!(conn = %connection.id(), error = %err, "ack not sent");
        }
    }

    fn acknowledged(&self, connection: &Arc<Connection>, envelope: &Envelope) {
        if envelope.body == ACK_OK {
            self.name_peer(connection, &envelope.user);
        } else {
            tracing::info!(conn = %connection.id(), user = %envelope.user, "peer refused us");
            self.notices.publish(SessionNotice::ConnectionRejected {
                connection: connection.id(),
                timestamp: Utc::now(),
            });
            connection.close();
        }
    }

    fn name_peer(&self, connection: &Arc<Connection>, name: &str) {
        connection.set_name(name);
        tracing::info!(conn = %connection.id(), user = %name, "peer joined");
        self.notices.publish(SessionNotice::PeerNamed {
            connection: connection.id(),
            name: name.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn apply_remote_event(&self, connection: &Arc<Connection>, envelope: &Envelope) {
        let record: EventRecord = match serde_json::from_str(&envelope.body) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(conn = %connection.id(), error = %err, "malformed event body");
                return;
            }
        };
        let Some(bridge) = self.bridge_for(&record.class) else {
            tracing::debug!(class = %record.class, "no coordinator for remote event");
            return;
        };
        let delivered = bridge.source().emit(record.command, record.payload);
        tracing::trace!(class = %record.class, delivered, "applied remote event");
    }

    // -- Observation ------------------------------------------------------

    /// Subscribes to lifecycle and chat notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Snapshot of the live connections.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.server.connections().iter().map(|c| c.info()).collect()
    }

    /// Server statistics.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        self.server.stats()
    }

    /// The underlying relay server.
    #[must_use]
    pub const fn server(&self) -> &Server {
        &self.server
    }

    /// Name announced to peers.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Identifier prefixed to every outgoing message ID.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    // -- Policy -----------------------------------------------------------

    /// Whether joining peers are admitted.
    #[must_use]
    pub fn accept_all(&self) -> bool {
        self.accept_all.load(Ordering::Relaxed)
    }

    /// Sets whether joining peers are admitted.
    pub fn set_accept_all(&self, accept: bool) {
        self.accept_all.store(accept, Ordering::Relaxed);
    }

    /// Whether local changes are written to the network.
    #[must_use]
    pub fn ok_to_send(&self) -> bool {
        self.ok_to_send.load(Ordering::Relaxed)
    }

    /// Sets whether local changes are written to the network.
    pub fn set_ok_to_send(&self, ok: bool) {
        self.ok_to_send.store(ok, Ordering::Relaxed);
    }

    /// Whether remote changes other than chat are applied.
    #[must_use]
    pub fn ok_to_receive(&self) -> bool {
        self.ok_to_receive.load(Ordering::Relaxed)
    }

    /// Sets whether remote changes other than chat are applied.
    pub fn set_ok_to_receive(&self, ok: bool) {
        self.ok_to_receive.store(ok, Ordering::Relaxed);
    }

    /// Whether chat and events are forwarded to the other peers.
    #[must_use]
    pub fn ok_to_relay(&self) -> bool {
        self.ok_to_relay.load(Ordering::Relaxed)
    }

    /// Sets whether chat and events are forwarded to the other peers.
    pub fn set_ok_to_relay(&self, ok: bool) {
        self.ok_to_relay.store(ok, Ordering::Relaxed);
    }
}
