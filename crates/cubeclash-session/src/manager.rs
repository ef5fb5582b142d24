//! The session manager: owns the transport binding and the connection
//! registry for one process.
//!
//! # Concurrency note
//!
//! `SessionManager` is not thread-safe and doesn't need to be. It is owned
//! by the single processing task. The transport's I/O tasks only push
//! [`TransportEvent`]s into a queue; they are turned into
//! [`SessionEvent`]s here, on the owner's task, by [`SessionManager::next_event`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddrV4;

use cubeclash_protocol::{Codec, ConnectionId, JsonCodec, Recipient, WireMessage};
use cubeclash_transport::{EventReceiver, LinkId, TransportBinding, TransportEvent, event_queue};

use crate::{
    Connection, LocalEndpoint, NetworkError, SessionConfig, SessionEvent, SessionRole,
    parse_address,
};

/// Handshake progress of one transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    /// Link is up, waiting for `ConnectRequest` (host) or `ConnectAck` (client).
    Handshaking,
    /// Link carries this connection.
    Established(ConnectionId),
}

/// Manages one host or client session.
///
/// ## Lifecycle
///
/// ```text
///            start_host()                       shutdown()
///   idle ──────────────────→ hosting ────────────────────→ idle
///     │                                                      ↑
///     │      start_client()             ConnectAck           │
///     └──────────────────→ connecting ───────────→ joined ───┘
/// ```
///
/// The host is always [`ConnectionId::SERVER`]. It hands out ids from 1 to
/// joining clients and accepts at most one client at a time.
pub struct SessionManager<B, C = JsonCodec> {
    binding: B,
    codec: C,
    config: SessionConfig,

    role: Option<SessionRole>,
    local: Option<ConnectionId>,
    inbound: Option<EventReceiver>,

    links: HashMap<LinkId, LinkState>,
    routes: HashMap<ConnectionId, LinkId>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection: u64,
    refusal: Option<String>,

    pending: VecDeque<SessionEvent>,
}

impl<B: TransportBinding> SessionManager<B, JsonCodec> {
    /// Creates an idle session manager using the JSON codec.
    pub fn new(binding: B, config: SessionConfig) -> Self {
        Self::with_codec(binding, JsonCodec, config)
    }
}

impl<B: TransportBinding, C: Codec> SessionManager<B, C> {
    pub fn with_codec(binding: B, codec: C, config: SessionConfig) -> Self {
        Self {
            binding,
            codec,
            config,
            role: None,
            local: None,
            inbound: None,
            links: HashMap::new(),
            routes: HashMap::new(),
            connections: BTreeMap::new(),
            next_connection: 1,
            refusal: None,
            pending: VecDeque::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Start / stop
    // -----------------------------------------------------------------------

    /// Opens the listening transport and becomes the authority.
    ///
    /// Queues [`SessionEvent::ServerStarted`] followed by the local
    /// [`SessionEvent::ConnectionEstablished`].
    ///
    /// # Errors
    /// - [`NetworkError::AlreadyActive`] if a session is running
    /// - [`NetworkError::BindError`] if the port is unavailable
    pub async fn start_host(&mut self) -> Result<LocalEndpoint, NetworkError> {
        if self.role.is_some() {
            return Err(NetworkError::AlreadyActive);
        }

        let port = self.config.port;
        let (tx, rx) = event_queue();
        let bound = self
            .binding
            .listen(port, tx)
            .await
            .map_err(|source| NetworkError::BindError { port, source })?;

        let endpoint = LocalEndpoint::on_lan(bound.port());
        self.begin(SessionRole::Host, rx);
        self.local = Some(ConnectionId::SERVER);
        self.connections.insert(
            ConnectionId::SERVER,
            Connection {
                id: ConnectionId::SERVER,
                role: SessionRole::Host,
                is_local: true,
            },
        );

        tracing::info!(%endpoint, "hosting session");
        self.pending.push_back(SessionEvent::ServerStarted(endpoint));
        self.pending.push_back(SessionEvent::ConnectionEstablished {
            connection: ConnectionId::SERVER,
            is_local: true,
        });
        Ok(endpoint)
    }

    /// Validates `address` and starts connecting to the host on the
    /// configured port.
    ///
    /// Returns once the attempt is underway. The local
    /// [`SessionEvent::ConnectionEstablished`] follows when the host has
    /// acknowledged us; timing out is the caller's decision.
    ///
    /// # Errors
    /// - [`NetworkError::InvalidAddress`] before any I/O
    /// - [`NetworkError::AlreadyActive`] if a session is running
    /// - [`NetworkError::ConnectError`] if the binding can't start
    pub async fn start_client(&mut self, address: &str) -> Result<(), NetworkError> {
        let ip = parse_address(address)?;
        if self.role.is_some() {
            return Err(NetworkError::AlreadyActive);
        }

        let addr = SocketAddrV4::new(ip, self.config.port);
        let (tx, rx) = event_queue();
        self.binding
            .connect(addr, tx)
            .await
            .map_err(|source| NetworkError::ConnectError { addr, source })?;

        self.begin(SessionRole::Client, rx);
        tracing::info!(%addr, "joining session");
        Ok(())
    }

    /// Closes the transport and forgets every connection.
    ///
    /// Idempotent: calling it on an idle manager does nothing. A host queues
    /// [`SessionEvent::ServerStopped`].
    pub async fn shutdown(&mut self) {
        let Some(role) = self.role.take() else {
            return;
        };

        let goodbye = WireMessage::Disconnect {
            reason: "session closed".to_owned(),
        };
        if let Ok(data) = self.codec.encode(&goodbye) {
            for link in self.routes.values() {
                if let Err(e) = self.binding.send(*link, data.clone()) {
                    tracing::debug!(%link, error = %e, "goodbye send failed");
                }
            }
        }
        self.binding.close().await;

        self.inbound = None;
        self.local = None;
        self.links.clear();
        self.routes.clear();
        self.connections.clear();
        self.refusal = None;
        self.pending.clear();

        tracing::info!(%role, "session shut down");
        if role == SessionRole::Host {
            self.pending.push_back(SessionEvent::ServerStopped);
        }
    }

    fn begin(&mut self, role: SessionRole, inbound: EventReceiver) {
        self.role = Some(role);
        self.inbound = Some(inbound);
        self.pending.clear();
        self.refusal = None;
        self.next_connection = 1;
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Waits for the next session event.
    ///
    /// Cancel safe. Pends forever while idle with nothing queued, so it can
    /// sit in a `tokio::select!` loop unconditionally.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            let received = match self.inbound.as_mut() {
                Some(rx) => rx.recv().await,
                None => return std::future::pending().await,
            };
            match received {
                Some(event) => self.handle_transport_event(event),
                None => self.inbound = None,
            }
        }
    }

    /// Returns a queued event without waiting.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let event = self.inbound.as_mut()?.try_recv().ok()?;
            self.handle_transport_event(event);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { link, peer } => {
                tracing::debug!(%link, ?peer, "link up");
                self.links.insert(link, LinkState::Handshaking);
                if self.role == Some(SessionRole::Client) {
                    self.routes.insert(ConnectionId::SERVER, link);
                    let request = WireMessage::ConnectRequest {
                        version: self.config.protocol_version,
                    };
                    self.send_on_link(link, &request);
                }
            }
            TransportEvent::Message { link, data } => {
                let message: WireMessage = match self.codec.decode(&data) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(%link, error = %e, "dropping undecodable message");
                        return;
                    }
                };
                match self.links.get(&link).copied() {
                    Some(LinkState::Handshaking) => self.handshake(link, message),
                    Some(LinkState::Established(from)) => {
                        if let WireMessage::Disconnect { reason } = &message {
                            tracing::info!(connection = %from, %reason, "peer is leaving");
                        }
                        self.pending.push_back(SessionEvent::Message { from, message });
                    }
                    None => tracing::debug!(%link, "message on unknown link"),
                }
            }
            TransportEvent::Disconnected { link } => self.link_lost(link),
        }
    }

    fn handshake(&mut self, link: LinkId, message: WireMessage) {
        match (self.role, message) {
            (Some(SessionRole::Host), WireMessage::ConnectRequest { version }) => {
                if version != self.config.protocol_version {
                    self.refuse(link, format!("protocol version {version} is not supported"));
                    return;
                }
                let full = self.connections.values().any(|c| !c.is_local);
                if full {
                    self.refuse(link, "match is full".to_owned());
                    return;
                }

                let id = ConnectionId(self.next_connection);
                self.next_connection += 1;
                self.links.insert(link, LinkState::Established(id));
                self.routes.insert(id, link);
                self.connections.insert(
                    id,
                    Connection {
                        id,
                        role: SessionRole::Client,
                        is_local: false,
                    },
                );
                self.send_on_link(link, &WireMessage::ConnectAck { connection_id: id });

                tracing::info!(connection = %id, %link, "client joined");
                self.pending.push_back(SessionEvent::ConnectionEstablished {
                    connection: id,
                    is_local: false,
                });
            }
            (Some(SessionRole::Client), WireMessage::ConnectAck { connection_id }) => {
                self.links
                    .insert(link, LinkState::Established(ConnectionId::SERVER));
                self.local = Some(connection_id);
                self.connections.insert(
                    ConnectionId::SERVER,
                    Connection {
                        id: ConnectionId::SERVER,
                        role: SessionRole::Host,
                        is_local: false,
                    },
                );
                self.connections.insert(
                    connection_id,
                    Connection {
                        id: connection_id,
                        role: SessionRole::Client,
                        is_local: true,
                    },
                );

                tracing::info!(connection = %connection_id, "joined host");
                self.pending.push_back(SessionEvent::ConnectionEstablished {
                    connection: connection_id,
                    is_local: true,
                });
            }
            (Some(SessionRole::Client), WireMessage::Disconnect { reason }) => {
                tracing::warn!(%reason, "host refused connection");
                self.refusal = Some(reason);
            }
            (_, other) => {
                tracing::debug!(%link, message = ?other, "unexpected message during handshake");
            }
        }
    }

    fn refuse(&mut self, link: LinkId, reason: String) {
        tracing::warn!(%link, %reason, "refusing client");
        self.send_on_link(link, &WireMessage::Disconnect { reason });
        self.links.remove(&link);
        self.binding.close_link(link);
    }

    fn link_lost(&mut self, link: LinkId) {
        let Some(state) = self.links.remove(&link) else {
            return;
        };

        match (self.role, state) {
            (Some(SessionRole::Host), LinkState::Established(id)) => {
                self.routes.remove(&id);
                self.connections.remove(&id);
                tracing::info!(connection = %id, "client left");
                self.pending.push_back(SessionEvent::ConnectionLost {
                    connection: id,
                    is_local: false,
                });
            }
            (Some(SessionRole::Client), LinkState::Established(_)) => {
                self.routes.clear();
                self.connections.clear();
                if let Some(local) = self.local.take() {
                    tracing::info!(connection = %local, "lost connection to host");
                    self.pending.push_back(SessionEvent::ConnectionLost {
                        connection: local,
                        is_local: true,
                    });
                }
            }
            (Some(SessionRole::Client), LinkState::Handshaking) => {
                self.routes.clear();
                let reason = self
                    .refusal
                    .take()
                    .unwrap_or_else(|| "host closed the connection".to_owned());
                self.pending
                    .push_back(SessionEvent::ConnectionRefused { reason });
            }
            _ => tracing::debug!(%link, "link closed during handshake"),
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends `message` to one established connection.
    ///
    /// # Errors
    /// [`NetworkError::UnknownConnection`] if `to` is not connected, or the
    /// codec/transport error.
    pub fn send(&self, to: ConnectionId, message: &WireMessage) -> Result<(), NetworkError> {
        let link = *self
            .routes
            .get(&to)
            .ok_or(NetworkError::UnknownConnection(to))?;
        let data = self.codec.encode(message)?;
        self.binding.send(link, data)?;
        Ok(())
    }

    /// Sends `message` to every remote connection `recipient` covers.
    /// Never delivers to ourselves. Returns how many connections it was
    /// handed to.
    pub fn send_to(&self, recipient: Recipient, message: &WireMessage) -> Result<usize, NetworkError> {
        let data = self.codec.encode(message)?;
        let mut delivered = 0;
        for (&connection, &link) in &self.routes {
            if !recipient.includes(connection) || Some(connection) == self.local {
                continue;
            }
            match self.binding.send(link, data.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(%connection, error = %e, "send failed"),
            }
        }
        Ok(delivered)
    }

    fn send_on_link(&self, link: LinkId, message: &WireMessage) {
        let result = self
            .codec
            .encode(message)
            .map_err(NetworkError::from)
            .and_then(|data| Ok(self.binding.send(link, data)?));
        if let Err(e) = result {
            tracing::debug!(%link, error = %e, "handshake send failed");
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// This process's role, or `None` while idle.
    pub fn role(&self) -> Option<SessionRole> {
        self.role
    }

    pub fn is_active(&self) -> bool {
        self.role.is_some()
    }

    /// Our own connection id once established.
    pub fn local_connection(&self) -> Option<ConnectionId> {
        self.local
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// All known connections, ours included, ordered by id.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Established connections other than our own.
    pub fn remote_connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections
            .values()
            .filter(|c| !c.is_local)
            .map(|c| c.id)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }
}
