use std::{
    any::Any,
    mem,
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use log::{debug, info, trace, warn};

use weft_shared::{
    handover_instances, BitStream, Channel, CodecRegistry, ConnectionError, ConnectionHandle,
    ConnectionState, Destination, EntityHost, InternalMessage, Link, MessageFlags, NetworkClock,
    NetworkMessage, PeerId, ReplicationReceiver, Rpc, SecurityFactory, Selector, SpawnInfo,
    TickPool, Timer, Transport, TransportEvent, ViewId,
};

use crate::{
    events::{DirectoryReply, Events},
    ClientConfig, ClientError,
};

/// What the client asks for when it connects
#[derive(Clone, Debug)]
struct ConnectAttempt {
    address: SocketAddr,
    password: String,
    handover: Option<String>,
    login: BitStream,
}

/// Client can connect to a Server, send RPCs, and apply the state of the
/// views the Server replicates to it
pub struct Client {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    security: Option<Box<dyn SecurityFactory>>,
    started: bool,
    clock: NetworkClock,
    pool: TickPool,
    registry: CodecRegistry,
    // Connection
    state: ConnectionState,
    attempt: Option<ConnectAttempt>,
    handle: Option<ConnectionHandle>,
    link: Option<Link>,
    peer: PeerId,
    redirecting: bool,
    connect_timer: Option<Timer>,
    security_timer: Option<Timer>,
    disconnect_deadline: Option<Instant>,
    // Replication
    receiver: ReplicationReceiver,
    next_request_id: u32,
    // Events
    events: Events,
}

impl Client {
    /// Create a new Client
    pub fn new(config: ClientConfig, transport: Box<dyn Transport>, now: Instant) -> Self {
        let pool = TickPool::new(config.send_pool_size);
        Self {
            config,
            transport,
            security: None,
            started: false,
            clock: NetworkClock::new(now),
            pool,
            registry: CodecRegistry::new(),
            state: ConnectionState::Disconnected,
            attempt: None,
            handle: None,
            link: None,
            peer: PeerId::UNASSIGNED,
            redirecting: false,
            connect_timer: None,
            security_timer: None,
            disconnect_deadline: None,
            receiver: ReplicationReceiver::new(),
            next_request_id: 0,
            events: Events::new(),
        }
    }

    /// Negotiate encrypted sessions with this factory when the config
    /// requires security
    pub fn set_security(&mut self, factory: Box<dyn SecurityFactory>) {
        self.security = Some(factory);
    }

    /// Codecs used by [`Client::send_typed_rpc`] and for reading typed
    /// arguments of received calls
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CodecRegistry {
        &mut self.registry
    }

    /// Connect to the given server address. `login` is handed to the
    /// server's approval logic verbatim.
    pub fn connect(
        &mut self,
        address: SocketAddr,
        password: &str,
        login: BitStream,
        now: Instant,
    ) -> Result<(), ClientError> {
        self.begin_connect(
            ConnectAttempt {
                address,
                password: password.to_string(),
                handover: None,
                login,
            },
            now,
        )
    }

    /// Connect using a handover session token issued by the server
    pub fn connect_with_handover(
        &mut self,
        address: SocketAddr,
        token: &str,
        login: BitStream,
        now: Instant,
    ) -> Result<(), ClientError> {
        self.begin_connect(
            ConnectAttempt {
                address,
                password: String::new(),
                handover: Some(token.to_string()),
                login,
            },
            now,
        )
    }

    /// Leave the server. Cancels a pending connect attempt silently;
    /// calling it while already disconnected does nothing.
    pub fn disconnect(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {}
            ConnectionState::Connecting => {
                info!("connect attempt cancelled");
                self.cleanup();
            }
            ConnectionState::Connected => {
                if let Err(error) = self.send_internal(InternalMessage::Disconnect) {
                    warn!("could not notify the server of the disconnect: {}", error);
                }
                let timeout = self.config.connection.disconnect_timeout;
                if timeout.is_zero() {
                    self.finish_disconnect();
                } else {
                    self.state = ConnectionState::Disconnecting;
                    self.disconnect_deadline = Some(now + timeout);
                }
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Identity assigned by the server, once connected
    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer.is_assigned().then_some(self.peer)
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.attempt.as_ref().map(|attempt| attempt.address)
    }

    pub fn is_secure(&self) -> bool {
        self.link.as_ref().is_some_and(Link::is_secure)
    }

    /// Milliseconds on the server's clock
    pub fn network_time_ms(&self, now: Instant) -> u64 {
        self.clock.network_ms(now)
    }

    /// Must be called regularly, maintains the connection to and receives
    /// messages from the Server. Replicated views are created, updated and
    /// destroyed through `host`.
    pub fn receive<H: EntityHost + ?Sized>(&mut self, host: &mut H, now: Instant) -> Events {
        // buffers handed out last tick may be reused from here on
        self.pool.reset();

        while let Some(event) = self.transport.read_message() {
            match event {
                TransportEvent::Connected {
                    handle, address, ..
                } => {
                    if Some(handle) == self.handle
                        && self.state == ConnectionState::Connecting
                        && self.link.is_none()
                    {
                        self.on_transport_connected(handle, address, now);
                    }
                }
                TransportEvent::Disconnected { handle } => {
                    if Some(handle) != self.handle {
                        continue;
                    }
                    // the transport already closed it
                    self.handle = None;
                    match self.state {
                        ConnectionState::Connecting => {
                            self.fail(ConnectionError::ConnectionRefused)
                        }
                        ConnectionState::Connected | ConnectionState::Disconnecting => {
                            info!("server closed the connection");
                            self.finish_disconnect();
                        }
                        ConnectionState::Disconnected => {}
                    }
                }
                TransportEvent::Data {
                    handle,
                    bytes,
                    channel,
                } => {
                    if Some(handle) == self.handle {
                        self.on_data(host, &bytes, channel, now);
                    }
                }
            }
        }

        self.maintain(now);

        // return all received messages and reset the buffer
        mem::replace(&mut self.events, Events::new())
    }

    /// Call a named RPC on `view`. The server relays it to `destination`.
    pub fn send_rpc(
        &mut self,
        name: &str,
        view: ViewId,
        destination: Destination,
        flags: MessageFlags,
        args: BitStream,
        now: Instant,
    ) -> Result<(), ClientError> {
        if !self.state.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let Some(link) = self.link.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        if flags.is_encrypted() && !link.is_secure() {
            return Err(ClientError::SecurityUnavailable);
        }
        let message = NetworkMessage::named(name, view, destination, flags, args)
            .with_timestamp(self.clock.network_ms(now));
        trace!("sending {} on {}", name, view);
        link.send(&mut *self.transport, &mut self.pool, &message)?;
        Ok(())
    }

    /// Call a named RPC whose arguments are written with their type tags
    pub fn send_typed_rpc(
        &mut self,
        name: &str,
        view: ViewId,
        destination: Destination,
        flags: MessageFlags,
        args: &[&dyn Any],
        now: Instant,
    ) -> Result<(), ClientError> {
        let mut stream = BitStream::new();
        self.registry.write_tagged_list(&mut stream, args)?;
        self.send_rpc(name, view, destination, flags | MessageFlags::TYPED, stream, now)
    }

    /// Ask the server for a handover session. The answer arrives as a
    /// `HandoverTokenEvent` carrying the returned request id.
    pub fn request_handover(&mut self, instances: BitStream) -> Result<u32, ClientError> {
        if !self.state.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.send_internal(InternalMessage::HandoverRequest {
            request_id,
            instances,
        })?;
        Ok(request_id)
    }

    /// Ask for a handover session carrying the handover payload of `views`
    pub fn request_view_handover<H: EntityHost + ?Sized>(
        &mut self,
        host: &mut H,
        views: &[ViewId],
    ) -> Result<u32, ClientError> {
        let instances = handover_instances::write_instances(host, views);
        self.request_handover(instances)
    }

    pub(crate) fn send_internal(&mut self, message: InternalMessage) -> Result<(), ClientError> {
        let Some(link) = self.link.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        let message = message.to_message(Destination::ToServer, MessageFlags::RELIABLE);
        link.send(&mut *self.transport, &mut self.pool, &message)?;
        Ok(())
    }

    // Private: lifecycle

    fn begin_connect(&mut self, attempt: ConnectAttempt, now: Instant) -> Result<(), ClientError> {
        validate_address(attempt.address)?;
        if !self.state.is_disconnected() {
            return Err(ClientError::AlreadyConnected);
        }
        if self.config.require_security && self.security.is_none() {
            return Err(ClientError::SecurityUnavailable);
        }
        self.redirecting = false;
        self.open_connection(attempt, now)
    }

    fn open_connection(
        &mut self,
        attempt: ConnectAttempt,
        now: Instant,
    ) -> Result<(), ClientError> {
        if !self.started {
            self.transport.start(None)?;
            self.started = true;
        }
        let handle = self.transport.connect(attempt.address, &[])?;
        info!("connecting to {}", attempt.address);

        self.handle = Some(handle);
        self.link = None;
        self.state = ConnectionState::Connecting;
        self.connect_timer = Some(Timer::new(self.config.connection.connect_timeout, now));
        self.security_timer = None;
        self.attempt = Some(attempt);
        Ok(())
    }

    fn on_transport_connected(
        &mut self,
        handle: ConnectionHandle,
        address: SocketAddr,
        now: Instant,
    ) {
        let mut link = Link::new(handle, address, None);

        if !self.config.require_security {
            self.link = Some(link);
            self.send_connect_request();
            return;
        }

        let Some(factory) = self.security.as_ref() else {
            return self.fail(ConnectionError::SecurityRequired);
        };
        let mut session = factory.create();
        let request = InternalMessage::SecurityRequest {
            data: session.initiate(),
        }
        .to_message(Destination::ToServer, MessageFlags::RELIABLE);
        if let Err(error) = link.send(&mut *self.transport, &mut self.pool, &request) {
            warn!("could not send the security request: {}", error);
        }
        link.set_security(session);
        self.link = Some(link);
        self.security_timer = Some(Timer::new(self.config.connection.security_timeout, now));
        debug!("waiting for security with {}", address);
    }

    fn send_connect_request(&mut self) {
        let Some(attempt) = self.attempt.as_ref() else {
            return;
        };
        let request = InternalMessage::ConnectRequest {
            version: self.config.connection.protocol_version,
            password: attempt.password.clone(),
            handover: attempt.handover.clone(),
            login: attempt.login.clone(),
        };
        debug!("sending connect request to {}", attempt.address);
        if let Err(error) = self.send_internal(request) {
            warn!("could not send the connect request: {}", error);
        }
    }

    fn on_security_response(&mut self, response: &[u8]) {
        if self.state != ConnectionState::Connecting || self.security_timer.is_none() {
            warn!("unexpected security response, dropping");
            return;
        }
        let completed = self
            .link
            .as_mut()
            .and_then(Link::security_mut)
            .is_some_and(|security| security.complete(response));
        if !completed {
            return self.fail(ConnectionError::SecurityRequired);
        }
        self.security_timer = None;
        debug!("security enabled");
        self.send_connect_request();
    }

    fn on_connect_response(
        &mut self,
        peer: PeerId,
        server_time_ms: u64,
        approval: BitStream,
        now: Instant,
    ) {
        if self.state != ConnectionState::Connecting {
            warn!("unexpected connect response, dropping");
            return;
        }
        self.peer = peer;
        self.clock.sync_to(server_time_ms, now);
        self.state = ConnectionState::Connected;
        self.connect_timer = None;
        self.redirecting = false;
        info!("connected as {}", peer);
        self.events.push_connection(peer, approval);
    }

    /// Reconnect elsewhere, once. A non-empty password is a one-time
    /// session token redeemed by the new server.
    fn on_redirect(&mut self, address: &str, password: String, now: Instant) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return;
        }
        if self.redirecting {
            warn!("ignoring a second redirect to {}", address);
            return;
        }
        let target = match address.parse::<SocketAddr>() {
            Ok(target) if validate_address(target).is_ok() => target,
            _ => {
                warn!("ignoring redirect to invalid address {}", address);
                return;
            }
        };
        let Some(previous) = self.attempt.take() else {
            return;
        };

        info!("redirected to {}", target);
        if let Some(handle) = self.handle.take() {
            self.transport.disconnect(handle);
        }
        self.reset_session();

        let attempt = ConnectAttempt {
            address: target,
            password: String::new(),
            handover: (!password.is_empty()).then_some(password),
            login: previous.login,
        };
        match self.open_connection(attempt, now) {
            Ok(()) => {
                self.redirecting = true;
                self.events.push_redirect(target);
            }
            Err(error) => {
                warn!("redirect to {} failed: {}", target, error);
                self.fail(ConnectionError::ConnectionRefused);
            }
        }
    }

    fn maintain(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connecting => {
                if self
                    .security_timer
                    .as_ref()
                    .is_some_and(|timer| timer.ringing(now))
                {
                    return self.fail(ConnectionError::SecurityTimeout);
                }
                if self
                    .connect_timer
                    .as_ref()
                    .is_some_and(|timer| timer.ringing(now))
                {
                    self.fail(ConnectionError::ConnectionTimeout);
                }
            }
            ConnectionState::Disconnecting => {
                let drained = self
                    .handle
                    .map(|handle| self.transport.pending_outgoing(handle) == 0)
                    .unwrap_or(true);
                let expired = self
                    .disconnect_deadline
                    .is_some_and(|deadline| now >= deadline);
                if drained || expired {
                    self.finish_disconnect();
                }
            }
            ConnectionState::Connected | ConnectionState::Disconnected => {}
        }
    }

    fn fail(&mut self, error: ConnectionError) {
        warn!("connection failed: {}", error);
        self.cleanup();
        self.events.push_failure(error);
    }

    fn finish_disconnect(&mut self) {
        let address = self.server_address();
        self.cleanup();
        if let Some(address) = address {
            info!("disconnected from {}", address);
            self.events.push_disconnection(address);
        }
    }

    /// Return to Disconnected. Safe to call in any state.
    fn cleanup(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.transport.disconnect(handle);
        }
        self.reset_session();
        self.state = ConnectionState::Disconnected;
        self.attempt = None;
        self.redirecting = false;
        self.connect_timer = None;
        self.disconnect_deadline = None;
    }

    fn reset_session(&mut self) {
        self.link = None;
        self.peer = PeerId::UNASSIGNED;
        self.security_timer = None;
        self.clock.reset();
        self.receiver.clear();
    }

    // Private: incoming messages

    fn on_data<H: EntityHost + ?Sized>(
        &mut self,
        host: &mut H,
        bytes: &[u8],
        channel: Channel,
        now: Instant,
    ) {
        let now_ms = self.clock.network_ms(now);
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let message = match link.receive(bytes, now_ms, channel.is_reliable()) {
            Ok(message) => message,
            Err(error) => {
                warn!("dropping malformed message from the server: {}", error);
                link.count_dropped();
                return;
            }
        };
        if self.state == ConnectionState::Disconnecting {
            trace!("disconnecting, dropping incoming message");
            return;
        }
        self.on_message(host, message, false, now);
    }

    fn on_message<H: EntityHost + ?Sized>(
        &mut self,
        host: &mut H,
        message: NetworkMessage,
        replayed: bool,
        now: Instant,
    ) {
        if matches!(message.header.selector, Selector::Named { .. }) {
            if !self.state.is_connected() {
                warn!("dropping an RPC received before approval");
                return;
            }
            if let Some(rpc) = Rpc::from_message(message, PeerId::SERVER) {
                trace!("received {} from {}", rpc.name, rpc.sender);
                self.events.push_rpc(rpc);
            }
            return;
        }

        let sender = message.header.sender.unwrap_or(PeerId::SERVER);
        let timestamp_ms = message.header.timestamp_ms;
        let internal = match InternalMessage::from_message(&message) {
            Ok(internal) => internal,
            Err(error) => {
                warn!("dropping malformed message from the server: {}", error);
                return;
            }
        };

        match internal {
            InternalMessage::SecurityResponse { data } => self.on_security_response(&data),
            InternalMessage::ConnectResponse {
                peer,
                server_time_ms,
                approval,
            } => self.on_connect_response(peer, server_time_ms, approval, now),
            InternalMessage::ConnectDenied { error } => {
                if self.state == ConnectionState::Connecting {
                    self.fail(error);
                } else {
                    warn!("ignoring a denial while {:?}", self.state);
                }
            }
            InternalMessage::Redirect { address, password } => {
                self.on_redirect(&address, password, now)
            }
            InternalMessage::Disconnect => {
                if self.state.is_connected() {
                    info!("server ended the session");
                    self.finish_disconnect();
                }
            }
            other => {
                if !self.state.is_connected() {
                    warn!("{:?} received before approval, dropping", other.opcode());
                    return;
                }
                self.on_session_message(host, other, sender, timestamp_ms, replayed, now);
            }
        }
    }

    fn on_session_message<H: EntityHost + ?Sized>(
        &mut self,
        host: &mut H,
        internal: InternalMessage,
        sender: PeerId,
        timestamp_ms: Option<u64>,
        replayed: bool,
        now: Instant,
    ) {
        match internal {
            InternalMessage::Create {
                view,
                owner,
                group,
                prefab,
                data,
            } => {
                debug!("instantiating {} ({})", view, prefab);
                host.instantiate(SpawnInfo {
                    view,
                    owner,
                    group,
                    prefab,
                    data,
                });
                self.events.push_spawn(view);
            }
            InternalMessage::Destroy { view } => {
                host.destroy(view);
                self.receiver.forget_view(view);
                self.events.push_despawn(view);
            }
            InternalMessage::GroupChange { view, group } => {
                self.events.push_group_change(view, group);
            }
            InternalMessage::BufferedBatch { messages } => {
                if replayed {
                    warn!("nested buffered batch, dropping");
                    return;
                }
                debug!("replaying {} buffered messages", messages.len());
                let now_ms = self.clock.network_ms(now);
                for mut stream in messages {
                    match NetworkMessage::decode(&mut stream, now_ms, true) {
                        Ok(message) => self.on_message(host, message, true, now),
                        Err(error) => warn!("dropping malformed buffered message: {}", error),
                    }
                }
            }
            state @ (InternalMessage::StateSync { .. } | InternalMessage::StateDelta { .. }) => {
                if let Err(error) = self.receiver.receive(host, state, sender, timestamp_ms) {
                    debug!("state update dropped: {}", error);
                }
            }
            InternalMessage::HandoverResponse { request_id, token } => {
                self.events.push_handover_token(request_id, token);
            }
            InternalMessage::HostList { hosts } => {
                self.events.push_directory_reply(DirectoryReply::HostList(hosts));
            }
            InternalMessage::EndpointInfo { address } => {
                self.events.push_directory_reply(DirectoryReply::Endpoint(address));
            }
            other => {
                warn!("{:?} is not meant for clients, dropping", other.opcode());
            }
        }
    }
}

/// Unspecified, broadcast and port-zero addresses are refused
fn validate_address(address: SocketAddr) -> Result<(), ClientError> {
    let broadcast = match address.ip() {
        IpAddr::V4(ip) => ip.is_broadcast(),
        IpAddr::V6(_) => false,
    };
    if address.ip().is_unspecified() || broadcast || address.port() == 0 {
        return Err(ClientError::InvalidAddress { address });
    }
    Ok(())
}
