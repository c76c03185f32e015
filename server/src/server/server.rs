use std::{
    any::Any,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    mem,
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use log::{debug, info, trace, warn};

use weft_shared::{
    Audience, BitStream, Channel, CodecRegistry, ConnectionError, ConnectionHandle, Destination,
    EntityHost, GroupBuffers, GroupFlags, GroupId, IdentityError, IdentityPool, InternalMessage,
    Link, MessageFlags, MessageHeader, NetworkClock, NetworkMessage, PeerId, ReplicationScheduler,
    Rpc, SecurityFactory, Selector, StateSyncMode, TickPool, Transport, TransportError,
    TransportEvent, ViewId, VisibilityGroups,
};

use crate::{
    directory::DirectoryRegistry,
    events::{ApprovalRequest, Events, HandoverArrival},
    handover::HandoverSessions,
    peer::{Peer, PendingConnection, PendingStage},
    view::ViewRecord,
    ServerConfig, ServerError,
};

/// The authoritative end of a session: approves connect requests, relays
/// RPCs between peers, replicates views and replays buffered messages to
/// peers that join late
pub struct Server {
    config: ServerConfig,
    transport: Option<Box<dyn Transport>>,
    security: Option<Box<dyn SecurityFactory>>,
    clock: NetworkClock,
    pool: TickPool,
    registry: CodecRegistry,
    // Connections
    pending: HashMap<ConnectionHandle, PendingConnection>,
    peers: BTreeMap<PeerId, Peer>,
    handles: HashMap<ConnectionHandle, PeerId>,
    identities: IdentityPool,
    banned: HashSet<IpAddr>,
    // Views
    views: BTreeMap<ViewId, ViewRecord>,
    next_view: u32,
    scheduler: ReplicationScheduler,
    buffers: GroupBuffers,
    visibility: VisibilityGroups,
    // Services
    handovers: HandoverSessions,
    directory: DirectoryRegistry,
    // Events
    events: Events,
}

impl Server {
    /// Create a new Server
    pub fn new(config: ServerConfig, now: Instant) -> Self {
        let identities = IdentityPool::new(config.identity_recycle_delay);
        let scheduler = ReplicationScheduler::new(config.replication.clone(), now);
        let pool = TickPool::new(config.send_pool_size);
        let handovers = HandoverSessions::new(config.handover_lifetime);

        Self {
            config,
            transport: None,
            security: None,
            clock: NetworkClock::new(now),
            pool,
            registry: CodecRegistry::new(),
            pending: HashMap::new(),
            peers: BTreeMap::new(),
            handles: HashMap::new(),
            identities,
            banned: HashSet::new(),
            views: BTreeMap::new(),
            next_view: 1,
            scheduler,
            buffers: GroupBuffers::new(),
            visibility: VisibilityGroups::new(),
            handovers,
            directory: DirectoryRegistry::new(),
            events: Events::new(),
        }
    }

    /// Codecs used by [`Server::send_typed_rpc`] and for reading typed
    /// arguments of received calls
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CodecRegistry {
        &mut self.registry
    }

    /// Offer encrypted sessions to connecting clients
    pub fn set_security(&mut self, factory: Box<dyn SecurityFactory>) {
        self.security = Some(factory);
    }

    /// Listen at the given address
    pub fn listen(
        &mut self,
        mut transport: Box<dyn Transport>,
        address: SocketAddr,
    ) -> Result<(), ServerError> {
        transport.start(Some(address))?;
        info!("server listening on {}", address);
        self.transport = Some(transport);
        Ok(())
    }

    /// Returns whether or not the Server is listening for Clients
    pub fn is_listening(&self) -> bool {
        self.transport.is_some()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Milliseconds since the server started; clients adopt this clock
    pub fn network_time_ms(&self, now: Instant) -> u64 {
        self.clock.network_ms(now)
    }

    /// Must be called regularly, maintains connection to and receives messages
    /// from all Clients
    pub fn receive(&mut self, now: Instant) -> Events {
        // buffers handed out last tick may be reused from here on
        self.pool.reset();

        while let Some(event) = self
            .transport
            .as_deref_mut()
            .and_then(|transport| transport.read_message())
        {
            match event {
                TransportEvent::Connected {
                    handle, address, ..
                } => {
                    debug!("transport connection {:?} from {}", handle, address);
                    let link = Link::new(handle, address, None);
                    self.pending
                        .insert(handle, PendingConnection::new(link, now));
                }
                TransportEvent::Disconnected { handle } => {
                    if self.pending.remove(&handle).is_some() {
                        debug!("pending connection {:?} closed", handle);
                    } else if let Some(peer) = self.handles.get(&handle).copied() {
                        self.remove_peer(peer, now);
                    }
                }
                TransportEvent::Data {
                    handle,
                    bytes,
                    channel,
                } => {
                    if let Some(peer) = self.handles.get(&handle).copied() {
                        self.on_peer_data(peer, &bytes, channel, now);
                    } else if self.pending.contains_key(&handle) {
                        self.on_pending_data(handle, &bytes, channel, now);
                    } else {
                        trace!("dropping data from closed connection {:?}", handle);
                    }
                }
            }
        }

        self.maintain(now);

        // return all received messages and reset the buffer
        mem::replace(&mut self.events, Events::new())
    }

    // Connections

    /// Accepts a connect request that is awaiting approval. `approval` is
    /// echoed to the client at the end of the connect response.
    pub fn accept_connection(
        &mut self,
        handle: ConnectionHandle,
        approval: BitStream,
        now: Instant,
    ) -> Result<PeerId, ServerError> {
        let Some(pending) = self.pending.get_mut(&handle) else {
            return Err(ServerError::UnknownPending { handle });
        };
        let PendingStage::AwaitingApproval { login, handover } =
            mem::replace(&mut pending.stage, PendingStage::AwaitingRequest)
        else {
            return Err(ServerError::UnknownPending { handle });
        };
        self.admit(handle, login, handover, approval, now)
    }

    /// Rejects a connect request that is awaiting approval
    pub fn reject_connection(&mut self, handle: ConnectionHandle) -> Result<(), ServerError> {
        match self.pending.get(&handle) {
            Some(PendingConnection {
                stage: PendingStage::AwaitingApproval { .. },
                ..
            }) => {
                self.deny(handle, ConnectionError::ApprovalDenied);
                Ok(())
            }
            _ => Err(ServerError::UnknownPending { handle }),
        }
    }

    /// Disconnect a peer. With a non-zero disconnect timeout the connection
    /// stays open until the transport drains.
    pub fn kick(&mut self, peer: PeerId, now: Instant) -> Result<(), ServerError> {
        let Some(entry) = self.peers.get(&peer) else {
            return Err(ServerError::UnknownPeer { peer });
        };
        if !entry.is_reachable() {
            debug!("{} is already leaving", peer);
            return Ok(());
        }
        let message = InternalMessage::Disconnect
            .to_message(Destination::Target(peer), MessageFlags::RELIABLE);
        self.send_message(peer, &message);

        let timeout = self.config.connection.disconnect_timeout;
        if timeout.is_zero() {
            self.close_peer(peer, now);
        } else if let Some(entry) = self.peers.get_mut(&peer) {
            entry.begin_disconnect(now + timeout);
        }
        Ok(())
    }

    /// Tell a peer to reconnect to another server with a one-time password
    pub fn redirect(
        &mut self,
        peer: PeerId,
        address: SocketAddr,
        password: &str,
    ) -> Result<(), ServerError> {
        if !self.peers.contains_key(&peer) {
            return Err(ServerError::UnknownPeer { peer });
        }
        info!("redirecting {} to {}", peer, address);
        let message = InternalMessage::Redirect {
            address: address.to_string(),
            password: password.to_string(),
        }
        .to_message(Destination::Target(peer), MessageFlags::RELIABLE);
        self.send_message(peer, &message);
        Ok(())
    }

    /// Deny future connect requests from `address`
    pub fn ban(&mut self, address: IpAddr) {
        info!("banned {}", address);
        self.banned.insert(address);
    }

    pub fn unban(&mut self, address: IpAddr) -> bool {
        self.banned.remove(&address)
    }

    pub fn is_banned(&self, address: IpAddr) -> bool {
        self.banned.contains(&address)
    }

    /// Register a handover session locally. The returned token lets a
    /// player connect here, keeping `identity` when it is given.
    pub fn register_handover(
        &mut self,
        identity: Option<PeerId>,
        instances: BitStream,
        now: Instant,
    ) -> Result<String, ServerError> {
        Ok(self
            .handovers
            .register(PeerId::SERVER, identity, instances, now)?)
    }

    pub fn peer(&self, peer: PeerId) -> Option<&Peer> {
        self.peers.get(&peer)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Disconnect everyone and stop the transport
    pub fn shutdown(&mut self, now: Instant) {
        for peer in self.peer_ids() {
            let message = InternalMessage::Disconnect
                .to_message(Destination::Target(peer), MessageFlags::RELIABLE);
            self.send_message(peer, &message);
            self.close_peer(peer, now);
        }
        if let Some(mut transport) = self.transport.take() {
            for handle in self.pending.keys() {
                transport.disconnect(*handle);
            }
            transport.shutdown();
        }
        self.pending.clear();
        info!("server shut down");
    }

    // Views

    /// Create a replicated view and announce it to every peer that can see
    /// `group`. The creation is buffered for late joiners.
    pub fn instantiate(
        &mut self,
        owner: PeerId,
        group: GroupId,
        prefab: &str,
        data: BitStream,
    ) -> Result<ViewId, ServerError> {
        let mode = self.config.replication.default_mode;
        self.instantiate_with_mode(owner, group, prefab, data, mode)
    }

    pub fn instantiate_with_mode(
        &mut self,
        owner: PeerId,
        group: GroupId,
        prefab: &str,
        data: BitStream,
        mode: StateSyncMode,
    ) -> Result<ViewId, ServerError> {
        if self.transport.is_none() {
            return Err(ServerError::NotListening);
        }
        let view = self.allocate_view()?;
        let record = ViewRecord {
            owner,
            group,
            prefab: prefab.to_string(),
            data,
        };
        let envelope = create_envelope(view, &record);
        self.views.insert(view, record);
        self.scheduler.add_view_with_mode(view, owner, mode);
        self.buffers
            .store_create(group, view, PeerId::SERVER, envelope.clone());

        let recipients = self.visible_peers(group);
        self.send_envelope_to(&recipients, &envelope, true);
        debug!("instantiated {} in {:?} for {} peers", view, group, recipients.len());
        Ok(view)
    }

    /// Destroy a view everywhere and forget everything buffered for it
    pub fn destroy(&mut self, view: ViewId) -> Result<(), ServerError> {
        let record = self
            .views
            .remove(&view)
            .ok_or(ServerError::UnknownView { view })?;
        self.scheduler.remove_view(view);
        self.buffers.remove_view(view);
        self.visibility.forget_view(view);

        let recipients = self.visible_peers(record.group);
        let envelope = InternalMessage::Destroy { view }
            .to_message(Destination::Broadcast, MessageFlags::RELIABLE)
            .to_bytes();
        self.send_envelope_to(&recipients, &envelope, true);
        Ok(())
    }

    pub fn view(&self, view: ViewId) -> Option<&ViewRecord> {
        self.views.get(&view)
    }

    pub fn set_state_sync(&mut self, view: ViewId, mode: StateSyncMode) -> Result<(), ServerError> {
        if self.scheduler.set_mode(view, mode) {
            Ok(())
        } else {
            Err(ServerError::UnknownView { view })
        }
    }

    pub fn set_owner_state_differs(
        &mut self,
        view: ViewId,
        differs: bool,
    ) -> Result<(), ServerError> {
        if self.scheduler.set_owner_state_differs(view, differs) {
            Ok(())
        } else {
            Err(ServerError::UnknownView { view })
        }
    }

    /// Mirror `view` to a secondary authority
    pub fn add_cell_proxy(&mut self, view: ViewId, peer: PeerId) -> Result<(), ServerError> {
        if !self.peers.contains_key(&peer) {
            return Err(ServerError::UnknownPeer { peer });
        }
        if !self.scheduler.contains(view) {
            return Err(ServerError::UnknownView { view });
        }
        self.scheduler.add_cell_proxy(view, peer);
        Ok(())
    }

    /// Suppress (or resume) state updates and RPCs of `view` to `peer`
    pub fn set_culled(&mut self, view: ViewId, peer: PeerId, culled: bool) {
        self.visibility.set_culled(view, peer, culled);
        if !culled {
            self.scheduler.restart_streams(view);
        }
    }

    /// Serialize views and send state updates, if the send interval has
    /// elapsed
    pub fn send_all_updates<H: EntityHost + ?Sized>(&mut self, host: &mut H, now: Instant) {
        if self.transport.is_none() || !self.scheduler.should_send(now) {
            return;
        }
        let time_ms = self.clock.network_ms(now);
        for update in self.scheduler.collect(host, time_ms) {
            let view = update.view;
            let candidates = match &update.audience {
                Audience::Observers { except } => {
                    let group = self.view_group(view);
                    self.visible_peers(group)
                        .into_iter()
                        .filter(|peer| Some(*peer) != *except)
                        .collect()
                }
                Audience::Owner(owner) => vec![*owner],
                Audience::CellProxies(peers) => peers.clone(),
            };
            let recipients: Vec<PeerId> = candidates
                .into_iter()
                .filter(|peer| {
                    self.peers.get(peer).is_some_and(Peer::is_reachable)
                        && !self.visibility.is_culled(view, *peer)
                })
                .collect();

            let message = update.to_network_message();
            match recipients.as_slice() {
                [] => {}
                [peer] => self.send_message(*peer, &message),
                _ => self.send_envelope_to(&recipients, &message.to_bytes(), update.reliable),
            }
        }
    }

    // Messages

    /// Send a named RPC. Buffered calls are kept for peers that later gain
    /// sight of the view.
    pub fn send_rpc(
        &mut self,
        name: &str,
        view: ViewId,
        destination: Destination,
        flags: MessageFlags,
        args: BitStream,
        now: Instant,
    ) -> Result<(), ServerError> {
        if self.transport.is_none() {
            return Err(ServerError::NotListening);
        }
        let message = NetworkMessage::named(name, view, destination, flags, args)
            .with_timestamp(self.clock.network_ms(now));

        let recipients = match destination {
            Destination::ToServer => return Err(ServerError::InvalidDestination),
            Destination::Target(peer) if peer.is_server() => {
                return Err(ServerError::InvalidDestination)
            }
            Destination::Target(peer) => {
                if !self.peers.contains_key(&peer) {
                    return Err(ServerError::UnknownPeer { peer });
                }
                self.try_send_message(peer, &message)?;
                return Ok(());
            }
            Destination::Broadcast | Destination::BroadcastExcept(_) => {
                self.rpc_recipients(view, &destination, None)
            }
        };

        let envelope = message.to_bytes();
        if message.is_buffered() {
            let group = self.view_group(view);
            self.buffers
                .store_rpc(group, view, name, PeerId::SERVER, envelope.clone());
        }
        let recipients = self.secure_only(recipients, message.flags());
        self.send_envelope_to(&recipients, &envelope, message.flags().is_reliable());
        Ok(())
    }

    /// Send a named RPC whose arguments are written with their type tags
    pub fn send_typed_rpc(
        &mut self,
        name: &str,
        view: ViewId,
        destination: Destination,
        flags: MessageFlags,
        args: &[&dyn Any],
        now: Instant,
    ) -> Result<(), ServerError> {
        let mut stream = BitStream::new();
        self.registry.write_tagged_list(&mut stream, args)?;
        self.send_rpc(name, view, destination, flags | MessageFlags::TYPED, stream, now)
    }

    // Groups

    /// Change the flags of a group. Peers that gain sight receive the
    /// group's backlog in one batch; peers that lose it receive a destroy
    /// for each of its views.
    pub fn set_group_flags(&mut self, group: GroupId, flags: GroupFlags) {
        let before = self.visible_set(group);
        self.visibility.set_flags(group, flags);
        self.apply_visibility_change(group, before);
    }

    pub fn group_flags(&self, group: GroupId) -> GroupFlags {
        self.visibility.flags(group)
    }

    pub fn add_to_group(&mut self, peer: PeerId, group: GroupId) -> Result<(), ServerError> {
        if !self.peers.contains_key(&peer) {
            return Err(ServerError::UnknownPeer { peer });
        }
        let before = self.visible_set(group);
        self.visibility.add_member(group, peer);
        self.apply_visibility_change(group, before);
        Ok(())
    }

    pub fn remove_from_group(&mut self, peer: PeerId, group: GroupId) -> Result<(), ServerError> {
        if !self.peers.contains_key(&peer) {
            return Err(ServerError::UnknownPeer { peer });
        }
        let before = self.visible_set(group);
        self.visibility.remove_member(group, peer);
        self.apply_visibility_change(group, before);
        Ok(())
    }

    /// Move a view to another group. Peers that lose sight receive a
    /// destroy, peers that gain it receive the view's backlog, and peers
    /// that keep it are told about the change.
    pub fn set_view_group(&mut self, view: ViewId, group: GroupId) -> Result<(), ServerError> {
        let record = self
            .views
            .get_mut(&view)
            .ok_or(ServerError::UnknownView { view })?;
        let previous = record.group;
        if previous == group {
            return Ok(());
        }
        record.group = group;
        let envelope = create_envelope(view, record);

        let before = self.visible_set(previous);
        let after = self.visible_set(group);
        self.buffers.move_view(view, group);
        self.buffers.rewrite_create(view, envelope);

        for peer in before.difference(&after) {
            let message = InternalMessage::Destroy { view }
                .to_message(Destination::Target(*peer), MessageFlags::RELIABLE);
            self.send_message(*peer, &message);
        }
        let backlog: Vec<BitStream> = self
            .buffers
            .backlog_for_view(view)
            .into_iter()
            .map(|message| BitStream::from_bytes(&message.envelope))
            .collect();
        for peer in after.difference(&before) {
            self.send_batch(*peer, backlog.clone());
        }
        let change = InternalMessage::GroupChange { view, group }
            .to_message(Destination::Broadcast, MessageFlags::RELIABLE)
            .to_bytes();
        let kept: Vec<PeerId> = before.intersection(&after).copied().collect();
        self.send_envelope_to(&kept, &change, true);

        if after.difference(&before).next().is_some() {
            self.scheduler.restart_streams(view);
        }
        Ok(())
    }

    // Buffered message pruning

    /// Forget buffered RPCs of `view`, optionally only those named `name`
    pub fn remove_rpcs(&mut self, view: ViewId, name: Option<&str>) -> usize {
        self.buffers.remove_rpcs(view, name)
    }

    /// Forget every buffered message sent by `peer`
    pub fn remove_rpcs_from(&mut self, peer: PeerId) -> usize {
        self.buffers.remove_sender(peer)
    }

    /// Forget a group's whole backlog. Peers joining later won't hear of
    /// its views.
    pub fn remove_group_backlog(&mut self, group: GroupId) -> Vec<ViewId> {
        self.buffers.remove_group(group)
    }

    pub fn buffered_count(&self) -> usize {
        self.buffers.len()
    }

    // Private: connection handling

    fn on_pending_data(
        &mut self,
        handle: ConnectionHandle,
        bytes: &[u8],
        channel: Channel,
        now: Instant,
    ) {
        let now_ms = self.clock.network_ms(now);
        let Some(pending) = self.pending.get_mut(&handle) else {
            return;
        };
        let message = match pending.link.receive(bytes, now_ms, channel.is_reliable()) {
            Ok(message) => message,
            Err(error) => {
                warn!("dropping message from unapproved {}: {}", pending.link.address(), error);
                pending.link.count_dropped();
                return;
            }
        };
        let internal = match InternalMessage::from_message(&message) {
            Ok(internal) => internal,
            Err(error) => {
                warn!("dropping message from unapproved {}: {}", pending.link.address(), error);
                pending.link.count_dropped();
                return;
            }
        };

        match internal {
            InternalMessage::SecurityRequest { data } => self.on_security_request(handle, &data),
            InternalMessage::ConnectRequest {
                version,
                password,
                handover,
                login,
            } => self.on_connect_request(handle, version, &password, handover, login, now),
            InternalMessage::Disconnect => {
                self.pending.remove(&handle);
                debug!("connection {:?} gave up before approval", handle);
            }
            other => {
                warn!(
                    "{:?} is not allowed before approval, dropping",
                    other.opcode()
                );
                pending.link.count_dropped();
            }
        }
    }

    fn on_security_request(&mut self, handle: ConnectionHandle, request: &[u8]) {
        let Some(factory) = self.security.as_ref() else {
            warn!("connection {:?} asked for security but none is configured", handle);
            return;
        };
        let mut session = factory.create();
        let Some(response) = session.respond(request) else {
            warn!("connection {:?} sent an unusable security request", handle);
            self.deny(handle, ConnectionError::SecurityRequired);
            return;
        };

        // the answer goes out in the clear; everything after it is encrypted
        let message = InternalMessage::SecurityResponse { data: response }
            .to_message(Destination::Target(PeerId::UNASSIGNED), MessageFlags::RELIABLE);
        self.send_pending(handle, &message);
        if let Some(pending) = self.pending.get_mut(&handle) {
            pending.link.set_security(session);
            debug!("security enabled for {}", pending.link.address());
        }
    }

    fn on_connect_request(
        &mut self,
        handle: ConnectionHandle,
        version: u16,
        password: &str,
        handover: Option<String>,
        login: BitStream,
        now: Instant,
    ) {
        let awaiting_approval = self.awaiting_approval();
        let Some(pending) = self.pending.get(&handle) else {
            return;
        };
        if !matches!(pending.stage, PendingStage::AwaitingRequest) {
            warn!("duplicate connect request from {}", pending.link.address());
            return;
        }
        let address = pending.link.address();
        let secure = pending.link.is_secure();

        if version != self.config.connection.protocol_version {
            return self.deny(handle, ConnectionError::IncompatibleVersion);
        }
        if self.banned.contains(&address.ip()) {
            return self.deny(handle, ConnectionError::Banned);
        }
        if self.config.require_security && !secure {
            return self.deny(handle, ConnectionError::SecurityRequired);
        }
        if let Some(token) = &handover {
            if let Err(error) = self.handovers.validate(token, now) {
                warn!("{} presented a bad handover token: {}", address, error);
                return self.deny(handle, ConnectionError::InvalidHandover);
            }
        }
        let password_required = handover.is_none() && !self.config.password.is_empty();
        if password_required && password != self.config.password {
            return self.deny(handle, ConnectionError::InvalidPassword);
        }
        if self.peers.len() + awaiting_approval >= self.config.max_connections {
            return self.deny(handle, ConnectionError::TooManyPeers);
        }

        if self.config.require_approval {
            if let Some(pending) = self.pending.get_mut(&handle) {
                pending.stage = PendingStage::AwaitingApproval {
                    login: login.clone(),
                    handover,
                };
            }
            self.events.push_approval(ApprovalRequest {
                handle,
                address,
                login,
            });
        } else if let Err(error) = self.admit(handle, login, handover, BitStream::new(), now) {
            self.events.push_error(error);
        }
    }

    /// Assign an identity to an approved connection. A handover token is
    /// spent only once the identity is secured, so a denied arrival can
    /// retry with the same token.
    fn admit(
        &mut self,
        handle: ConnectionHandle,
        login: BitStream,
        handover: Option<String>,
        approval: BitStream,
        now: Instant,
    ) -> Result<PeerId, ServerError> {
        if !self.pending.contains_key(&handle) {
            return Err(ServerError::UnknownPending { handle });
        }
        let preferred = match handover.as_deref() {
            Some(token) => match self.handovers.validate(token, now) {
                Ok(session) => session.identity,
                Err(error) => {
                    self.deny(handle, ConnectionError::InvalidHandover);
                    return Err(error.into());
                }
            },
            None => None,
        };
        let identity = match preferred {
            Some(preferred) => self
                .identities
                .claim(preferred, now)
                .map(|_| preferred),
            None => self.identities.allocate(now),
        };
        let peer_id = match identity {
            Ok(peer_id) => peer_id,
            Err(error) => {
                let denial = match error {
                    IdentityError::Exhausted => ConnectionError::TooManyPeers,
                    _ => ConnectionError::DuplicateIdentity,
                };
                self.deny(handle, denial);
                return Err(error.into());
            }
        };
        let session = match handover.as_deref() {
            Some(token) => match self.handovers.redeem(token, now) {
                Ok(session) => Some(session),
                Err(error) => {
                    self.identities.release(peer_id, now);
                    self.deny(handle, ConnectionError::InvalidHandover);
                    return Err(error.into());
                }
            },
            None => None,
        };
        let Some(pending) = self.pending.remove(&handle) else {
            self.identities.release(peer_id, now);
            return Err(ServerError::UnknownPending { handle });
        };

        let address = pending.link.address();
        self.peers.insert(peer_id, Peer::new(peer_id, pending.link, login));
        self.handles.insert(handle, peer_id);

        let response = InternalMessage::ConnectResponse {
            peer: peer_id,
            server_time_ms: self.clock.network_ms(now),
            approval,
        }
        .to_message(Destination::Target(peer_id), MessageFlags::RELIABLE);
        self.send_message(peer_id, &response);
        info!("{} connected from {}", peer_id, address);
        self.events.push_connection(peer_id);

        if let Some(session) = session {
            self.events.push_handover(HandoverArrival {
                peer: peer_id,
                requested_by: session.requested_by,
                instances: session.instances,
            });
        }

        for group in self.visibility.auto_admit_groups() {
            self.visibility.add_member(group, peer_id);
        }
        let visible: Vec<GroupId> = self
            .buffers
            .groups()
            .into_iter()
            .filter(|group| self.visibility.can_see(*group, peer_id))
            .collect();
        self.flush_backlog(peer_id, &visible);

        // the newcomer has no baseline for compressed streams yet
        let seen: Vec<ViewId> = self
            .views
            .iter()
            .filter(|(_, record)| self.visibility.can_see(record.group, peer_id))
            .map(|(view, _)| *view)
            .collect();
        for view in seen {
            self.scheduler.restart_streams(view);
        }
        Ok(peer_id)
    }

    /// Send a denial, then close the transport connection
    fn deny(&mut self, handle: ConnectionHandle, error: ConnectionError) {
        let message = InternalMessage::ConnectDenied { error }
            .to_message(Destination::Target(PeerId::UNASSIGNED), MessageFlags::RELIABLE);
        self.send_pending(handle, &message);
        if let Some(pending) = self.pending.remove(&handle) {
            info!("denied {}: {}", pending.link.address(), error);
            self.events.push_denial(pending.link.address(), error);
        }
        if let Some(transport) = self.transport.as_deref_mut() {
            transport.disconnect(handle);
        }
    }

    fn awaiting_approval(&self) -> usize {
        self.pending
            .values()
            .filter(|pending| matches!(pending.stage, PendingStage::AwaitingApproval { .. }))
            .count()
    }

    /// Close the transport connection of a peer and forget it
    fn close_peer(&mut self, peer: PeerId, now: Instant) {
        let Some(handle) = self.peers.get(&peer).map(|entry| entry.link.handle()) else {
            return;
        };
        if let Some(transport) = self.transport.as_deref_mut() {
            transport.disconnect(handle);
        }
        self.remove_peer(peer, now);
    }

    fn remove_peer(&mut self, peer: PeerId, now: Instant) {
        let Some(entry) = self.peers.remove(&peer) else {
            return;
        };
        self.handles.remove(&entry.link.handle());
        self.identities.release(peer, now);
        self.visibility.remove_peer(peer);
        self.scheduler.forget_peer(peer);
        self.directory.unregister(peer);
        if self.config.prune_buffered_on_disconnect {
            self.buffers.remove_sender(peer);
        }
        info!("{} disconnected", peer);
        self.events.push_disconnection(peer, entry.address());
    }

    fn maintain(&mut self, now: Instant) {
        let due: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| {
                let pending_outgoing = self
                    .transport
                    .as_deref()
                    .map(|transport| transport.pending_outgoing(peer.link.handle()))
                    .unwrap_or(0);
                peer.disconnect_due(now, pending_outgoing)
            })
            .map(Peer::id)
            .collect();
        for peer in due {
            self.close_peer(peer, now);
        }

        let timeout = self.config.connection.connect_timeout;
        let stale: Vec<ConnectionHandle> = self
            .pending
            .iter()
            .filter(|(_, pending)| {
                matches!(pending.stage, PendingStage::AwaitingRequest)
                    && now.saturating_duration_since(pending.since) >= timeout
            })
            .map(|(handle, _)| *handle)
            .collect();
        for handle in stale {
            debug!("connection {:?} never sent a connect request", handle);
            self.pending.remove(&handle);
            if let Some(transport) = self.transport.as_deref_mut() {
                transport.disconnect(handle);
            }
        }

        self.handovers.expire(now);
    }

    // Private: traffic from approved peers

    fn on_peer_data(&mut self, peer_id: PeerId, bytes: &[u8], channel: Channel, now: Instant) {
        let now_ms = self.clock.network_ms(now);
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };
        let message = match peer.link.receive(bytes, now_ms, channel.is_reliable()) {
            Ok(message) => message,
            Err(error) => {
                warn!("dropping malformed message from {}: {}", peer_id, error);
                peer.link.count_dropped();
                return;
            }
        };
        if let Some(sender) = message.header.sender {
            if sender != peer_id {
                warn!("{} sent a message claiming to be from {}, dropping", peer_id, sender);
                peer.link.count_dropped();
                return;
            }
        }

        if matches!(message.header.selector, Selector::Named { .. }) {
            return self.on_peer_rpc(peer_id, message);
        }
        match InternalMessage::from_message(&message) {
            Ok(internal) => self.on_peer_internal(peer_id, internal, now),
            Err(error) => {
                warn!("dropping malformed message from {}: {}", peer_id, error);
                peer.link.count_dropped();
            }
        }
    }

    fn on_peer_internal(&mut self, peer_id: PeerId, internal: InternalMessage, now: Instant) {
        let address = match self.peers.get(&peer_id) {
            Some(peer) => peer.address().to_string(),
            None => return,
        };
        let directory_mode = self.config.directory_mode;

        let reply = match internal {
            InternalMessage::Disconnect => {
                self.close_peer(peer_id, now);
                None
            }
            InternalMessage::HandoverRequest {
                request_id,
                instances,
            } => {
                let token = match self.handovers.register(peer_id, None, instances, now) {
                    Ok(token) => Some(token),
                    Err(error) => {
                        warn!("handover request {} from {} failed: {}", request_id, peer_id, error);
                        None
                    }
                };
                Some(InternalMessage::HandoverResponse { request_id, token })
            }
            InternalMessage::RegisterHost(host) if directory_mode => {
                self.directory.register(peer_id, host, &address);
                None
            }
            InternalMessage::UpdateHost(host) if directory_mode => {
                if !self.directory.update(peer_id, host, &address) {
                    warn!("{} updated a host it never registered", peer_id);
                }
                None
            }
            InternalMessage::UnregisterHost if directory_mode => {
                self.directory.unregister(peer_id);
                None
            }
            InternalMessage::RequestHostList { game_type } if directory_mode => {
                Some(InternalMessage::HostList {
                    hosts: self.directory.list(&game_type),
                })
            }
            InternalMessage::DiscoverEndpoint if directory_mode => {
                Some(InternalMessage::EndpointInfo { address })
            }
            other => {
                warn!("{} may not send {:?}, dropping", peer_id, other.opcode());
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.link.count_dropped();
                }
                None
            }
        };

        if let Some(reply) = reply {
            let message = reply.to_message(Destination::Target(peer_id), MessageFlags::RELIABLE);
            self.send_message(peer_id, &message);
        }
    }

    fn on_peer_rpc(&mut self, peer_id: PeerId, message: NetworkMessage) {
        let (Some(name), Some(view)) = (message.name().map(str::to_string), message.view()) else {
            return;
        };
        let destination = message.header.destination;
        if let Destination::Target(target) = destination {
            if !target.is_server() && !self.peers.contains_key(&target) {
                warn!("{} called {} on unknown {}, dropping", peer_id, name, target);
                return;
            }
        }

        let relay_to = match destination {
            Destination::ToServer => Vec::new(),
            Destination::Target(target) if target.is_server() => Vec::new(),
            Destination::Target(target) => {
                if self.visibility.is_culled(view, target) {
                    Vec::new()
                } else {
                    vec![target]
                }
            }
            Destination::Broadcast | Destination::BroadcastExcept(_) => {
                self.rpc_recipients(view, &destination, Some(peer_id))
            }
        };
        let store = message.is_buffered() && !matches!(destination, Destination::Target(_));

        if !relay_to.is_empty() || store {
            let header = MessageHeader {
                sender: Some(peer_id),
                ..message.header.clone()
            };
            let envelope = NetworkMessage::forward(&header, &message.payload).to_bytes();
            trace!("relaying {} from {} to {} peers", name, peer_id, relay_to.len());
            let relay_to = self.secure_only(relay_to, message.flags());
            self.send_envelope_to(&relay_to, &envelope, message.flags().is_reliable());
            if store {
                let group = self.view_group(view);
                self.buffers.store_rpc(group, view, &name, peer_id, envelope);
            }
        }

        if destination.includes(PeerId::SERVER) {
            if let Some(rpc) = Rpc::from_message(message, peer_id) {
                self.events.push_rpc(rpc);
            }
        }
    }

    // Private: recipients

    fn view_group(&self, view: ViewId) -> GroupId {
        self.views
            .get(&view)
            .map(|record| record.group)
            .or_else(|| self.buffers.group_of(view))
            .unwrap_or(GroupId::DEFAULT)
    }

    /// Reachable peers that can see `group`
    fn visible_peers(&self, group: GroupId) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|peer| peer.is_reachable() && self.visibility.can_see(group, peer.id()))
            .map(Peer::id)
            .collect()
    }

    fn visible_set(&self, group: GroupId) -> BTreeSet<PeerId> {
        self.visible_peers(group).into_iter().collect()
    }

    /// Peers a broadcast RPC on `view` reaches, minus its sender
    fn rpc_recipients(
        &self,
        view: ViewId,
        destination: &Destination,
        sender: Option<PeerId>,
    ) -> Vec<PeerId> {
        self.visible_peers(self.view_group(view))
            .into_iter()
            .filter(|peer| {
                destination.includes(*peer)
                    && Some(*peer) != sender
                    && !self.visibility.is_culled(view, *peer)
            })
            .collect()
    }

    /// Encrypted-only messages never go to insecure peers
    fn secure_only(&self, recipients: Vec<PeerId>, flags: MessageFlags) -> Vec<PeerId> {
        if !flags.is_encrypted() {
            return recipients;
        }
        recipients
            .into_iter()
            .filter(|peer| {
                let secure = self.peers.get(peer).is_some_and(Peer::is_secure);
                if !secure {
                    warn!("not sending an encrypted-only message to insecure {}", peer);
                }
                secure
            })
            .collect()
    }

    fn apply_visibility_change(&mut self, group: GroupId, before: BTreeSet<PeerId>) {
        let after = self.visible_set(group);
        let views: Vec<ViewId> = self
            .views
            .iter()
            .filter(|(_, record)| record.group == group)
            .map(|(view, _)| *view)
            .collect();

        for peer in before.difference(&after) {
            for view in &views {
                let message = InternalMessage::Destroy { view: *view }
                    .to_message(Destination::Target(*peer), MessageFlags::RELIABLE);
                self.send_message(*peer, &message);
            }
        }
        let gained: Vec<PeerId> = after.difference(&before).copied().collect();
        for peer in &gained {
            self.flush_backlog(*peer, &[group]);
        }
        if !gained.is_empty() {
            for view in &views {
                self.scheduler.restart_streams(*view);
            }
        }
    }

    // Private: sending

    /// Replay the backlog of `groups` to one peer as a single batch
    fn flush_backlog(&mut self, peer: PeerId, groups: &[GroupId]) {
        let messages: Vec<BitStream> = self
            .buffers
            .backlog_for_groups(groups)
            .into_iter()
            .map(|message| BitStream::from_bytes(&message.envelope))
            .collect();
        self.send_batch(peer, messages);
    }

    fn send_batch(&mut self, peer: PeerId, messages: Vec<BitStream>) {
        if messages.is_empty() {
            return;
        }
        debug!("replaying {} buffered messages to {}", messages.len(), peer);
        let message = InternalMessage::BufferedBatch { messages }
            .to_message(Destination::Target(peer), MessageFlags::RELIABLE);
        self.send_message(peer, &message);
    }

    fn send_message(&mut self, peer: PeerId, message: &NetworkMessage) {
        if let Err(error) = self.try_send_message(peer, message) {
            warn!("could not send to {}: {}", peer, error);
        }
    }

    fn try_send_message(
        &mut self,
        peer: PeerId,
        message: &NetworkMessage,
    ) -> Result<(), TransportError> {
        let Some(transport) = self.transport.as_deref_mut() else {
            return Err(TransportError::NotStarted);
        };
        let Some(entry) = self.peers.get_mut(&peer) else {
            return Ok(());
        };
        entry.link.send(transport, &mut self.pool, message)
    }

    fn send_pending(&mut self, handle: ConnectionHandle, message: &NetworkMessage) {
        let Some(transport) = self.transport.as_deref_mut() else {
            return;
        };
        let Some(pending) = self.pending.get_mut(&handle) else {
            return;
        };
        if let Err(error) = pending.link.send(transport, &mut self.pool, message) {
            warn!("could not send to {}: {}", pending.link.address(), error);
        }
    }

    /// Send one encoded envelope to several peers. Plain links share the
    /// bytes; secure links each encrypt their own copy.
    fn send_envelope_to(&mut self, recipients: &[PeerId], envelope: &[u8], reliable: bool) {
        let Some(transport) = self.transport.as_deref_mut() else {
            return;
        };
        for peer in recipients {
            let Some(entry) = self.peers.get_mut(peer) else {
                continue;
            };
            if let Err(error) = entry.link.send_envelope(transport, envelope, reliable) {
                warn!("could not send to {}: {}", peer, error);
            }
        }
    }

    fn allocate_view(&mut self) -> Result<ViewId, ServerError> {
        while self.views.contains_key(&ViewId(self.next_view)) {
            self.next_view = self
                .next_view
                .checked_add(1)
                .ok_or(ServerError::ViewIdsExhausted)?;
        }
        let view = ViewId(self.next_view);
        self.next_view = self.next_view.saturating_add(1);
        Ok(view)
    }
}

fn create_envelope(view: ViewId, record: &ViewRecord) -> Vec<u8> {
    record
        .create_message(view)
        .to_message(Destination::Broadcast, MessageFlags::RELIABLE)
        .to_bytes()
}
