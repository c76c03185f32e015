use std::{mem, net::SocketAddr, vec::IntoIter};

use weft_shared::{BitStream, ConnectionError, ConnectionHandle, PeerId, Rpc};

use crate::ServerError;

/// A connect request waiting for the application's verdict
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub handle: ConnectionHandle,
    pub address: SocketAddr,
    /// Login payload written by the client
    pub login: BitStream,
}

/// A peer that arrived through a handover session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoverArrival {
    pub peer: PeerId,
    /// The authority node that registered the session
    pub requested_by: PeerId,
    pub instances: BitStream,
}

pub struct Events {
    connections: Vec<PeerId>,
    disconnections: Vec<(PeerId, SocketAddr)>,
    approvals: Vec<ApprovalRequest>,
    denials: Vec<(SocketAddr, ConnectionError)>,
    rpcs: Vec<Rpc>,
    handovers: Vec<HandoverArrival>,
    errors: Vec<ServerError>,
    empty: bool,
}

impl Events {
    pub(crate) fn new() -> Self {
        Self {
            connections: Vec::new(),
            disconnections: Vec::new(),
            approvals: Vec::new(),
            denials: Vec::new(),
            rpcs: Vec::new(),
            handovers: Vec::new(),
            errors: Vec::new(),
            empty: true,
        }
    }

    // Public

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn read<V: Event>(&mut self) -> V::Iter {
        V::iter(self)
    }

    pub fn has<V: Event>(&self) -> bool {
        V::has(self)
    }

    // Crate-public

    pub(crate) fn push_connection(&mut self, peer: PeerId) {
        self.connections.push(peer);
        self.empty = false;
    }

    pub(crate) fn push_disconnection(&mut self, peer: PeerId, address: SocketAddr) {
        self.disconnections.push((peer, address));
        self.empty = false;
    }

    pub(crate) fn push_approval(&mut self, request: ApprovalRequest) {
        self.approvals.push(request);
        self.empty = false;
    }

    pub(crate) fn push_denial(&mut self, address: SocketAddr, error: ConnectionError) {
        self.denials.push((address, error));
        self.empty = false;
    }

    pub(crate) fn push_rpc(&mut self, rpc: Rpc) {
        self.rpcs.push(rpc);
        self.empty = false;
    }

    pub(crate) fn push_handover(&mut self, arrival: HandoverArrival) {
        self.handovers.push(arrival);
        self.empty = false;
    }

    pub(crate) fn push_error(&mut self, error: ServerError) {
        self.errors.push(error);
        self.empty = false;
    }
}

// Event Trait
pub trait Event {
    type Iter;

    fn iter(events: &mut Events) -> Self::Iter;

    fn has(events: &Events) -> bool;
}

// ConnectEvent
pub struct ConnectEvent;
impl Event for ConnectEvent {
    type Iter = IntoIter<PeerId>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.connections))
    }

    fn has(events: &Events) -> bool {
        !events.connections.is_empty()
    }
}

// DisconnectEvent
pub struct DisconnectEvent;
impl Event for DisconnectEvent {
    type Iter = IntoIter<(PeerId, SocketAddr)>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.disconnections))
    }

    fn has(events: &Events) -> bool {
        !events.disconnections.is_empty()
    }
}

// ApprovalEvent
pub struct ApprovalEvent;
impl Event for ApprovalEvent {
    type Iter = IntoIter<ApprovalRequest>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.approvals))
    }

    fn has(events: &Events) -> bool {
        !events.approvals.is_empty()
    }
}

// DenyEvent
pub struct DenyEvent;
impl Event for DenyEvent {
    type Iter = IntoIter<(SocketAddr, ConnectionError)>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.denials))
    }

    fn has(events: &Events) -> bool {
        !events.denials.is_empty()
    }
}

// RpcEvent
pub struct RpcEvent;
impl Event for RpcEvent {
    type Iter = IntoIter<Rpc>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.rpcs))
    }

    fn has(events: &Events) -> bool {
        !events.rpcs.is_empty()
    }
}

// HandoverEvent
pub struct HandoverEvent;
impl Event for HandoverEvent {
    type Iter = IntoIter<HandoverArrival>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.handovers))
    }

    fn has(events: &Events) -> bool {
        !events.handovers.is_empty()
    }
}

// ErrorEvent
pub struct ErrorEvent;
impl Event for ErrorEvent {
    type Iter = IntoIter<ServerError>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.errors))
    }

    fn has(events: &Events) -> bool {
        !events.errors.is_empty()
    }
}
