use std::{mem, net::SocketAddr, vec::IntoIter};

use weft_shared::{BitStream, ConnectionError, GroupId, HostData, PeerId, Rpc, ViewId};

/// Answer from a directory service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryReply {
    HostList(Vec<HostData>),
    /// The address the directory sees this client connecting from
    Endpoint(String),
}

pub struct Events {
    connections: Vec<(PeerId, BitStream)>,
    disconnections: Vec<SocketAddr>,
    failures: Vec<ConnectionError>,
    redirects: Vec<SocketAddr>,
    rpcs: Vec<Rpc>,
    spawns: Vec<ViewId>,
    despawns: Vec<ViewId>,
    group_changes: Vec<(ViewId, GroupId)>,
    handover_tokens: Vec<(u32, Option<String>)>,
    directory_replies: Vec<DirectoryReply>,
    empty: bool,
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

impl Events {
    pub(crate) fn new() -> Self {
        Self {
            connections: Vec::new(),
            disconnections: Vec::new(),
            failures: Vec::new(),
            redirects: Vec::new(),
            rpcs: Vec::new(),
            spawns: Vec::new(),
            despawns: Vec::new(),
            group_changes: Vec::new(),
            handover_tokens: Vec::new(),
            directory_replies: Vec::new(),
            empty: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn read<V: Event>(&mut self) -> V::Iter {
        V::iter(self)
    }

    pub fn has<V: Event>(&self) -> bool {
        V::has(self)
    }

    pub(crate) fn push_connection(&mut self, peer: PeerId, approval: BitStream) {
        self.connections.push((peer, approval));
        self.empty = false;
    }

    pub(crate) fn push_disconnection(&mut self, address: SocketAddr) {
        self.disconnections.push(address);
        self.empty = false;
    }

    pub(crate) fn push_failure(&mut self, error: ConnectionError) {
        self.failures.push(error);
        self.empty = false;
    }

    pub(crate) fn push_redirect(&mut self, address: SocketAddr) {
        self.redirects.push(address);
        self.empty = false;
    }

    pub(crate) fn push_rpc(&mut self, rpc: Rpc) {
        self.rpcs.push(rpc);
        self.empty = false;
    }

    pub(crate) fn push_spawn(&mut self, view: ViewId) {
        self.spawns.push(view);
        self.empty = false;
    }

    pub(crate) fn push_despawn(&mut self, view: ViewId) {
        self.despawns.push(view);
        self.empty = false;
    }

    pub(crate) fn push_group_change(&mut self, view: ViewId, group: GroupId) {
        self.group_changes.push((view, group));
        self.empty = false;
    }

    pub(crate) fn push_handover_token(&mut self, request_id: u32, token: Option<String>) {
        self.handover_tokens.push((request_id, token));
        self.empty = false;
    }

    pub(crate) fn push_directory_reply(&mut self, reply: DirectoryReply) {
        self.directory_replies.push(reply);
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
/// The server approved the connection: assigned identity and approval data
pub struct ConnectEvent;
impl Event for ConnectEvent {
    type Iter = IntoIter<(PeerId, BitStream)>;

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
    type Iter = IntoIter<SocketAddr>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.disconnections))
    }

    fn has(events: &Events) -> bool {
        !events.disconnections.is_empty()
    }
}

// ConnectionFailedEvent
/// A connect attempt ended without reaching Connected
pub struct ConnectionFailedEvent;
impl Event for ConnectionFailedEvent {
    type Iter = IntoIter<ConnectionError>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.failures))
    }

    fn has(events: &Events) -> bool {
        !events.failures.is_empty()
    }
}

// RedirectEvent
pub struct RedirectEvent;
impl Event for RedirectEvent {
    type Iter = IntoIter<SocketAddr>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.redirects))
    }

    fn has(events: &Events) -> bool {
        !events.redirects.is_empty()
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

// SpawnEvent
pub struct SpawnEvent;
impl Event for SpawnEvent {
    type Iter = IntoIter<ViewId>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.spawns))
    }

    fn has(events: &Events) -> bool {
        !events.spawns.is_empty()
    }
}

// DespawnEvent
pub struct DespawnEvent;
impl Event for DespawnEvent {
    type Iter = IntoIter<ViewId>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.despawns))
    }

    fn has(events: &Events) -> bool {
        !events.despawns.is_empty()
    }
}

// GroupChangeEvent
pub struct GroupChangeEvent;
impl Event for GroupChangeEvent {
    type Iter = IntoIter<(ViewId, GroupId)>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.group_changes))
    }

    fn has(events: &Events) -> bool {
        !events.group_changes.is_empty()
    }
}

// HandoverTokenEvent
/// Answer to a handover request: request id and the session token, if the
/// server could register one
pub struct HandoverTokenEvent;
impl Event for HandoverTokenEvent {
    type Iter = IntoIter<(u32, Option<String>)>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.handover_tokens))
    }

    fn has(events: &Events) -> bool {
        !events.handover_tokens.is_empty()
    }
}

// DirectoryReplyEvent
pub struct DirectoryReplyEvent;
impl Event for DirectoryReplyEvent {
    type Iter = IntoIter<DirectoryReply>;

    fn iter(events: &mut Events) -> Self::Iter {
        IntoIterator::into_iter(mem::take(&mut events.directory_replies))
    }

    fn has(events: &Events) -> bool {
        !events.directory_replies.is_empty()
    }
}
