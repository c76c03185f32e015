use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use weft_client::{
    Client, ClientConfig, ConnectEvent, ConnectionFailedEvent, DespawnEvent, DirectoryReply,
    DirectoryReplyEvent, DisconnectEvent as ClientDisconnectEvent, Events as ClientEvents,
    GroupChangeEvent, HandoverTokenEvent, RedirectEvent, RpcEvent as ClientRpcEvent, SpawnEvent,
};
use weft_server::{
    ApprovalEvent, ApprovalRequest, ConnectEvent as ServerConnectEvent, DenyEvent,
    DisconnectEvent as ServerDisconnectEvent, ErrorEvent, Events as ServerEvents, HandoverArrival,
    HandoverEvent, RpcEvent as ServerRpcEvent, Server, ServerConfig, ServerError,
};
use weft_shared::{BitStream, ConnectionError, GroupId, PeerId, Rpc, ViewId};

use crate::{MemoryNetwork, RecordingHost};

/// Rounds of server and client ticks run by [`pump`]
pub const PUMP_ROUNDS: usize = 4;

pub fn server_address() -> SocketAddr {
    "127.0.0.1:7000".parse().expect("valid address")
}

pub fn second_server_address() -> SocketAddr {
    "127.0.0.1:7001".parse().expect("valid address")
}

/// Everything a server reported, accumulated across ticks
#[derive(Default)]
pub struct ServerLog {
    pub connected: Vec<PeerId>,
    pub disconnected: Vec<PeerId>,
    pub approvals: Vec<ApprovalRequest>,
    pub denials: Vec<ConnectionError>,
    pub rpcs: Vec<Rpc>,
    pub handovers: Vec<HandoverArrival>,
    pub errors: Vec<ServerError>,
}

impl ServerLog {
    fn record(&mut self, mut events: ServerEvents) {
        self.connected.extend(events.read::<ServerConnectEvent>());
        self.disconnected
            .extend(events.read::<ServerDisconnectEvent>().map(|(peer, _)| peer));
        self.approvals.extend(events.read::<ApprovalEvent>());
        self.denials
            .extend(events.read::<DenyEvent>().map(|(_, error)| error));
        self.rpcs.extend(events.read::<ServerRpcEvent>());
        self.handovers.extend(events.read::<HandoverEvent>());
        self.errors.extend(events.read::<ErrorEvent>());
    }
}

/// Everything a client reported, accumulated across ticks
#[derive(Default)]
pub struct ClientLog {
    pub connected: Vec<(PeerId, BitStream)>,
    pub disconnects: usize,
    pub failures: Vec<ConnectionError>,
    pub redirects: Vec<SocketAddr>,
    pub rpcs: Vec<Rpc>,
    pub spawns: Vec<ViewId>,
    pub despawns: Vec<ViewId>,
    pub group_changes: Vec<(ViewId, GroupId)>,
    pub handover_tokens: Vec<(u32, Option<String>)>,
    pub directory_replies: Vec<DirectoryReply>,
}

impl ClientLog {
    pub fn record(&mut self, mut events: ClientEvents) {
        self.connected.extend(events.read::<ConnectEvent>());
        self.disconnects += events.read::<ClientDisconnectEvent>().count();
        self.failures.extend(events.read::<ConnectionFailedEvent>());
        self.redirects.extend(events.read::<RedirectEvent>());
        self.rpcs.extend(events.read::<ClientRpcEvent>());
        self.spawns.extend(events.read::<SpawnEvent>());
        self.despawns.extend(events.read::<DespawnEvent>());
        self.group_changes.extend(events.read::<GroupChangeEvent>());
        self.handover_tokens.extend(events.read::<HandoverTokenEvent>());
        self.directory_replies
            .extend(events.read::<DirectoryReplyEvent>());
    }

    /// Names of the RPCs received, in order
    pub fn rpc_names(&self) -> Vec<&str> {
        self.rpcs.iter().map(|rpc| rpc.name.as_str()).collect()
    }
}

/// A server listening on the in-memory network
pub struct TestServer {
    pub server: Server,
    pub host: RecordingHost,
    pub log: ServerLog,
    /// Approve every pending request automatically when approval is
    /// required, echoing this payload
    pub auto_approve: Option<BitStream>,
}

impl TestServer {
    pub fn listen(
        network: &MemoryNetwork,
        config: ServerConfig,
        address: SocketAddr,
        now: Instant,
    ) -> Self {
        let mut server = Server::new(config, now);
        server
            .listen(network.server_transport(), address)
            .expect("server listens");
        Self {
            server,
            host: RecordingHost::new(),
            log: ServerLog::default(),
            auto_approve: Some(BitStream::new()),
        }
    }

    pub fn tick(&mut self, now: Instant) {
        let mut events = self.server.receive(now);
        let approvals: Vec<ApprovalRequest> = events.read::<ApprovalEvent>().collect();
        self.log.record(events);
        for request in approvals {
            match &self.auto_approve {
                Some(approval) => {
                    self.server
                        .accept_connection(request.handle, approval.clone(), now)
                        .expect("pending request can be accepted");
                    self.log.approvals.push(request);
                }
                None => self.log.approvals.push(request),
            }
        }
        self.server.send_all_updates(&mut self.host, now);
    }
}

/// A client on the in-memory network with its own host
pub struct TestClient {
    pub client: Client,
    pub host: RecordingHost,
    pub log: ClientLog,
}

impl TestClient {
    pub fn new(network: &MemoryNetwork, config: ClientConfig, now: Instant) -> Self {
        Self {
            client: Client::new(config, network.client_transport(), now),
            host: RecordingHost::new(),
            log: ClientLog::default(),
        }
    }

    pub fn tick(&mut self, now: Instant) {
        let events = self.client.receive(&mut self.host, now);
        self.log.record(events);
    }

    pub fn peer(&self) -> PeerId {
        self.client.peer_id().unwrap_or(PeerId::UNASSIGNED)
    }
}

/// Run a few rounds of server and client ticks at `now`
pub fn pump(server: &mut TestServer, clients: &mut [&mut TestClient], now: Instant) {
    for _ in 0..PUMP_ROUNDS {
        server.tick(now);
        for client in clients.iter_mut() {
            client.tick(now);
        }
    }
}

/// Connect a fresh client with an empty login and pump until it is
/// approved
pub fn connect_client(
    network: &MemoryNetwork,
    server: &mut TestServer,
    now: Instant,
) -> TestClient {
    let mut client = TestClient::new(network, ClientConfig::default(), now);
    client
        .client
        .connect(server_address(), "", BitStream::new(), now)
        .expect("connect starts");
    pump(server, &mut [&mut client], now);
    client
}

/// A replication interval comfortably past the default send rate
pub fn replication_step() -> Duration {
    Duration::from_millis(100)
}
