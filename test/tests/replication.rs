/// End-to-end tests of state replication: delta-compressed streams, owner and
/// cell-proxy channels, loss recovery and late joiners
use std::time::Instant;

use weft_server::{ServerConfig, ServerError};
use weft_shared::{
    BitStream, GroupId, PeerId, ReplicationConfig, StateChannel, StateSyncMode, ViewId,
};
use weft_test::{
    connect_client, pump, replication_step, server_address, MemoryNetwork, TestServer,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_server(network: &MemoryNetwork, config: ServerConfig, now: Instant) -> TestServer {
    TestServer::listen(network, config, server_address(), now)
}

fn step(start: Instant, count: u32) -> Instant {
    start + replication_step() * count
}

/// A snapshot long enough that a one-byte change compresses to a delta
fn sample(first: u8) -> Vec<u8> {
    let mut state = vec![0; 16];
    state[0] = first;
    state
}

fn spawn(server: &mut TestServer, owner: PeerId) -> ViewId {
    server
        .server
        .instantiate(owner, GroupId::DEFAULT, "Ship", BitStream::new())
        .unwrap()
}

// ========== Proxy State Tests ==========

#[test]
fn test_state_changes_reach_observers() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut client = connect_client(&network, &mut server, start);
    let ship = spawn(&mut server, PeerId::SERVER);

    let mut state = vec![10, 20, 30, 40, 50, 60, 70, 80];
    server.host.set_proxy_state(ship, &state);
    pump(&mut server, &mut [&mut client], step(start, 1));
    assert_eq!(client.host.latest(ship, StateChannel::Proxy), Some(state.as_slice()));

    state[3] = 99;
    server.host.set_proxy_state(ship, &state);
    pump(&mut server, &mut [&mut client], step(start, 2));
    assert_eq!(client.host.latest(ship, StateChannel::Proxy), Some(state.as_slice()));
    let applied = client.host.applied.len();
    assert_eq!(applied, 2);

    // nothing changed, nothing sent
    pump(&mut server, &mut [&mut client], step(start, 3));
    assert_eq!(client.host.applied.len(), applied);
}

#[test]
fn test_full_snapshots_are_sent_every_interval() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut client = connect_client(&network, &mut server, start);
    let ship = server
        .server
        .instantiate_with_mode(
            PeerId::SERVER,
            GroupId::DEFAULT,
            "Buoy",
            BitStream::new(),
            StateSyncMode::Reliable,
        )
        .unwrap();
    server.host.set_proxy_state(ship, &[1, 2, 3]);

    pump(&mut server, &mut [&mut client], step(start, 1));
    pump(&mut server, &mut [&mut client], step(start, 2));
    assert_eq!(client.host.applied.len(), 2);
    assert_eq!(client.host.latest(ship, StateChannel::Proxy), Some(&[1, 2, 3][..]));

    server.server.set_state_sync(ship, StateSyncMode::Off).unwrap();
    pump(&mut server, &mut [&mut client], step(start, 3));
    assert_eq!(client.host.applied.len(), 2);
    assert_eq!(
        server.server.set_state_sync(ViewId(77), StateSyncMode::Off),
        Err(ServerError::UnknownView { view: ViewId(77) })
    );
}

#[test]
fn test_late_joiner_gets_a_fresh_baseline() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut early = connect_client(&network, &mut server, start);
    let ship = spawn(&mut server, PeerId::SERVER);

    server.host.set_proxy_state(ship, &sample(1));
    pump(&mut server, &mut [&mut early], step(start, 1));
    server.host.set_proxy_state(ship, &sample(2));
    pump(&mut server, &mut [&mut early], step(start, 2));

    let mut late = connect_client(&network, &mut server, step(start, 2));
    server.host.set_proxy_state(ship, &sample(3));
    pump(&mut server, &mut [&mut early, &mut late], step(start, 3));

    assert_eq!(late.log.spawns, vec![ship]);
    assert_eq!(late.host.latest(ship, StateChannel::Proxy), Some(sample(3).as_slice()));
    assert_eq!(early.host.latest(ship, StateChannel::Proxy), Some(sample(3).as_slice()));
}

#[test]
fn test_lost_delta_stalls_until_the_next_baseline() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let config = ServerConfig {
        replication: ReplicationConfig {
            delta_resync_interval: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut server = start_server(&network, config, start);
    let mut client = connect_client(&network, &mut server, start);
    let ship = server
        .server
        .instantiate_with_mode(
            PeerId::SERVER,
            GroupId::DEFAULT,
            "Ship",
            BitStream::new(),
            StateSyncMode::UnreliableDeltaCompressed,
        )
        .unwrap();

    server.host.set_proxy_state(ship, &sample(1));
    pump(&mut server, &mut [&mut client], step(start, 1));
    assert_eq!(client.host.latest(ship, StateChannel::Proxy), Some(sample(1).as_slice()));

    network.set_drop_unreliable(true);
    server.host.set_proxy_state(ship, &sample(2));
    pump(&mut server, &mut [&mut client], step(start, 2));
    network.set_drop_unreliable(false);

    // the delta after the lost one no longer applies
    server.host.set_proxy_state(ship, &sample(3));
    pump(&mut server, &mut [&mut client], step(start, 3));
    assert_eq!(client.host.latest(ship, StateChannel::Proxy), Some(sample(1).as_slice()));

    // two deltas since the last baseline: the next change resyncs
    server.host.set_proxy_state(ship, &sample(4));
    pump(&mut server, &mut [&mut client], step(start, 4));
    assert_eq!(client.host.latest(ship, StateChannel::Proxy), Some(sample(4).as_slice()));
}

// ========== Owner And Cell Proxy Tests ==========

#[test]
fn test_owner_receives_its_own_state() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut owner = connect_client(&network, &mut server, start);
    let mut observer = connect_client(&network, &mut server, start);
    let ship = spawn(&mut server, owner.peer());
    server.server.set_owner_state_differs(ship, true).unwrap();

    server.host.set_proxy_state(ship, &[5, 5]);
    server.host.set_owner_state(ship, &[5, 5, 42]);
    pump(&mut server, &mut [&mut owner, &mut observer], step(start, 1));

    assert_eq!(owner.host.latest(ship, StateChannel::Owner), Some(&[5, 5, 42][..]));
    assert_eq!(owner.host.latest(ship, StateChannel::Proxy), None);
    assert_eq!(observer.host.latest(ship, StateChannel::Proxy), Some(&[5, 5][..]));
    assert_eq!(observer.host.latest(ship, StateChannel::Owner), None);
    assert_eq!(owner.host.views.get(&ship).map(|info| info.owner), Some(owner.peer()));
}

#[test]
fn test_cell_proxy_mirrors_the_view() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut cell = connect_client(&network, &mut server, start);
    let mut observer = connect_client(&network, &mut server, start);
    let ship = spawn(&mut server, PeerId::SERVER);

    server.server.add_cell_proxy(ship, cell.peer()).unwrap();
    server.host.set_proxy_state(ship, &[7]);
    server.host.cell_states.insert(ship, vec![7, 7, 7]);
    pump(&mut server, &mut [&mut cell, &mut observer], step(start, 1));

    assert_eq!(cell.host.latest(ship, StateChannel::CellProxy), Some(&[7, 7, 7][..]));
    assert_eq!(cell.host.latest(ship, StateChannel::Proxy), Some(&[7][..]));
    assert_eq!(observer.host.latest(ship, StateChannel::CellProxy), None);

    assert_eq!(
        server.server.add_cell_proxy(ship, PeerId(50)),
        Err(ServerError::UnknownPeer { peer: PeerId(50) })
    );
}

#[test]
fn test_culled_peer_gets_no_state() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut near = connect_client(&network, &mut server, start);
    let mut far = connect_client(&network, &mut server, start);
    let ship = spawn(&mut server, PeerId::SERVER);

    server.server.set_culled(ship, far.peer(), true);
    server.host.set_proxy_state(ship, &[8, 8]);
    pump(&mut server, &mut [&mut near, &mut far], step(start, 1));
    assert_eq!(near.host.latest(ship, StateChannel::Proxy), Some(&[8, 8][..]));
    assert_eq!(far.host.latest(ship, StateChannel::Proxy), None);

    // restoring restarts the stream with a baseline
    server.server.set_culled(ship, far.peer(), false);
    server.host.set_proxy_state(ship, &[8, 9]);
    pump(&mut server, &mut [&mut near, &mut far], step(start, 2));
    assert_eq!(far.host.latest(ship, StateChannel::Proxy), Some(&[8, 9][..]));
}

#[test]
fn test_views_need_a_listening_server() {
    init_logging();
    let start = Instant::now();
    let mut server = weft_server::Server::new(ServerConfig::default(), start);

    assert_eq!(
        server.instantiate(PeerId::SERVER, GroupId::DEFAULT, "Ship", BitStream::new()),
        Err(ServerError::NotListening)
    );
}
