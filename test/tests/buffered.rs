/// End-to-end tests of buffered RPCs: relaying between peers, replay to
/// late joiners, and pruning of the backlog
use std::time::Instant;

use weft_client::ClientError;
use weft_server::{ServerConfig, ServerError};
use weft_shared::{BitStream, Destination, GroupId, MessageFlags, PeerId, ViewId};
use weft_test::{connect_client, pump, server_address, MemoryNetwork, TestClient, TestServer};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_server(network: &MemoryNetwork, config: ServerConfig, now: Instant) -> TestServer {
    TestServer::listen(network, config, server_address(), now)
}

fn spawn(server: &mut TestServer, prefab: &str) -> ViewId {
    server
        .server
        .instantiate(PeerId::SERVER, GroupId::DEFAULT, prefab, BitStream::new())
        .unwrap()
}

fn server_rpc(server: &mut TestServer, name: &str, view: ViewId, now: Instant) {
    server
        .server
        .send_rpc(
            name,
            view,
            Destination::Broadcast,
            MessageFlags::BUFFERED,
            BitStream::new(),
            now,
        )
        .unwrap();
}

fn client_rpc(
    client: &mut TestClient,
    name: &str,
    view: ViewId,
    destination: Destination,
    now: Instant,
) {
    let mut args = BitStream::new();
    args.write_string(name);
    client
        .client
        .send_rpc(name, view, destination, MessageFlags::BUFFERED, args, now)
        .unwrap();
}

// ========== Replay Tests ==========

#[test]
fn test_late_joiner_replays_in_call_order() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut early = connect_client(&network, &mut server, start);

    let a = spawn(&mut server, "Door");
    let b = spawn(&mut server, "Lamp");
    server_rpc(&mut server, "Open", a, start);
    server_rpc(&mut server, "SwitchOn", b, start);
    server_rpc(&mut server, "Close", a, start);
    pump(&mut server, &mut [&mut early], start);

    assert_eq!(early.log.spawns, vec![a, b]);
    assert_eq!(early.log.rpc_names(), vec!["Open", "SwitchOn", "Close"]);

    let late = connect_client(&network, &mut server, start);
    assert_eq!(late.log.spawns, vec![a, b]);
    assert_eq!(late.log.rpc_names(), vec!["Open", "SwitchOn", "Close"]);
    assert!(late.log.rpcs.iter().all(|rpc| rpc.buffered));
    assert!(late
        .log
        .rpcs
        .iter()
        .all(|rpc| rpc.sender == PeerId::SERVER));
    assert_eq!(late.host.views.get(&a).map(|info| info.prefab.as_str()), Some("Door"));
}

#[test]
fn test_client_rpc_is_relayed_and_replayed_with_its_sender() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let view = spawn(&mut server, "Banner");
    let mut caller = connect_client(&network, &mut server, start);
    let mut watcher = connect_client(&network, &mut server, start);
    let caller_id = caller.peer();

    client_rpc(&mut caller, "Cheer", view, Destination::Broadcast, start);
    pump(&mut server, &mut [&mut caller, &mut watcher], start);

    // the server is part of a broadcast, the caller is not
    assert_eq!(server.log.rpcs.len(), 1);
    assert_eq!(server.log.rpcs[0].sender, caller_id);
    assert_eq!(watcher.log.rpc_names(), vec!["Cheer"]);
    assert_eq!(watcher.log.rpcs[0].sender, caller_id);
    assert!(caller.log.rpcs.is_empty());

    let late = connect_client(&network, &mut server, start);
    assert_eq!(late.log.rpc_names(), vec!["Cheer"]);
    assert_eq!(late.log.rpcs[0].sender, caller_id);
    let mut args = late.log.rpcs[0].args.clone();
    assert_eq!(args.read_string().unwrap(), "Cheer");
}

#[test]
fn test_targeted_rpc_is_not_buffered() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let view = spawn(&mut server, "Mailbox");
    let mut sender = connect_client(&network, &mut server, start);
    let mut target = connect_client(&network, &mut server, start);
    let target_id = target.peer();

    client_rpc(&mut sender, "Letter", view, Destination::Target(target_id), start);
    pump(&mut server, &mut [&mut sender, &mut target], start);

    assert_eq!(target.log.rpc_names(), vec!["Letter"]);
    assert!(server.log.rpcs.is_empty());
    let late = connect_client(&network, &mut server, start);
    assert!(late.log.rpcs.is_empty());
}

#[test]
fn test_broadcast_except_skips_the_named_peer() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let view = spawn(&mut server, "Radio");
    let mut first = connect_client(&network, &mut server, start);
    let mut second = connect_client(&network, &mut server, start);

    server
        .server
        .send_rpc(
            "Static",
            view,
            Destination::BroadcastExcept(second.peer()),
            MessageFlags::RELIABLE,
            BitStream::new(),
            start,
        )
        .unwrap();
    pump(&mut server, &mut [&mut first, &mut second], start);

    assert_eq!(first.log.rpc_names(), vec!["Static"]);
    assert!(second.log.rpcs.is_empty());
}

#[test]
fn test_server_cannot_address_itself() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let view = spawn(&mut server, "Mirror");

    for destination in [Destination::ToServer, Destination::Target(PeerId::SERVER)] {
        assert_eq!(
            server.server.send_rpc(
                "Reflect",
                view,
                destination,
                MessageFlags::RELIABLE,
                BitStream::new(),
                start,
            ),
            Err(ServerError::InvalidDestination)
        );
    }
    assert_eq!(
        server.server.send_rpc(
            "Reflect",
            view,
            Destination::Target(PeerId(7)),
            MessageFlags::RELIABLE,
            BitStream::new(),
            start,
        ),
        Err(ServerError::UnknownPeer { peer: PeerId(7) })
    );
}

#[test]
fn test_rpc_requires_a_connection() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut client = TestClient::new(&network, Default::default(), start);

    assert_eq!(
        client.client.send_rpc(
            "Hello",
            ViewId(1),
            Destination::ToServer,
            MessageFlags::RELIABLE,
            BitStream::new(),
            start,
        ),
        Err(ClientError::NotConnected)
    );
}

// ========== Pruning Tests ==========

#[test]
fn test_disconnect_prunes_the_senders_backlog() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let view = spawn(&mut server, "Board");
    let mut leaver = connect_client(&network, &mut server, start);

    client_rpc(&mut leaver, "Scribble", view, Destination::Broadcast, start);
    pump(&mut server, &mut [&mut leaver], start);
    assert_eq!(server.server.buffered_count(), 2);

    leaver.client.disconnect(start);
    pump(&mut server, &mut [&mut leaver], start);
    assert_eq!(server.server.buffered_count(), 1);

    let late = connect_client(&network, &mut server, start);
    assert_eq!(late.log.spawns, vec![view]);
    assert!(late.log.rpcs.is_empty());
}

#[test]
fn test_backlog_survives_disconnect_when_pruning_is_off() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let config = ServerConfig {
        prune_buffered_on_disconnect: false,
        ..Default::default()
    };
    let mut server = start_server(&network, config, start);
    let view = spawn(&mut server, "Board");
    let mut leaver = connect_client(&network, &mut server, start);

    client_rpc(&mut leaver, "Scribble", view, Destination::Broadcast, start);
    pump(&mut server, &mut [&mut leaver], start);
    leaver.client.disconnect(start);
    pump(&mut server, &mut [&mut leaver], start);

    let late = connect_client(&network, &mut server, start);
    assert_eq!(late.log.rpc_names(), vec!["Scribble"]);
}

#[test]
fn test_removed_rpcs_are_not_replayed() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let view = spawn(&mut server, "Door");
    server_rpc(&mut server, "Open", view, start);
    server_rpc(&mut server, "Paint", view, start);
    server_rpc(&mut server, "Open", view, start);

    assert_eq!(server.server.remove_rpcs(view, Some("Open")), 2);
    let late = connect_client(&network, &mut server, start);
    assert_eq!(late.log.rpc_names(), vec!["Paint"]);

    assert_eq!(server.server.remove_rpcs(view, None), 1);
    let later = connect_client(&network, &mut server, start);
    assert_eq!(later.log.spawns, vec![view]);
    assert!(later.log.rpcs.is_empty());
}

#[test]
fn test_removed_group_backlog_hides_its_views_from_late_joiners() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let view = spawn(&mut server, "Tree");
    server_rpc(&mut server, "Grow", view, start);

    assert_eq!(server.server.remove_group_backlog(GroupId::DEFAULT), vec![view]);
    assert_eq!(server.server.buffered_count(), 0);
    let late = connect_client(&network, &mut server, start);
    assert!(late.log.spawns.is_empty());
    assert!(late.log.rpcs.is_empty());
}

#[test]
fn test_destroyed_view_is_forgotten() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, ServerConfig::default(), start);
    let mut early = connect_client(&network, &mut server, start);
    let view = spawn(&mut server, "Balloon");
    server_rpc(&mut server, "Inflate", view, start);

    server.server.destroy(view).unwrap();
    pump(&mut server, &mut [&mut early], start);
    assert_eq!(early.log.spawns, vec![view]);
    assert_eq!(early.log.despawns, vec![view]);
    assert_eq!(early.host.destroyed, vec![view]);
    assert_eq!(server.server.buffered_count(), 0);

    let late = connect_client(&network, &mut server, start);
    assert!(late.log.spawns.is_empty());
    assert_eq!(
        server.server.destroy(view),
        Err(ServerError::UnknownView { view })
    );
}
