/// End-to-end tests of visibility groups: hidden groups, membership changes,
/// moving views between groups and culling
use std::time::Instant;

use weft_server::{ServerConfig, ServerError};
use weft_shared::{BitStream, Destination, GroupFlags, GroupId, MessageFlags, PeerId, ViewId};
use weft_test::{connect_client, pump, server_address, MemoryNetwork, TestServer};

const VAULT: GroupId = GroupId(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_server(network: &MemoryNetwork, now: Instant) -> TestServer {
    TestServer::listen(network, ServerConfig::default(), server_address(), now)
}

fn spawn_in(server: &mut TestServer, group: GroupId, prefab: &str) -> ViewId {
    server
        .server
        .instantiate(PeerId::SERVER, group, prefab, BitStream::new())
        .unwrap()
}

fn buffered_rpc(server: &mut TestServer, name: &str, view: ViewId, now: Instant) {
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

// ========== Membership Tests ==========

#[test]
fn test_hidden_group_is_seen_by_members_only() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, start);
    server
        .server
        .set_group_flags(VAULT, GroupFlags::HIDE_FROM_NON_MEMBERS);
    let mut member = connect_client(&network, &mut server, start);
    let mut outsider = connect_client(&network, &mut server, start);

    let chest = spawn_in(&mut server, VAULT, "Chest");
    buffered_rpc(&mut server, "Unlock", chest, start);
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert!(member.log.spawns.is_empty());
    assert!(outsider.log.spawns.is_empty());

    server.server.add_to_group(member.peer(), VAULT).unwrap();
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(member.log.spawns, vec![chest]);
    assert_eq!(member.log.rpc_names(), vec!["Unlock"]);
    assert!(outsider.log.spawns.is_empty());
    assert!(outsider.log.rpcs.is_empty());

    // live traffic follows membership too
    buffered_rpc(&mut server, "Lock", chest, start);
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(member.log.rpc_names(), vec!["Unlock", "Lock"]);
    assert!(outsider.log.rpcs.is_empty());

    server.server.remove_from_group(member.peer(), VAULT).unwrap();
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(member.log.despawns, vec![chest]);
    assert!(outsider.log.despawns.is_empty());
}

#[test]
fn test_unhiding_flushes_the_backlog_once() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, start);
    server
        .server
        .set_group_flags(VAULT, GroupFlags::HIDE_FROM_NON_MEMBERS);
    let mut member = connect_client(&network, &mut server, start);
    let mut outsider = connect_client(&network, &mut server, start);
    server.server.add_to_group(member.peer(), VAULT).unwrap();

    let chest = spawn_in(&mut server, VAULT, "Chest");
    buffered_rpc(&mut server, "Shine", chest, start);
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(member.log.spawns, vec![chest]);

    server.server.set_group_flags(VAULT, GroupFlags::empty());
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(outsider.log.spawns, vec![chest]);
    assert_eq!(outsider.log.rpc_names(), vec!["Shine"]);
    assert_eq!(member.log.spawns, vec![chest]);
    assert_eq!(member.log.rpc_names(), vec!["Shine"]);

    // hiding it again takes it away from the outsider only
    server
        .server
        .set_group_flags(VAULT, GroupFlags::HIDE_FROM_NON_MEMBERS);
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(outsider.log.despawns, vec![chest]);
    assert!(member.log.despawns.is_empty());
    assert_eq!(
        server.server.group_flags(VAULT),
        GroupFlags::HIDE_FROM_NON_MEMBERS
    );
}

#[test]
fn test_auto_admit_group_takes_in_newcomers() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, start);
    server.server.set_group_flags(
        VAULT,
        GroupFlags::HIDE_FROM_NON_MEMBERS | GroupFlags::AUTO_ADMIT,
    );
    let chest = spawn_in(&mut server, VAULT, "Chest");

    let newcomer = connect_client(&network, &mut server, start);
    assert_eq!(newcomer.log.spawns, vec![chest]);
}

#[test]
fn test_membership_of_unknown_peer_is_an_error() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, start);

    assert_eq!(
        server.server.add_to_group(PeerId(9), VAULT),
        Err(ServerError::UnknownPeer { peer: PeerId(9) })
    );
    assert_eq!(
        server.server.remove_from_group(PeerId(9), VAULT),
        Err(ServerError::UnknownPeer { peer: PeerId(9) })
    );
}

// ========== Group Change Tests ==========

#[test]
fn test_moving_a_view_between_groups() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, start);
    server
        .server
        .set_group_flags(VAULT, GroupFlags::HIDE_FROM_NON_MEMBERS);
    let mut member = connect_client(&network, &mut server, start);
    let mut outsider = connect_client(&network, &mut server, start);
    server.server.add_to_group(member.peer(), VAULT).unwrap();

    let coin = spawn_in(&mut server, GroupId::DEFAULT, "Coin");
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(member.log.spawns, vec![coin]);
    assert_eq!(outsider.log.spawns, vec![coin]);

    server.server.set_view_group(coin, VAULT).unwrap();
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(member.log.group_changes, vec![(coin, VAULT)]);
    assert_eq!(outsider.log.despawns, vec![coin]);
    assert_eq!(server.server.view(coin).map(|record| record.group), Some(VAULT));

    // a newcomer outside the vault never hears of it
    let stranger = connect_client(&network, &mut server, start);
    assert!(stranger.log.spawns.is_empty());

    server.server.set_view_group(coin, GroupId::DEFAULT).unwrap();
    pump(&mut server, &mut [&mut member, &mut outsider], start);
    assert_eq!(
        member.log.group_changes,
        vec![(coin, VAULT), (coin, GroupId::DEFAULT)]
    );
    assert_eq!(outsider.log.spawns, vec![coin, coin]);
    assert_eq!(
        outsider.host.views.get(&coin).map(|info| info.group),
        Some(GroupId::DEFAULT)
    );
}

#[test]
fn test_moving_an_unknown_view_is_an_error() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, start);

    assert_eq!(
        server.server.set_view_group(ViewId(42), VAULT),
        Err(ServerError::UnknownView { view: ViewId(42) })
    );
}

// ========== Culling Tests ==========

#[test]
fn test_culled_peer_misses_rpcs_until_restored() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = start_server(&network, start);
    let mut near = connect_client(&network, &mut server, start);
    let mut far = connect_client(&network, &mut server, start);
    let torch = spawn_in(&mut server, GroupId::DEFAULT, "Torch");

    server.server.set_culled(torch, far.peer(), true);
    server
        .server
        .send_rpc(
            "Flicker",
            torch,
            Destination::Broadcast,
            MessageFlags::RELIABLE,
            BitStream::new(),
            start,
        )
        .unwrap();
    pump(&mut server, &mut [&mut near, &mut far], start);
    assert_eq!(near.log.rpc_names(), vec!["Flicker"]);
    assert!(far.log.rpcs.is_empty());

    server.server.set_culled(torch, far.peer(), false);
    server
        .server
        .send_rpc(
            "Flare",
            torch,
            Destination::Broadcast,
            MessageFlags::RELIABLE,
            BitStream::new(),
            start,
        )
        .unwrap();
    pump(&mut server, &mut [&mut near, &mut far], start);
    assert_eq!(far.log.rpc_names(), vec!["Flare"]);
}
