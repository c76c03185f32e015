/// Property tests of buffered replay: whatever mix of calls the server makes,
/// a late joiner sees them in the order they were made
use std::time::Instant;

use proptest::prelude::*;

use weft_server::ServerConfig;
use weft_shared::{BitStream, Destination, GroupId, MessageFlags, PeerId, ViewId};
use weft_test::{connect_client, server_address, MemoryNetwork, TestServer};

// ========== Replay Order Properties ==========

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_replay_keeps_call_order(calls in prop::collection::vec((0usize..3, 0u8..4), 1..24)) {
        let network = MemoryNetwork::new();
        let start = Instant::now();
        let mut server =
            TestServer::listen(&network, ServerConfig::default(), server_address(), start);
        let views: Vec<ViewId> = (0..3)
            .map(|_| {
                server
                    .server
                    .instantiate(PeerId::SERVER, GroupId::DEFAULT, "Crate", BitStream::new())
                    .unwrap()
            })
            .collect();

        let mut expected = Vec::new();
        for (index, action) in &calls {
            let name = format!("Action{}", action);
            server
                .server
                .send_rpc(
                    &name,
                    views[*index],
                    Destination::Broadcast,
                    MessageFlags::BUFFERED,
                    BitStream::new(),
                    start,
                )
                .unwrap();
            expected.push((views[*index], name));
        }

        let late = connect_client(&network, &mut server, start);
        let seen: Vec<(ViewId, String)> = late
            .log
            .rpcs
            .iter()
            .map(|rpc| (rpc.view, rpc.name.clone()))
            .collect();
        prop_assert_eq!(late.log.spawns.clone(), views);
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn test_removing_a_name_keeps_the_rest_in_order(calls in prop::collection::vec(0u8..3, 1..24)) {
        let network = MemoryNetwork::new();
        let start = Instant::now();
        let mut server =
            TestServer::listen(&network, ServerConfig::default(), server_address(), start);
        let view = server
            .server
            .instantiate(PeerId::SERVER, GroupId::DEFAULT, "Crate", BitStream::new())
            .unwrap();

        for action in &calls {
            server
                .server
                .send_rpc(
                    &format!("Action{}", action),
                    view,
                    Destination::Broadcast,
                    MessageFlags::BUFFERED,
                    BitStream::new(),
                    start,
                )
                .unwrap();
        }
        let removed = server.server.remove_rpcs(view, Some("Action0"));
        prop_assert_eq!(removed, calls.iter().filter(|action| **action == 0).count());

        let late = connect_client(&network, &mut server, start);
        let expected: Vec<String> = calls
            .iter()
            .filter(|action| **action != 0)
            .map(|action| format!("Action{}", action))
            .collect();
        prop_assert_eq!(late.log.rpc_names(), expected);
    }
}
