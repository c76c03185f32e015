/// End-to-end tests of RPCs whose arguments carry codec registry type tags
use std::time::Instant;

use weft_client::ClientError;
use weft_server::ServerConfig;
use weft_shared::{
    builtin_tags, BitStream, CodecRegistry, Destination, GroupId, MessageFlags, PeerId, Serde,
    SerdeErr, TypeTag, ViewId, NULLABLE_FLAG,
};
use weft_test::{connect_client, pump, server_address, MemoryNetwork, TestServer};

const AIM_TAG: TypeTag = 20;

#[derive(Debug, Clone, PartialEq)]
struct Aim {
    yaw: i16,
    pitch: i16,
}

impl Serde for Aim {
    fn ser(&self, stream: &mut BitStream) {
        self.yaw.ser(stream);
        self.pitch.ser(stream);
    }

    fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
        Ok(Self {
            yaw: i16::de(stream)?,
            pitch: i16::de(stream)?,
        })
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn registry_with_aim() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    registry.register::<Aim>(AIM_TAG).unwrap();
    registry
}

fn spawn(server: &mut TestServer) -> ViewId {
    server
        .server
        .instantiate(PeerId::SERVER, GroupId::DEFAULT, "Turret", BitStream::new())
        .unwrap()
}

// ========== Typed Argument Tests ==========

#[test]
fn test_typed_rpc_reaches_server_and_observers() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = TestServer::listen(&network, ServerConfig::default(), server_address(), start);
    let mut gunner = connect_client(&network, &mut server, start);
    let mut observer = connect_client(&network, &mut server, start);
    let turret = spawn(&mut server);
    gunner.client.registry_mut().register::<Aim>(AIM_TAG).unwrap();

    let aim = Aim { yaw: -90, pitch: 15 };
    gunner
        .client
        .send_typed_rpc(
            "Fire",
            turret,
            Destination::Broadcast,
            MessageFlags::BUFFERED,
            &[&aim, &3u8],
            start,
        )
        .unwrap();
    pump(&mut server, &mut [&mut gunner, &mut observer], start);

    let registry = registry_with_aim();
    let heard = &server.log.rpcs[0];
    assert!(heard.typed);
    let values = heard.typed_args(&registry).unwrap().unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].0, AIM_TAG);
    assert_eq!(values[0].1.downcast_ref::<Aim>(), Some(&aim));
    assert_eq!(values[1].1.downcast_ref::<u8>(), Some(&3));

    let relayed = &observer.log.rpcs[0];
    assert!(relayed.typed);
    assert_eq!(relayed.sender, gunner.peer());
    let values = relayed.typed_args(&registry).unwrap().unwrap();
    assert_eq!(values[0].1.downcast_ref::<Aim>(), Some(&aim));

    // the replayed copy keeps its tags
    let late = connect_client(&network, &mut server, start);
    let replayed = &late.log.rpcs[0];
    assert!(replayed.typed);
    let values = replayed.typed_args(&registry).unwrap().unwrap();
    assert_eq!(values[1].1.downcast_ref::<u8>(), Some(&3));
}

#[test]
fn test_server_typed_rpc_decodes_tag_by_tag() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = TestServer::listen(&network, ServerConfig::default(), server_address(), start);
    let mut client = connect_client(&network, &mut server, start);
    let turret = spawn(&mut server);

    server
        .server
        .send_typed_rpc(
            "Announce",
            turret,
            Destination::Target(client.peer()),
            MessageFlags::RELIABLE,
            &[&"ready".to_string(), &Some(7u32)],
            start,
        )
        .unwrap();
    pump(&mut server, &mut [&mut client], start);

    let rpc = &client.log.rpcs[0];
    assert!(rpc.typed);
    let registry = client.client.registry();
    let mut reader = rpc.args.to_reader();
    assert_eq!(reader.read_var_u64().unwrap(), 2);
    let (tag, value) = registry.read_tagged_any(&mut reader).unwrap();
    assert_eq!(tag, builtin_tags::STRING);
    assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("ready"));
    let (tag, value) = registry.read_tagged_any(&mut reader).unwrap();
    assert_eq!(tag, builtin_tags::U32 | NULLABLE_FLAG);
    assert_eq!(value.downcast_ref::<Option<u32>>(), Some(&Some(7)));
}

#[test]
fn test_untyped_rpc_has_no_typed_args() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = TestServer::listen(&network, ServerConfig::default(), server_address(), start);
    let mut client = connect_client(&network, &mut server, start);
    let turret = spawn(&mut server);

    client
        .client
        .send_rpc(
            "Reload",
            turret,
            Destination::ToServer,
            MessageFlags::RELIABLE,
            BitStream::new(),
            start,
        )
        .unwrap();
    pump(&mut server, &mut [&mut client], start);

    assert!(!server.log.rpcs[0].typed);
    assert!(server.log.rpcs[0].typed_args(server.server.registry()).is_none());
}

#[test]
fn test_unregistered_argument_type_is_refused() {
    init_logging();
    let network = MemoryNetwork::new();
    let start = Instant::now();
    let mut server = TestServer::listen(&network, ServerConfig::default(), server_address(), start);
    let mut client = connect_client(&network, &mut server, start);
    let turret = spawn(&mut server);

    let result = client.client.send_typed_rpc(
        "Fire",
        turret,
        Destination::ToServer,
        MessageFlags::RELIABLE,
        &[&Aim { yaw: 0, pitch: 0 }],
        start,
    );
    assert!(matches!(
        result,
        Err(ClientError::Serde(SerdeErr::UnknownType { .. }))
    ));
    pump(&mut server, &mut [&mut client], start);
    assert!(server.log.rpcs.is_empty());
}
