//! # Weft Shared
//! Common functionality shared between weft-server & weft-client crates:
//! the wire envelope, connection lifecycle types, the replication scheduler
//! and the buffered-message store.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use weft_serde::{
    builtin_tags, wire_enum, wire_struct, BitStream, CodecRegistry, RegistryError, Serde,
    SerdeErr, TypeTag, UnsignedInteger, UnsignedVariableInteger, WireFields, ARRAY_FLAG,
    FIRST_USER_TAG, MAX_ARRAY_ITEMS, NULLABLE_FLAG,
};

mod buffered;
mod connection;
mod replication;
mod time;
mod types;
mod wire;

pub use buffered::{
    group_buffer::{BufferedMessage, GroupBuffers},
    visibility::{GroupFlags, VisibilityGroups},
};
pub use connection::{
    connection_config::{ConnectionConfig, PROTOCOL_VERSION},
    connection_state::ConnectionState,
    error::{ConnectionError, IdentityError, TransportError},
    identity_pool::IdentityPool,
    link::{Link, PeerStats, RELIABLE_CHANNEL},
    security::{Security, SecurityFactory, SecurityStatus},
    tick_pool::TickPool,
    transport::{Channel, Outgoing, ReliableChannel, Transport, TransportEvent},
};
pub use replication::{
    delta::{self as delta_codec, DeltaOutcome},
    entity_host::{DeserializeInfo, EntityHost, SerializeInfo, SpawnInfo},
    error::ReplicationError,
    handover as handover_instances,
    receiver::ReplicationReceiver,
    replication_config::ReplicationConfig,
    scheduler::{Audience, ReplicationScheduler, StateUpdate},
    snapshot::{CompressedSnapshot, SnapshotReceiver, SnapshotSender},
    state_sync::StateSyncMode,
};
pub use time::{NetworkClock, Timer};
pub use types::{ConnectionHandle, GroupId, PeerId, Role, ViewId};
pub use wire::{
    error::WireError,
    flags::MessageFlags,
    frame::{self, OpenedFrame, PLAIN_FRAME, SECURE_FRAME},
    header::{Destination, MessageHeader, Selector},
    internal_message::{HostData, InternalMessage, StateChannel},
    network_message::NetworkMessage,
    opcode::InternalCode,
    rpc::Rpc,
    timestamp::{TimestampWidth, MAX_FORWARD_SKEW_MS},
};
