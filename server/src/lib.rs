//! # Weft Server
//! The authoritative end of a weft session. Approves connect requests,
//! relays RPCs between peers, replicates views to whoever can see them and
//! replays buffered messages to peers that join late. Can also run as a
//! directory that lists hosted games.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod shared {
    pub use weft_shared::{
        BitStream, CodecRegistry, ConnectionConfig, ConnectionError, ConnectionHandle, Destination,
        DeserializeInfo, EntityHost, GroupFlags, GroupId, HostData, MessageFlags, PeerId,
        ReplicationConfig, Rpc, Security, SecurityFactory, SerializeInfo, Serde, SerdeErr,
        SpawnInfo, StateChannel, StateSyncMode, Transport, TransportEvent, TypeTag,
        UnsignedInteger, UnsignedVariableInteger, ViewId,
    };
}

mod directory;
mod error;
mod events;
mod handover;
mod peer;
mod server;
mod view;

pub use directory::DirectoryRegistry;
pub use error::{HandoverError, ServerError};
pub use events::{
    ApprovalEvent, ApprovalRequest, ConnectEvent, DenyEvent, DisconnectEvent, ErrorEvent, Event,
    Events, HandoverArrival, HandoverEvent, RpcEvent,
};
pub use handover::{HandoverSession, HandoverSessions};
pub use peer::Peer;
pub use server::{Server, ServerConfig};
pub use view::ViewRecord;
