//! # Weft Client
//! Connects to a weft server, sends RPCs through it and applies the state
//! of the views it replicates. [`DirectoryClient`] talks to a directory
//! service instead.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod shared {
    pub use weft_shared::{
        BitStream, CodecRegistry, ConnectionConfig, ConnectionError, ConnectionState, Destination,
        DeserializeInfo, EntityHost, GroupId, HostData, MessageFlags, PeerId, Rpc, Security,
        SecurityFactory, SerializeInfo, Serde, SerdeErr, SpawnInfo, StateChannel, Transport,
        TransportEvent, TypeTag, UnsignedInteger, UnsignedVariableInteger, ViewId,
    };
}

mod client;
mod client_config;
mod directory_client;
mod error;
mod events;

pub use client::Client;
pub use client_config::ClientConfig;
pub use directory_client::DirectoryClient;
pub use error::ClientError;
pub use events::{
    ConnectEvent, ConnectionFailedEvent, DespawnEvent, DirectoryReply, DirectoryReplyEvent,
    DisconnectEvent, Event, Events, GroupChangeEvent, HandoverTokenEvent, RedirectEvent, RpcEvent,
    SpawnEvent,
};
