use std::any::Any;

use weft_serde::{BitStream, CodecRegistry, SerdeErr, TypeTag};

use crate::types::{PeerId, ViewId};

use super::{flags::MessageFlags, header::Selector, network_message::NetworkMessage};

/// A named remote procedure call as delivered to the application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rpc {
    /// The peer that issued the call
    pub sender: PeerId,
    pub name: String,
    pub view: ViewId,
    pub args: BitStream,
    /// Network time at which the call was made
    pub timestamp_ms: Option<u64>,
    pub buffered: bool,
    /// Arguments are a tagged list written through a [`CodecRegistry`]
    pub typed: bool,
}

impl Rpc {
    /// Unpack a named message. `connection_peer` is the peer the message
    /// arrived from; a relayed message names its original sender instead.
    pub fn from_message(message: NetworkMessage, connection_peer: PeerId) -> Option<Self> {
        let buffered = message.is_buffered();
        let typed = message.flags().contains(MessageFlags::TYPED);
        let NetworkMessage { header, payload } = message;
        match header.selector {
            Selector::Named { name, view } => Some(Self {
                sender: header.sender.unwrap_or(connection_peer),
                name,
                view,
                args: payload,
                timestamp_ms: header.timestamp_ms,
                buffered,
                typed,
            }),
            Selector::Internal { .. } => None,
        }
    }

    /// Decode the arguments of a typed call. Untyped calls have no tags to
    /// read and yield `None`.
    pub fn typed_args(
        &self,
        registry: &CodecRegistry,
    ) -> Option<Result<Vec<(TypeTag, Box<dyn Any>)>, SerdeErr>> {
        if !self.typed {
            return None;
        }
        Some(registry.read_tagged_list(&mut self.args.to_reader()))
    }
}
