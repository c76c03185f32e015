use weft_serde::BitStream;

use crate::types::{PeerId, ViewId};

use super::{
    error::WireError,
    flags::MessageFlags,
    header::{Destination, MessageHeader, Selector},
    opcode::InternalCode,
};

/// An envelope: header plus an opaque payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkMessage {
    pub header: MessageHeader,
    pub payload: BitStream,
}

impl NetworkMessage {
    pub fn internal(
        opcode: InternalCode,
        view: Option<ViewId>,
        destination: Destination,
        flags: MessageFlags,
        payload: BitStream,
    ) -> Self {
        Self {
            header: MessageHeader {
                sender: None,
                destination,
                selector: Selector::Internal { opcode, view },
                // only named messages are buffered on the wire
                flags: flags.normalized() - MessageFlags::BUFFERED,
                timestamp_ms: None,
            },
            payload,
        }
    }

    pub fn named(
        name: impl Into<String>,
        view: ViewId,
        destination: Destination,
        flags: MessageFlags,
        payload: BitStream,
    ) -> Self {
        Self {
            header: MessageHeader {
                sender: None,
                destination,
                selector: Selector::Named {
                    name: name.into(),
                    view,
                },
                flags: flags.normalized(),
                timestamp_ms: None,
            },
            payload,
        }
    }

    pub fn with_timestamp(mut self, time_ms: u64) -> Self {
        self.header.timestamp_ms = Some(time_ms);
        self.header.flags |= MessageFlags::TIMESTAMPED;
        self
    }

    pub fn with_sender(mut self, sender: PeerId) -> Self {
        self.header.sender = Some(sender);
        self
    }

    pub fn flags(&self) -> MessageFlags {
        self.header.flags
    }

    pub fn opcode(&self) -> Option<InternalCode> {
        self.header.selector.opcode()
    }

    pub fn name(&self) -> Option<&str> {
        self.header.selector.name()
    }

    pub fn view(&self) -> Option<ViewId> {
        self.header.selector.view()
    }

    pub fn is_buffered(&self) -> bool {
        self.header.flags.is_buffered()
    }

    pub fn encode(&self, stream: &mut BitStream) {
        self.header.encode(stream);
        stream.append(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut stream = BitStream::new();
        self.encode(&mut stream);
        stream.to_bytes()
    }

    /// Decode a header and copy the rest of the stream out as the payload
    pub fn decode(stream: &mut BitStream, now_ms: u64, reliable: bool) -> Result<Self, WireError> {
        let header = MessageHeader::decode(stream, now_ms, reliable)?;
        let payload = stream.get_remaining_bit_stream();
        Ok(Self { header, payload })
    }

    pub fn from_bytes(bytes: &[u8], now_ms: u64, reliable: bool) -> Result<Self, WireError> {
        Self::decode(&mut BitStream::from_bytes(bytes), now_ms, reliable)
    }

    /// Re-encode `header` and copy the payload of `source` verbatim from its
    /// cursor to its end. Used by relays so arguments are never re-encoded.
    pub fn forward(header: &MessageHeader, source: &BitStream) -> BitStream {
        let mut stream = BitStream::with_capacity(source.remaining_bytes() + 16);
        header.encode(&mut stream);
        stream.append_remaining(source);
        stream
    }
}
