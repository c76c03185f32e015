use weft_serde::{BitStream, Serde, UnsignedInteger};

use crate::types::{PeerId, ViewId};

use super::{
    error::WireError, flags::MessageFlags, opcode::InternalCode, timestamp::TimestampWidth,
};

/// Who a message is meant for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Only the server (or directory) processes it
    ToServer,
    /// One specific peer; the server relays it
    Target(PeerId),
    /// Every peer, including the server
    Broadcast,
    /// Every peer except the one named
    BroadcastExcept(PeerId),
}

impl Destination {
    fn kind(&self) -> u8 {
        match self {
            Self::ToServer => 0,
            Self::Target(_) => 1,
            Self::Broadcast => 2,
            Self::BroadcastExcept(_) => 3,
        }
    }

    /// Whether `peer` is among the recipients
    pub fn includes(&self, peer: PeerId) -> bool {
        match self {
            Self::ToServer => peer.is_server(),
            Self::Target(target) => *target == peer,
            Self::Broadcast => true,
            Self::BroadcastExcept(excluded) => *excluded != peer,
        }
    }
}

/// What the receiver executes: an internal opcode or a named RPC
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Selector {
    Internal {
        opcode: InternalCode,
        view: Option<ViewId>,
    },
    Named {
        name: String,
        view: ViewId,
    },
}

impl Selector {
    pub fn view(&self) -> Option<ViewId> {
        match self {
            Self::Internal { view, .. } => *view,
            Self::Named { view, .. } => Some(*view),
        }
    }

    pub fn opcode(&self) -> Option<InternalCode> {
        match self {
            Self::Internal { opcode, .. } => Some(*opcode),
            Self::Named { .. } => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Internal { .. } => None,
            Self::Named { name, .. } => Some(name),
        }
    }
}

/// Every field of an envelope except the payload.
///
/// Header byte, least significant bit first:
///
/// | bits | field |
/// |------|-------|
/// | 0    | explicit sender present |
/// | 1-2  | destination: to-server, has-target, broadcast, broadcast-except |
/// | 3-4  | selector: opcode, name+view, opcode+view, name+view+buffered |
/// | 5-6  | timestamp: none, 16, 24 or 40 bits |
/// | 7    | typed payload |
///
/// Then, in order: sender id, target or excluded id, opcode byte and/or
/// name, view id, truncated timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Original sender, only written when a relay forwards the message
    pub sender: Option<PeerId>,
    pub destination: Destination,
    pub selector: Selector,
    pub flags: MessageFlags,
    /// Network time in milliseconds
    pub timestamp_ms: Option<u64>,
}

impl MessageHeader {
    pub fn timestamp_width(&self) -> TimestampWidth {
        if self.timestamp_ms.is_none() {
            return TimestampWidth::None;
        }
        TimestampWidth::for_flags(self.flags | MessageFlags::TIMESTAMPED)
    }

    fn selector_kind(&self) -> u8 {
        match &self.selector {
            Selector::Internal { view: None, .. } => 0,
            Selector::Named { .. } if self.flags.is_buffered() => 3,
            Selector::Named { .. } => 1,
            Selector::Internal { view: Some(_), .. } => 2,
        }
    }

    pub fn encode(&self, stream: &mut BitStream) {
        let width = self.timestamp_width();

        stream.write_bit(self.sender.is_some());
        UnsignedInteger::<2>::truncated(self.destination.kind() as u64).ser(stream);
        UnsignedInteger::<2>::truncated(self.selector_kind() as u64).ser(stream);
        UnsignedInteger::<2>::truncated(width.kind() as u64).ser(stream);
        stream.write_bit(self.flags.contains(MessageFlags::TYPED));

        if let Some(sender) = &self.sender {
            sender.ser(stream);
        }
        match &self.destination {
            Destination::Target(peer) | Destination::BroadcastExcept(peer) => peer.ser(stream),
            Destination::ToServer | Destination::Broadcast => {}
        }
        match &self.selector {
            Selector::Internal { opcode, view } => {
                opcode.ser(stream);
                if let Some(view) = view {
                    view.ser(stream);
                }
            }
            Selector::Named { name, view } => {
                stream.write_string(name);
                view.ser(stream);
            }
        }
        if let Some(timestamp_ms) = self.timestamp_ms {
            width.write(stream, timestamp_ms);
        }
    }

    /// Read a header, leaving the cursor at the start of the payload.
    ///
    /// `reliable` tells whether the datagram came over a reliable channel;
    /// the timestamp is unwrapped against `now_ms`.
    pub fn decode(stream: &mut BitStream, now_ms: u64, reliable: bool) -> Result<Self, WireError> {
        let has_sender = stream.read_bit()?;
        let destination_kind = UnsignedInteger::<2>::de(stream)?.get();
        let selector_kind = UnsignedInteger::<2>::de(stream)?.get();
        let width = TimestampWidth::from_kind(UnsignedInteger::<2>::de(stream)?.get() as u8);
        let typed = stream.read_bit()?;

        let sender = if has_sender {
            Some(PeerId::de(stream)?)
        } else {
            None
        };
        let destination = match destination_kind {
            0 => Destination::ToServer,
            1 => Destination::Target(PeerId::de(stream)?),
            2 => Destination::Broadcast,
            _ => Destination::BroadcastExcept(PeerId::de(stream)?),
        };

        let mut flags = MessageFlags::empty();
        if reliable {
            flags |= MessageFlags::RELIABLE;
        }
        if typed {
            flags |= MessageFlags::TYPED;
        }

        let selector = match selector_kind {
            0 | 2 => {
                let opcode_byte = stream.read_u8()?;
                let opcode = InternalCode::try_from(opcode_byte)
                    .map_err(|opcode| WireError::UnknownOpcode { opcode })?;
                let view = if selector_kind == 2 {
                    Some(ViewId::de(stream)?)
                } else {
                    None
                };
                Selector::Internal { opcode, view }
            }
            _ => {
                if selector_kind == 3 {
                    flags |= MessageFlags::BUFFERED | MessageFlags::RELIABLE;
                }
                let name = stream.read_string()?;
                let view = ViewId::de(stream)?;
                Selector::Named { name, view }
            }
        };

        let timestamp_ms = width.read(stream, now_ms)?;
        if timestamp_ms.is_some() {
            flags |= MessageFlags::TIMESTAMPED;
        }

        Ok(Self {
            sender,
            destination,
            selector,
            flags,
            timestamp_ms,
        })
    }
}
