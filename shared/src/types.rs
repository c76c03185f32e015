use std::fmt;

use weft_serde::{BitStream, Serde, SerdeErr};

/// Identity of one connected participant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The authoritative server (or directory) of a session
    pub const SERVER: PeerId = PeerId(0);
    /// A peer whose identity has not been assigned yet
    pub const UNASSIGNED: PeerId = PeerId(u32::MAX);
    /// The first identity handed to a client
    pub const FIRST_CLIENT: PeerId = PeerId(1);

    pub fn is_server(&self) -> bool {
        *self == Self::SERVER
    }

    pub fn is_assigned(&self) -> bool {
        *self != Self::UNASSIGNED
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SERVER => write!(f, "P0(server)"),
            Self::UNASSIGNED => write!(f, "P?"),
            PeerId(id) => write!(f, "P{}", id),
        }
    }
}

/// Identity of one replicated object, shared by every peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u32);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// Identity of a visibility group
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl GroupId {
    /// The group every view belongs to unless told otherwise
    pub const DEFAULT: GroupId = GroupId(0);
}

/// A transport-level connection, valid from the transport's `Connected`
/// event until its `Disconnected` event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
    Directory,
}

macro_rules! impl_var_id {
    ($name:ident) => {
        impl Serde for $name {
            fn ser(&self, stream: &mut BitStream) {
                stream.write_var_u32(self.0);
            }

            fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
                Ok($name(stream.read_var_u32()?))
            }
        }
    };
}

impl_var_id!(PeerId);
impl_var_id!(ViewId);
impl_var_id!(GroupId);
