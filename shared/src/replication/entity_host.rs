use weft_serde::BitStream;

use crate::{
    types::{GroupId, PeerId, ViewId},
    wire::internal_message::StateChannel,
};

/// Context handed to the host when it serializes a view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerializeInfo {
    pub view: ViewId,
    pub owner: PeerId,
    /// Network time of the snapshot
    pub time_ms: u64,
}

/// Context handed to the host when it applies a received snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeserializeInfo {
    pub view: ViewId,
    pub channel: StateChannel,
    pub sender: PeerId,
    pub timestamp_ms: Option<u64>,
}

/// Everything needed to bring a replicated view into existence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnInfo {
    pub view: ViewId,
    pub owner: PeerId,
    pub group: GroupId,
    pub prefab: String,
    /// Application data written by the creator
    pub data: BitStream,
}

/// The application side of replication: binds view ids to whatever objects
/// the application simulates.
///
/// Serializers return `false` when there is nothing to send this tick.
pub trait EntityHost {
    /// State sent to every observer that does not own the view
    fn serialize_proxy(&mut self, stream: &mut BitStream, info: &SerializeInfo) -> bool;

    /// State sent only to the owner
    fn serialize_owner(&mut self, _stream: &mut BitStream, _info: &SerializeInfo) -> bool {
        false
    }

    /// State mirrored to secondary authorities
    fn serialize_cell_proxy(&mut self, _stream: &mut BitStream, _info: &SerializeInfo) -> bool {
        false
    }

    /// Payload carried along when authority over the view moves elsewhere
    fn serialize_handover(&mut self, _stream: &mut BitStream, _view: ViewId) -> bool {
        false
    }

    /// Apply a received snapshot
    fn deserialize(&mut self, stream: &mut BitStream, info: &DeserializeInfo);

    fn instantiate(&mut self, _info: SpawnInfo) {}

    fn destroy(&mut self, _view: ViewId) {}
}
