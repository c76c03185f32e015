use std::collections::{BTreeMap, HashMap};

use weft_shared::{
    BitStream, DeserializeInfo, EntityHost, SerializeInfo, SpawnInfo, StateChannel, ViewId,
};

/// A snapshot applied by the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedState {
    pub view: ViewId,
    pub channel: StateChannel,
    pub bytes: Vec<u8>,
}

/// An entity host that serializes whatever bytes the test hands it and
/// records everything it is asked to apply
#[derive(Default)]
pub struct RecordingHost {
    /// Proxy state per view; views without an entry have nothing to send
    pub proxy_states: HashMap<ViewId, Vec<u8>>,
    pub owner_states: HashMap<ViewId, Vec<u8>>,
    pub cell_states: HashMap<ViewId, Vec<u8>>,
    pub handover_states: HashMap<ViewId, Vec<u8>>,
    /// Views instantiated on this side, by id
    pub views: BTreeMap<ViewId, SpawnInfo>,
    pub destroyed: Vec<ViewId>,
    pub applied: Vec<AppliedState>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_proxy_state(&mut self, view: ViewId, bytes: &[u8]) {
        self.proxy_states.insert(view, bytes.to_vec());
    }

    pub fn set_owner_state(&mut self, view: ViewId, bytes: &[u8]) {
        self.owner_states.insert(view, bytes.to_vec());
    }

    /// The last state applied to `view` on `channel`
    pub fn latest(&self, view: ViewId, channel: StateChannel) -> Option<&[u8]> {
        self.applied
            .iter()
            .rev()
            .find(|state| state.view == view && state.channel == channel)
            .map(|state| state.bytes.as_slice())
    }

    fn write(states: &HashMap<ViewId, Vec<u8>>, stream: &mut BitStream, view: ViewId) -> bool {
        match states.get(&view) {
            Some(bytes) => {
                stream.write_raw(bytes);
                true
            }
            None => false,
        }
    }
}

impl EntityHost for RecordingHost {
    fn serialize_proxy(&mut self, stream: &mut BitStream, info: &SerializeInfo) -> bool {
        Self::write(&self.proxy_states, stream, info.view)
    }

    fn serialize_owner(&mut self, stream: &mut BitStream, info: &SerializeInfo) -> bool {
        Self::write(&self.owner_states, stream, info.view)
    }

    fn serialize_cell_proxy(&mut self, stream: &mut BitStream, info: &SerializeInfo) -> bool {
        Self::write(&self.cell_states, stream, info.view)
    }

    fn serialize_handover(&mut self, stream: &mut BitStream, view: ViewId) -> bool {
        Self::write(&self.handover_states, stream, view)
    }

    fn deserialize(&mut self, stream: &mut BitStream, info: &DeserializeInfo) {
        let remaining = stream.remaining_bytes();
        let bytes = stream.read_raw(remaining).unwrap_or_default();
        self.applied.push(AppliedState {
            view: info.view,
            channel: info.channel,
            bytes,
        });
    }

    fn instantiate(&mut self, info: SpawnInfo) {
        self.views.insert(info.view, info);
    }

    fn destroy(&mut self, view: ViewId) {
        self.views.remove(&view);
        self.destroyed.push(view);
    }
}
