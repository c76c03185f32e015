use weft_shared::{BitStream, GroupId, InternalMessage, PeerId, ViewId};

/// What the server remembers about a view it instantiated
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewRecord {
    pub owner: PeerId,
    pub group: GroupId,
    pub prefab: String,
    /// Initial data handed to every peer that instantiates the view
    pub data: BitStream,
}

impl ViewRecord {
    pub(crate) fn create_message(&self, view: ViewId) -> InternalMessage {
        InternalMessage::Create {
            view,
            owner: self.owner,
            group: self.group,
            prefab: self.prefab.clone(),
            data: self.data.clone(),
        }
    }
}
