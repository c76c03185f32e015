/// How a view's state is replicated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StateSyncMode {
    /// Never serialized
    Off,
    /// Full snapshots on the unreliable lane
    Unreliable,
    /// Full snapshots on the reliable lane
    Reliable,
    /// Delta-compressed snapshots on the reliable lane
    #[default]
    ReliableDeltaCompressed,
    /// Delta-compressed snapshots on the unreliable lane. Only useful with a
    /// resync interval, since a lost delta stalls the stream until the next
    /// delta-init.
    UnreliableDeltaCompressed,
}

impl StateSyncMode {
    pub fn is_off(&self) -> bool {
        *self == StateSyncMode::Off
    }

    pub fn is_delta(&self) -> bool {
        matches!(
            self,
            StateSyncMode::ReliableDeltaCompressed | StateSyncMode::UnreliableDeltaCompressed
        )
    }

    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            StateSyncMode::Reliable | StateSyncMode::ReliableDeltaCompressed
        )
    }
}
