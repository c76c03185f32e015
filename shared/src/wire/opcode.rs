use weft_serde::wire_enum;

/// The closed set of control messages. The discriminant is the opcode byte
/// written in the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InternalCode {
    ConnectRequest = 1,
    ConnectResponse = 2,
    ConnectDenied = 3,
    Redirect = 4,
    SecurityRequest = 5,
    SecurityResponse = 6,
    Disconnect = 7,
    Create = 8,
    Destroy = 9,
    BufferedBatch = 10,
    StateSync = 11,
    StateSyncOwner = 12,
    StateSyncCellProxy = 13,
    StateSyncDeltaInit = 14,
    StateSyncDelta = 15,
    StateSyncOwnerDeltaInit = 16,
    StateSyncOwnerDelta = 17,
    HandoverRequest = 18,
    HandoverResponse = 19,
    GroupChange = 20,
    RegisterHost = 21,
    UpdateHost = 22,
    UnregisterHost = 23,
    RequestHostList = 24,
    HostList = 25,
    DiscoverEndpoint = 26,
    EndpointInfo = 27,
}

impl InternalCode {
    const ALL: [InternalCode; 27] = [
        Self::ConnectRequest,
        Self::ConnectResponse,
        Self::ConnectDenied,
        Self::Redirect,
        Self::SecurityRequest,
        Self::SecurityResponse,
        Self::Disconnect,
        Self::Create,
        Self::Destroy,
        Self::BufferedBatch,
        Self::StateSync,
        Self::StateSyncOwner,
        Self::StateSyncCellProxy,
        Self::StateSyncDeltaInit,
        Self::StateSyncDelta,
        Self::StateSyncOwnerDeltaInit,
        Self::StateSyncOwnerDelta,
        Self::HandoverRequest,
        Self::HandoverResponse,
        Self::GroupChange,
        Self::RegisterHost,
        Self::UpdateHost,
        Self::UnregisterHost,
        Self::RequestHostList,
        Self::HostList,
        Self::DiscoverEndpoint,
        Self::EndpointInfo,
    ];

    /// Opcodes that address a single view carry its id in the header
    pub fn has_view(&self) -> bool {
        matches!(
            self,
            Self::Create
                | Self::Destroy
                | Self::StateSync
                | Self::StateSyncOwner
                | Self::StateSyncCellProxy
                | Self::StateSyncDeltaInit
                | Self::StateSyncDelta
                | Self::StateSyncOwnerDeltaInit
                | Self::StateSyncOwnerDelta
                | Self::GroupChange
        )
    }

    /// Messages that may be exchanged before the peer is approved
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::ConnectRequest
                | Self::ConnectResponse
                | Self::ConnectDenied
                | Self::SecurityRequest
                | Self::SecurityResponse
                | Self::Disconnect
                | Self::Redirect
        )
    }

    pub fn is_directory(&self) -> bool {
        matches!(
            self,
            Self::RegisterHost
                | Self::UpdateHost
                | Self::UnregisterHost
                | Self::RequestHostList
                | Self::HostList
                | Self::DiscoverEndpoint
                | Self::EndpointInfo
        )
    }

    pub fn all() -> &'static [InternalCode] {
        &Self::ALL
    }
}

impl From<InternalCode> for u8 {
    fn from(code: InternalCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for InternalCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| *code as u8 == value)
            .ok_or(value)
    }
}

wire_enum!(InternalCode as u8);
