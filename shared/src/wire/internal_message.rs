use weft_serde::{wire_struct, BitStream, Serde};

use crate::{
    connection::error::ConnectionError,
    types::{GroupId, PeerId, ViewId},
};

use super::{
    error::WireError,
    flags::MessageFlags,
    header::{Destination, Selector},
    network_message::NetworkMessage,
    opcode::InternalCode,
};

wire_struct! {
    /// A server as listed by a directory
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct HostData {
        pub address: String,
        pub game_type: String,
        pub game_name: String,
        pub comment: String,
        pub password_protected: bool,
        pub player_count: u32,
        pub player_limit: u32,
    }
}

/// Which state stream a snapshot belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateChannel {
    /// Sent to every observer that does not own the view
    Proxy,
    /// Sent only to the owner
    Owner,
    /// Sent to secondary authorities mirroring the view
    CellProxy,
}

/// A decoded control message. Arguments are read in exactly the order they
/// are written; trailing opaque data runs to the end of the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InternalMessage {
    ConnectRequest {
        version: u16,
        password: String,
        handover: Option<String>,
        login: BitStream,
    },
    ConnectResponse {
        peer: PeerId,
        server_time_ms: u64,
        approval: BitStream,
    },
    ConnectDenied {
        error: ConnectionError,
    },
    Redirect {
        address: String,
        password: String,
    },
    SecurityRequest {
        data: Vec<u8>,
    },
    SecurityResponse {
        data: Vec<u8>,
    },
    Disconnect,
    Create {
        view: ViewId,
        owner: PeerId,
        group: GroupId,
        prefab: String,
        data: BitStream,
    },
    Destroy {
        view: ViewId,
    },
    /// Encoded envelopes replayed in order
    BufferedBatch {
        messages: Vec<BitStream>,
    },
    StateSync {
        view: ViewId,
        channel: StateChannel,
        state: BitStream,
    },
    StateDelta {
        view: ViewId,
        owner: bool,
        init: bool,
        sequence: u8,
        data: BitStream,
    },
    HandoverRequest {
        request_id: u32,
        instances: BitStream,
    },
    HandoverResponse {
        request_id: u32,
        token: Option<String>,
    },
    GroupChange {
        view: ViewId,
        group: GroupId,
    },
    RegisterHost(HostData),
    UpdateHost(HostData),
    UnregisterHost,
    RequestHostList {
        game_type: String,
    },
    HostList {
        hosts: Vec<HostData>,
    },
    DiscoverEndpoint,
    EndpointInfo {
        address: String,
    },
}

impl InternalMessage {
    pub fn opcode(&self) -> InternalCode {
        match self {
            Self::ConnectRequest { .. } => InternalCode::ConnectRequest,
            Self::ConnectResponse { .. } => InternalCode::ConnectResponse,
            Self::ConnectDenied { .. } => InternalCode::ConnectDenied,
            Self::Redirect { .. } => InternalCode::Redirect,
            Self::SecurityRequest { .. } => InternalCode::SecurityRequest,
            Self::SecurityResponse { .. } => InternalCode::SecurityResponse,
            Self::Disconnect => InternalCode::Disconnect,
            Self::Create { .. } => InternalCode::Create,
            Self::Destroy { .. } => InternalCode::Destroy,
            Self::BufferedBatch { .. } => InternalCode::BufferedBatch,
            Self::StateSync { channel, .. } => match channel {
                StateChannel::Proxy => InternalCode::StateSync,
                StateChannel::Owner => InternalCode::StateSyncOwner,
                StateChannel::CellProxy => InternalCode::StateSyncCellProxy,
            },
            Self::StateDelta { owner, init, .. } => match (owner, init) {
                (false, true) => InternalCode::StateSyncDeltaInit,
                (false, false) => InternalCode::StateSyncDelta,
                (true, true) => InternalCode::StateSyncOwnerDeltaInit,
                (true, false) => InternalCode::StateSyncOwnerDelta,
            },
            Self::HandoverRequest { .. } => InternalCode::HandoverRequest,
            Self::HandoverResponse { .. } => InternalCode::HandoverResponse,
            Self::GroupChange { .. } => InternalCode::GroupChange,
            Self::RegisterHost(_) => InternalCode::RegisterHost,
            Self::UpdateHost(_) => InternalCode::UpdateHost,
            Self::UnregisterHost => InternalCode::UnregisterHost,
            Self::RequestHostList { .. } => InternalCode::RequestHostList,
            Self::HostList { .. } => InternalCode::HostList,
            Self::DiscoverEndpoint => InternalCode::DiscoverEndpoint,
            Self::EndpointInfo { .. } => InternalCode::EndpointInfo,
        }
    }

    pub fn view(&self) -> Option<ViewId> {
        match self {
            Self::Create { view, .. }
            | Self::Destroy { view }
            | Self::StateSync { view, .. }
            | Self::StateDelta { view, .. }
            | Self::GroupChange { view, .. } => Some(*view),
            _ => None,
        }
    }

    pub fn write_body(&self, stream: &mut BitStream) {
        match self {
            Self::ConnectRequest {
                version,
                password,
                handover,
                login,
            } => {
                version.ser(stream);
                password.ser(stream);
                handover.ser(stream);
                stream.append(login);
            }
            Self::ConnectResponse {
                peer,
                server_time_ms,
                approval,
            } => {
                peer.ser(stream);
                server_time_ms.ser(stream);
                stream.append(approval);
            }
            Self::ConnectDenied { error } => stream.write_u8(error.code()),
            Self::Redirect { address, password } => {
                address.ser(stream);
                password.ser(stream);
            }
            Self::SecurityRequest { data } | Self::SecurityResponse { data } => {
                stream.write_bytes(data);
            }
            Self::Create {
                owner,
                group,
                prefab,
                data,
                ..
            } => {
                owner.ser(stream);
                group.ser(stream);
                prefab.ser(stream);
                stream.append(data);
            }
            Self::BufferedBatch { messages } => messages.ser(stream),
            Self::StateSync { state, .. } => stream.append(state),
            Self::StateDelta { sequence, data, .. } => {
                sequence.ser(stream);
                stream.append(data);
            }
            Self::HandoverRequest {
                request_id,
                instances,
            } => {
                request_id.ser(stream);
                stream.append(instances);
            }
            Self::HandoverResponse { request_id, token } => {
                request_id.ser(stream);
                token.ser(stream);
            }
            Self::GroupChange { group, .. } => group.ser(stream),
            Self::RegisterHost(host) | Self::UpdateHost(host) => host.ser(stream),
            Self::RequestHostList { game_type } => game_type.ser(stream),
            Self::HostList { hosts } => hosts.ser(stream),
            Self::EndpointInfo { address } => address.ser(stream),
            Self::Disconnect
            | Self::Destroy { .. }
            | Self::UnregisterHost
            | Self::DiscoverEndpoint => {}
        }
    }

    pub fn read_body(
        opcode: InternalCode,
        view: Option<ViewId>,
        stream: &mut BitStream,
    ) -> Result<Self, WireError> {
        let view = match (opcode.has_view(), view) {
            (true, Some(view)) => Some(view),
            (false, None) => None,
            _ => return Err(WireError::SelectorMismatch { opcode }),
        };
        // has_view() guarantees this is only reached for view opcodes
        let with_view = || view.ok_or(WireError::SelectorMismatch { opcode });

        Ok(match opcode {
            InternalCode::ConnectRequest => Self::ConnectRequest {
                version: u16::de(stream)?,
                password: String::de(stream)?,
                handover: Option::<String>::de(stream)?,
                login: stream.get_remaining_bit_stream(),
            },
            InternalCode::ConnectResponse => Self::ConnectResponse {
                peer: PeerId::de(stream)?,
                server_time_ms: u64::de(stream)?,
                approval: stream.get_remaining_bit_stream(),
            },
            InternalCode::ConnectDenied => {
                let code = stream.read_u8()?;
                Self::ConnectDenied {
                    error: ConnectionError::from_code(code)
                        .ok_or(WireError::UnknownDenialCode { code })?,
                }
            }
            InternalCode::Redirect => Self::Redirect {
                address: String::de(stream)?,
                password: String::de(stream)?,
            },
            InternalCode::SecurityRequest => Self::SecurityRequest {
                data: stream.read_bytes()?,
            },
            InternalCode::SecurityResponse => Self::SecurityResponse {
                data: stream.read_bytes()?,
            },
            InternalCode::Disconnect => Self::Disconnect,
            InternalCode::Create => Self::Create {
                view: with_view()?,
                owner: PeerId::de(stream)?,
                group: GroupId::de(stream)?,
                prefab: String::de(stream)?,
                data: stream.get_remaining_bit_stream(),
            },
            InternalCode::Destroy => Self::Destroy { view: with_view()? },
            InternalCode::BufferedBatch => Self::BufferedBatch {
                messages: Vec::<BitStream>::de(stream)?,
            },
            InternalCode::StateSync
            | InternalCode::StateSyncOwner
            | InternalCode::StateSyncCellProxy => Self::StateSync {
                view: with_view()?,
                channel: match opcode {
                    InternalCode::StateSyncOwner => StateChannel::Owner,
                    InternalCode::StateSyncCellProxy => StateChannel::CellProxy,
                    _ => StateChannel::Proxy,
                },
                state: stream.get_remaining_bit_stream(),
            },
            InternalCode::StateSyncDeltaInit
            | InternalCode::StateSyncDelta
            | InternalCode::StateSyncOwnerDeltaInit
            | InternalCode::StateSyncOwnerDelta => Self::StateDelta {
                view: with_view()?,
                owner: matches!(
                    opcode,
                    InternalCode::StateSyncOwnerDeltaInit | InternalCode::StateSyncOwnerDelta
                ),
                init: matches!(
                    opcode,
                    InternalCode::StateSyncDeltaInit | InternalCode::StateSyncOwnerDeltaInit
                ),
                sequence: u8::de(stream)?,
                data: stream.get_remaining_bit_stream(),
            },
            InternalCode::HandoverRequest => Self::HandoverRequest {
                request_id: u32::de(stream)?,
                instances: stream.get_remaining_bit_stream(),
            },
            InternalCode::HandoverResponse => Self::HandoverResponse {
                request_id: u32::de(stream)?,
                token: Option::<String>::de(stream)?,
            },
            InternalCode::GroupChange => Self::GroupChange {
                view: with_view()?,
                group: GroupId::de(stream)?,
            },
            InternalCode::RegisterHost => Self::RegisterHost(HostData::de(stream)?),
            InternalCode::UpdateHost => Self::UpdateHost(HostData::de(stream)?),
            InternalCode::UnregisterHost => Self::UnregisterHost,
            InternalCode::RequestHostList => Self::RequestHostList {
                game_type: String::de(stream)?,
            },
            InternalCode::HostList => Self::HostList {
                hosts: Vec::<HostData>::de(stream)?,
            },
            InternalCode::DiscoverEndpoint => Self::DiscoverEndpoint,
            InternalCode::EndpointInfo => Self::EndpointInfo {
                address: String::de(stream)?,
            },
        })
    }

    /// Wrap this message in an envelope
    pub fn to_message(&self, destination: Destination, flags: MessageFlags) -> NetworkMessage {
        let mut payload = BitStream::new();
        self.write_body(&mut payload);
        NetworkMessage::internal(self.opcode(), self.view(), destination, flags, payload)
    }

    /// Parse the body of an envelope carrying an internal opcode
    pub fn from_message(message: &NetworkMessage) -> Result<Self, WireError> {
        match &message.header.selector {
            Selector::Internal { opcode, view } => {
                let mut payload = message.payload.to_reader();
                Self::read_body(*opcode, *view, &mut payload)
            }
            Selector::Named { name, .. } => Err(WireError::NotInternal { name: name.clone() }),
        }
    }
}
