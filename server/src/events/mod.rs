mod events;

pub use events::{
    ApprovalEvent, ApprovalRequest, ConnectEvent, DenyEvent, DisconnectEvent, ErrorEvent, Event,
    Events, HandoverArrival, HandoverEvent, RpcEvent,
};
