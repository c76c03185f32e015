pub mod error;
pub mod flags;
pub mod frame;
pub mod header;
pub mod internal_message;
pub mod network_message;
pub mod opcode;
pub mod rpc;
pub mod timestamp;
