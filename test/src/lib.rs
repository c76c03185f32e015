//! Test support for weft: an in-memory network, a recording entity host, a
//! toy security layer and a small harness driving a server and its clients.

pub mod helpers;
pub mod memory_network;

pub use helpers::*;
pub use memory_network::{MemoryNetwork, MemoryTransport};
