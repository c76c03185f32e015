mod peer;
mod pending;

pub use peer::Peer;
pub(crate) use pending::{PendingConnection, PendingStage};
