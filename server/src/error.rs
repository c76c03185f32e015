use thiserror::Error;

use weft_shared::{ConnectionHandle, IdentityError, PeerId, SerdeErr, TransportError, ViewId};

/// Errors returned by server operations that cannot proceed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// The server was used before `listen` succeeded
    #[error("Server is not listening; call `listen()` first")]
    NotListening,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No connected peer {peer}")]
    UnknownPeer { peer: PeerId },

    /// The connection is not waiting for approval
    #[error("Connection {handle:?} has no pending connect request")]
    UnknownPending { handle: ConnectionHandle },

    #[error("No replicated view {view}")]
    UnknownView { view: ViewId },

    /// Every view id has been handed out
    #[error("No free view id is available")]
    ViewIdsExhausted,

    /// A destination the server can't send to, such as itself
    #[error("The server cannot send a message addressed to the server")]
    InvalidDestination,

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Handover error: {0}")]
    Handover(#[from] HandoverError),

    /// Arguments could not be written through the codec registry
    #[error("Could not encode arguments: {0}")]
    Serde(#[from] SerdeErr),
}

/// Errors produced by handover session bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoverError {
    /// Freshly generated tokens kept colliding with live sessions
    #[error("Could not generate a unique handover token after {attempts} attempts")]
    TokenCollision { attempts: u32 },

    #[error("Handover token is unknown")]
    UnknownToken,

    #[error("Handover token expired {expired_ms} ms ago")]
    Expired { expired_ms: u64 },
}
