use std::net::SocketAddr;

use thiserror::Error;

use weft_shared::{SerdeErr, TransportError};

/// Errors returned by client operations that cannot proceed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Unspecified, broadcast and port-zero addresses can't be connected to
    #[error("Cannot connect to {address}")]
    InvalidAddress { address: SocketAddr },

    #[error("Client is already connected or connecting; disconnect first")]
    AlreadyConnected,

    #[error("Client is not connected")]
    NotConnected,

    /// Security was asked for but can't be provided
    #[error("No encrypted channel is available")]
    SecurityUnavailable,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Arguments could not be written through the codec registry
    #[error("Could not encode arguments: {0}")]
    Serde(#[from] SerdeErr),
}
