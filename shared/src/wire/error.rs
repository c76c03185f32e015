use thiserror::Error;

use weft_serde::SerdeErr;

use super::opcode::InternalCode;

/// Errors that can occur while decoding an envelope, an internal message or
/// a transport frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The underlying stream could not be read
    #[error("Malformed message: {0}")]
    Serde(#[from] SerdeErr),

    /// The opcode byte does not name an internal message
    #[error("Unknown internal opcode {opcode} received. This may indicate a malformed or malicious packet")]
    UnknownOpcode { opcode: u8 },

    /// An internal message was expected but the envelope carries a named RPC
    #[error("Expected an internal message but received the named message '{name}'")]
    NotInternal { name: String },

    /// The opcode needs a view id but the envelope has none, or the reverse
    #[error("Internal message {opcode:?} arrived with the wrong selector shape")]
    SelectorMismatch { opcode: InternalCode },

    /// The denial code does not name a connection error
    #[error("Unknown connection error code {code} in denial message")]
    UnknownDenialCode { code: u8 },

    /// The first byte of a datagram is not a frame marker
    #[error("Invalid frame marker {marker:#04x}")]
    InvalidFrameMarker { marker: u8 },

    /// An empty datagram has no frame marker at all
    #[error("Received an empty datagram")]
    EmptyFrame,

    /// A secure frame arrived but no security session can open it
    #[error("Received a secure frame without an enabled security session")]
    SecurityUnavailable,

    /// The security layer rejected a frame
    #[error("Security layer failed to {operation} a frame of {size} bytes")]
    SecurityFailed { operation: &'static str, size: usize },
}
