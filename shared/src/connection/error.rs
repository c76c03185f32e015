use std::net::SocketAddr;

use thiserror::Error;

use crate::types::{ConnectionHandle, PeerId};

/// Reasons a connection attempt fails or a session ends, reported to the
/// application. The discriminant travels on the wire inside `ConnectDenied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u8)]
pub enum ConnectionError {
    /// No answer arrived before the connect timeout elapsed
    #[error("Connection attempt timed out before the server answered")]
    ConnectionTimeout = 1,

    /// The server has no room for another peer
    #[error("Server refused the connection because it has reached its maximum number of peers")]
    TooManyPeers = 2,

    #[error("Server refused the connection because the password is incorrect")]
    InvalidPassword = 3,

    /// Client and server speak different protocol versions
    #[error("Server refused the connection because the protocol versions are incompatible")]
    IncompatibleVersion = 4,

    #[error("Server refused the connection because this address is banned")]
    Banned = 5,

    /// A peer claimed an identity that is already (or was recently) in use
    #[error("Server refused the connection because the requested identity is already in use")]
    DuplicateIdentity = 6,

    /// The security handshake did not complete in time
    #[error("Security handshake did not complete before the security timeout elapsed")]
    SecurityTimeout = 7,

    /// The server only accepts encrypted sessions
    #[error("Server requires a secure channel but none was established")]
    SecurityRequired = 8,

    /// The transport could not reach the server or dropped the link
    #[error("The transport refused or lost the connection")]
    ConnectionRefused = 9,

    /// A handover session password was unknown or expired
    #[error("Server refused the connection because the handover session password is unknown or expired")]
    InvalidHandover = 10,

    /// The application declined the login payload
    #[error("Server application denied the connection request")]
    ApprovalDenied = 11,
}

impl ConnectionError {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::ConnectionTimeout,
            2 => Self::TooManyPeers,
            3 => Self::InvalidPassword,
            4 => Self::IncompatibleVersion,
            5 => Self::Banned,
            6 => Self::DuplicateIdentity,
            7 => Self::SecurityTimeout,
            8 => Self::SecurityRequired,
            9 => Self::ConnectionRefused,
            10 => Self::InvalidHandover,
            11 => Self::ApprovalDenied,
            _ => return None,
        })
    }
}

/// Errors reported by a [`Transport`](crate::Transport) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport has not been started
    #[error("Transport has not been started")]
    NotStarted,

    /// Sending to a connection that does not exist (anymore)
    #[error("Transport has no open connection with handle {handle:?}")]
    UnknownConnection { handle: ConnectionHandle },

    /// The transport could not bind or listen on an address
    #[error("Transport failed to listen on {address}")]
    ListenFailed { address: SocketAddr },

    #[error("Transport failed to send {size} bytes")]
    SendFailed { size: usize },

    /// An encrypted-only message was handed to a link without an enabled
    /// security session
    #[error("Connection {handle:?} is not secure; encrypted-only message refused")]
    InsecureLink { handle: ConnectionHandle },
}

/// Errors produced by the [`IdentityPool`](crate::IdentityPool)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Every identity is either in use or cooling down
    #[error("No free peer identity is available")]
    Exhausted,

    /// The identity is assigned to a live peer
    #[error("Peer identity {peer} is already in use")]
    InUse { peer: PeerId },

    /// The identity was released too recently to be handed out again
    #[error("Peer identity {peer} was released {elapsed_ms} ms ago, inside the {cooldown_ms} ms recycle window")]
    RecycledTooSoon {
        peer: PeerId,
        elapsed_ms: u64,
        cooldown_ms: u64,
    },

    /// Reserved identities (server, unassigned) can't be claimed
    #[error("Peer identity {peer} is reserved")]
    Reserved { peer: PeerId },
}
