use std::net::SocketAddr;

use crate::{connection::error::TransportError, types::ConnectionHandle};

/// Delivery lane of a reliable send
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReliableChannel {
    Unordered,
    Ordered(u8),
}

/// Lane a datagram arrived on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Unreliable,
    Reliable(ReliableChannel),
}

impl Channel {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Channel::Reliable(_))
    }
}

/// A datagram handed to the transport.
///
/// Unreliable sends borrow their bytes, which may live in a per-tick pool:
/// the transport must copy them before returning. Reliable sends may be
/// retransmitted after the tick ends, so they always own their bytes.
#[derive(Debug)]
pub enum Outgoing<'a> {
    Unreliable(&'a [u8]),
    Reliable {
        bytes: Vec<u8>,
        channel: ReliableChannel,
    },
}

impl Outgoing<'_> {
    pub fn len(&self) -> usize {
        match self {
            Outgoing::Unreliable(bytes) => bytes.len(),
            Outgoing::Reliable { bytes, .. } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The low-level handshake finished. `hail` is whatever the initiator
    /// passed to [`Transport::connect`].
    Connected {
        handle: ConnectionHandle,
        address: SocketAddr,
        hail: Vec<u8>,
    },
    Disconnected {
        handle: ConnectionHandle,
    },
    Data {
        handle: ConnectionHandle,
        bytes: Vec<u8>,
        channel: Channel,
    },
}

/// An unreliable-datagram transport with reliable channels layered on top.
/// Connection establishment, retransmission and congestion control all
/// live behind this trait.
pub trait Transport {
    /// Start the transport, listening on `address` when given
    fn start(&mut self, address: Option<SocketAddr>) -> Result<(), TransportError>;

    /// Begin a low-level connection. Completion is reported later as
    /// [`TransportEvent::Connected`].
    fn connect(&mut self, address: SocketAddr, hail: &[u8])
        -> Result<ConnectionHandle, TransportError>;

    fn send(&mut self, handle: ConnectionHandle, outgoing: Outgoing<'_>)
        -> Result<(), TransportError>;

    /// Pop the next event, if any
    fn read_message(&mut self) -> Option<TransportEvent>;

    /// Close a connection. No `Disconnected` event is reported for it.
    fn disconnect(&mut self, handle: ConnectionHandle);

    fn remote_address(&self, handle: ConnectionHandle) -> Option<SocketAddr>;

    /// Reliable datagrams still waiting to be delivered on `handle`
    fn pending_outgoing(&self, handle: ConnectionHandle) -> usize;

    fn shutdown(&mut self);
}
