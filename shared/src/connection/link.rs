use std::net::SocketAddr;

use log::warn;

use crate::{
    connection::{
        error::TransportError,
        security::{Security, SecurityStatus},
        tick_pool::TickPool,
        transport::{Outgoing, ReliableChannel, Transport},
    },
    types::ConnectionHandle,
    wire::{
        error::WireError,
        frame::{self, OpenedFrame, PLAIN_FRAME},
        network_message::NetworkMessage,
    },
};

/// Every reliable message shares one ordered lane so RPCs, creations and
/// destructions are applied in the order they were sent
pub const RELIABLE_CHANNEL: ReliableChannel = ReliableChannel::Ordered(0);

/// Traffic counters of one connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    /// Incoming messages dropped as malformed or not allowed
    pub messages_dropped: u64,
}

/// One transport connection together with its security session
pub struct Link {
    handle: ConnectionHandle,
    address: SocketAddr,
    security: Option<Box<dyn Security>>,
    stats: PeerStats,
}

impl Link {
    pub fn new(
        handle: ConnectionHandle,
        address: SocketAddr,
        security: Option<Box<dyn Security>>,
    ) -> Self {
        Self {
            handle,
            address,
            security,
            stats: PeerStats::default(),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    pub fn security_status(&self) -> SecurityStatus {
        self.security
            .as_ref()
            .map(|security| security.status())
            .unwrap_or(SecurityStatus::Disabled)
    }

    pub fn is_secure(&self) -> bool {
        self.security_status() == SecurityStatus::Enabled
    }

    pub fn security_mut(&mut self) -> Option<&mut (dyn Security + 'static)> {
        self.security.as_deref_mut()
    }

    /// Install the security session negotiated for this connection
    pub fn set_security(&mut self, security: Box<dyn Security>) {
        self.security = Some(security);
    }

    pub fn disable_security(&mut self) {
        if let Some(security) = self.security.as_deref_mut() {
            security.disable();
        }
    }

    /// Encode and send one message
    pub fn send(
        &mut self,
        transport: &mut dyn Transport,
        pool: &mut TickPool,
        message: &NetworkMessage,
    ) -> Result<(), TransportError> {
        if message.flags().is_encrypted() && !self.is_secure() {
            return Err(TransportError::InsecureLink {
                handle: self.handle,
            });
        }
        let reliable = message.flags().is_reliable();

        // plain unreliable datagrams are built straight into pooled storage
        if !reliable && !self.is_secure() {
            if let Some(buffer) = pool.acquire() {
                buffer.write_u8(PLAIN_FRAME);
                message.encode(buffer);
                self.count_sent(buffer.byte_length());
                return transport.send(self.handle, Outgoing::Unreliable(buffer.as_bytes()));
            }
        }

        self.send_envelope(transport, &message.to_bytes(), reliable)
    }

    /// Send an already encoded envelope. Broadcasts encode once and call
    /// this for every recipient; only secure links pay for encryption.
    pub fn send_envelope(
        &mut self,
        transport: &mut dyn Transport,
        envelope: &[u8],
        reliable: bool,
    ) -> Result<(), TransportError> {
        let datagram = frame::seal(envelope, self.security.as_deref_mut()).map_err(|error| {
            warn!("could not seal a frame for {:?}: {}", self.handle, error);
            TransportError::SendFailed {
                size: envelope.len(),
            }
        })?;
        self.count_sent(datagram.len());
        if reliable {
            transport.send(
                self.handle,
                Outgoing::Reliable {
                    bytes: datagram,
                    channel: RELIABLE_CHANNEL,
                },
            )
        } else {
            transport.send(self.handle, Outgoing::Unreliable(&datagram))
        }
    }

    /// Recover the envelope of an incoming datagram
    pub fn open(&mut self, datagram: &[u8]) -> Result<OpenedFrame, WireError> {
        self.stats.messages_received += 1;
        self.stats.bytes_received += datagram.len() as u64;
        frame::open(datagram, self.security.as_deref_mut())
    }

    /// Open and decode an incoming datagram
    pub fn receive(
        &mut self,
        datagram: &[u8],
        now_ms: u64,
        reliable: bool,
    ) -> Result<NetworkMessage, WireError> {
        let frame = self.open(datagram)?;
        NetworkMessage::from_bytes(&frame.envelope, now_ms, reliable)
    }

    pub fn count_dropped(&mut self) {
        self.stats.messages_dropped += 1;
    }

    fn count_sent(&mut self, bytes: usize) {
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += bytes as u64;
    }
}
