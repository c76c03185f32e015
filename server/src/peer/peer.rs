use std::{net::SocketAddr, time::Instant};

use weft_shared::{BitStream, ConnectionState, Link, PeerId, PeerStats};

/// A connected, approved participant
pub struct Peer {
    id: PeerId,
    pub(crate) link: Link,
    state: ConnectionState,
    login: BitStream,
    disconnect_deadline: Option<Instant>,
}

impl Peer {
    pub(crate) fn new(id: PeerId, link: Link, login: BitStream) -> Self {
        Self {
            id,
            link,
            state: ConnectionState::Connected,
            login,
            disconnect_deadline: None,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.link.address()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Login payload the peer connected with
    pub fn login(&self) -> &BitStream {
        &self.login
    }

    pub fn stats(&self) -> &PeerStats {
        self.link.stats()
    }

    pub fn is_secure(&self) -> bool {
        self.link.is_secure()
    }

    /// Whether messages may still be sent to this peer
    pub(crate) fn is_reachable(&self) -> bool {
        self.state.can_send()
    }

    /// Start a graceful disconnect that completes once the transport has
    /// drained or `deadline` passes
    pub(crate) fn begin_disconnect(&mut self, deadline: Instant) {
        if self.state.can_transition_to(ConnectionState::Disconnecting) {
            self.state = ConnectionState::Disconnecting;
            self.disconnect_deadline = Some(deadline);
        }
    }

    pub(crate) fn disconnect_due(&self, now: Instant, pending_outgoing: usize) -> bool {
        match (self.state, self.disconnect_deadline) {
            (ConnectionState::Disconnecting, Some(deadline)) => {
                pending_outgoing == 0 || now >= deadline
            }
            _ => false,
        }
    }
}
