//! In-memory transport for end-to-end testing.
//! Routes datagrams between endpoints without network I/O; every endpoint
//! reads its events from its own queue in the order they were produced.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::trace;

use weft_shared::{
    Channel, ConnectionHandle, Outgoing, Transport, TransportError, TransportEvent,
};

const FIRST_CLIENT_PORT: u16 = 40000;

#[derive(Default)]
struct Endpoint {
    listening: bool,
    inbox: VecDeque<TransportEvent>,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<SocketAddr, Endpoint>,
    /// (local address, local handle) -> (remote address, remote handle)
    links: HashMap<(SocketAddr, ConnectionHandle), (SocketAddr, ConnectionHandle)>,
    next_handle: u64,
    next_port: u16,
    drop_unreliable: bool,
    delivered: usize,
}

impl NetworkState {
    fn allocate_handle(&mut self) -> ConnectionHandle {
        self.next_handle += 1;
        ConnectionHandle(self.next_handle)
    }

    fn push(&mut self, address: SocketAddr, event: TransportEvent) {
        self.endpoints.entry(address).or_default().inbox.push_back(event);
    }
}

/// A shared in-memory network. Clone it freely; every clone is the same
/// network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport for a client, bound to a fresh loopback address
    pub fn client_transport(&self) -> Box<dyn Transport> {
        let address = {
            let mut state = self.lock();
            let port = FIRST_CLIENT_PORT + state.next_port;
            state.next_port += 1;
            SocketAddr::from(([127, 0, 0, 1], port))
        };
        Box::new(MemoryTransport {
            network: self.clone(),
            address,
            started: false,
        })
    }

    /// A transport for a server; bind it with `start(Some(address))`
    pub fn server_transport(&self) -> Box<dyn Transport> {
        Box::new(MemoryTransport {
            network: self.clone(),
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            started: false,
        })
    }

    /// Silently lose every unreliable datagram from now on
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.lock().drop_unreliable = drop;
    }

    /// Datagrams delivered so far
    pub fn delivered(&self) -> usize {
        self.lock().delivered
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One endpoint of a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: SocketAddr,
    started: bool,
}

impl Transport for MemoryTransport {
    fn start(&mut self, address: Option<SocketAddr>) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        if let Some(address) = address {
            if state
                .endpoints
                .get(&address)
                .is_some_and(|endpoint| endpoint.listening)
            {
                return Err(TransportError::ListenFailed { address });
            }
            self.address = address;
            state.endpoints.entry(address).or_default().listening = true;
        } else {
            state.endpoints.entry(self.address).or_default();
        }
        self.started = true;
        Ok(())
    }

    fn connect(
        &mut self,
        address: SocketAddr,
        hail: &[u8],
    ) -> Result<ConnectionHandle, TransportError> {
        if !self.started {
            return Err(TransportError::NotStarted);
        }
        let mut state = self.network.lock();
        let local = state.allocate_handle();

        // nobody listening: the handshake never completes
        if !state
            .endpoints
            .get(&address)
            .is_some_and(|endpoint| endpoint.listening)
        {
            return Ok(local);
        }

        let remote = state.allocate_handle();
        state.links.insert((self.address, local), (address, remote));
        state.links.insert((address, remote), (self.address, local));
        state.push(
            self.address,
            TransportEvent::Connected {
                handle: local,
                address,
                hail: hail.to_vec(),
            },
        );
        state.push(
            address,
            TransportEvent::Connected {
                handle: remote,
                address: self.address,
                hail: hail.to_vec(),
            },
        );
        Ok(local)
    }

    fn send(
        &mut self,
        handle: ConnectionHandle,
        outgoing: Outgoing<'_>,
    ) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        let Some((address, remote)) = state.links.get(&(self.address, handle)).copied() else {
            return Err(TransportError::UnknownConnection { handle });
        };
        let (bytes, channel) = match outgoing {
            Outgoing::Unreliable(bytes) => {
                if state.drop_unreliable {
                    trace!("dropping an unreliable datagram for {}", address);
                    return Ok(());
                }
                (bytes.to_vec(), Channel::Unreliable)
            }
            Outgoing::Reliable { bytes, channel } => (bytes, Channel::Reliable(channel)),
        };
        state.delivered += 1;
        state.push(
            address,
            TransportEvent::Data {
                handle: remote,
                bytes,
                channel,
            },
        );
        Ok(())
    }

    fn read_message(&mut self) -> Option<TransportEvent> {
        self.network
            .lock()
            .endpoints
            .get_mut(&self.address)
            .and_then(|endpoint| endpoint.inbox.pop_front())
    }

    fn disconnect(&mut self, handle: ConnectionHandle) {
        let mut state = self.network.lock();
        let Some((address, remote)) = state.links.remove(&(self.address, handle)) else {
            return;
        };
        state.links.remove(&(address, remote));
        state.push(address, TransportEvent::Disconnected { handle: remote });
    }

    fn remote_address(&self, handle: ConnectionHandle) -> Option<SocketAddr> {
        self.network
            .lock()
            .links
            .get(&(self.address, handle))
            .map(|(address, _)| *address)
    }

    fn pending_outgoing(&self, _handle: ConnectionHandle) -> usize {
        0
    }

    fn shutdown(&mut self) {
        let handles: Vec<ConnectionHandle> = self
            .network
            .lock()
            .links
            .keys()
            .filter(|(address, _)| *address == self.address)
            .map(|(_, handle)| *handle)
            .collect();
        for handle in handles {
            self.disconnect(handle);
        }
        if let Some(endpoint) = self.network.lock().endpoints.get_mut(&self.address) {
            endpoint.listening = false;
        }
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_shared::RELIABLE_CHANNEL;

    fn server_address() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    #[test]
    fn connecting_notifies_both_ends() {
        let network = MemoryNetwork::new();
        let mut server = network.server_transport();
        server.start(Some(server_address())).unwrap();
        let mut client = network.client_transport();
        client.start(None).unwrap();

        let handle = client.connect(server_address(), b"hi").unwrap();
        assert!(matches!(
            client.read_message(),
            Some(TransportEvent::Connected { handle: h, .. }) if h == handle
        ));
        let Some(TransportEvent::Connected {
            handle: remote,
            hail,
            ..
        }) = server.read_message()
        else {
            panic!("server saw no connection");
        };
        assert_eq!(hail, b"hi");

        client
            .send(
                handle,
                Outgoing::Reliable {
                    bytes: vec![1, 2, 3],
                    channel: RELIABLE_CHANNEL,
                },
            )
            .unwrap();
        assert_eq!(
            server.read_message(),
            Some(TransportEvent::Data {
                handle: remote,
                bytes: vec![1, 2, 3],
                channel: Channel::Reliable(RELIABLE_CHANNEL),
            })
        );
    }

    #[test]
    fn nobody_listening_never_completes() {
        let network = MemoryNetwork::new();
        let mut client = network.client_transport();
        client.start(None).unwrap();
        let handle = client.connect(server_address(), &[]).unwrap();
        assert_eq!(client.read_message(), None);
        assert_eq!(
            client.send(handle, Outgoing::Unreliable(&[1])),
            Err(TransportError::UnknownConnection { handle })
        );
    }

    #[test]
    fn disconnect_notifies_only_the_remote_end() {
        let network = MemoryNetwork::new();
        let mut server = network.server_transport();
        server.start(Some(server_address())).unwrap();
        let mut client = network.client_transport();
        client.start(None).unwrap();
        let handle = client.connect(server_address(), &[]).unwrap();
        client.read_message();
        let Some(TransportEvent::Connected { handle: remote, .. }) = server.read_message() else {
            panic!("server saw no connection");
        };

        client.disconnect(handle);
        assert_eq!(client.read_message(), None);
        assert_eq!(
            server.read_message(),
            Some(TransportEvent::Disconnected { handle: remote })
        );
    }
}
