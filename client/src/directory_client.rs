use std::{net::SocketAddr, time::Instant};

use weft_shared::{
    BitStream, ConnectionState, DeserializeInfo, EntityHost, HostData, InternalMessage,
    SerializeInfo, Transport,
};

use crate::{events::Events, Client, ClientConfig, ClientError};

/// Directories replicate nothing
struct NoViews;

impl EntityHost for NoViews {
    fn serialize_proxy(&mut self, _: &mut BitStream, _: &SerializeInfo) -> bool {
        false
    }

    fn deserialize(&mut self, _: &mut BitStream, _: &DeserializeInfo) {}
}

/// A thin connection to a directory service, used to publish a hosted game
/// or to look games up. Answers arrive as `DirectoryReplyEvent`s.
pub struct DirectoryClient {
    client: Client,
}

impl DirectoryClient {
    pub fn new(config: ClientConfig, transport: Box<dyn Transport>, now: Instant) -> Self {
        Self {
            client: Client::new(config, transport, now),
        }
    }

    pub fn connect(
        &mut self,
        address: SocketAddr,
        password: &str,
        now: Instant,
    ) -> Result<(), ClientError> {
        self.client.connect(address, password, BitStream::new(), now)
    }

    pub fn disconnect(&mut self, now: Instant) {
        self.client.disconnect(now);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Must be called regularly, maintains the connection and receives the
    /// directory's answers
    pub fn receive(&mut self, now: Instant) -> Events {
        self.client.receive(&mut NoViews, now)
    }

    /// Publish a hosted game. An empty address is filled in by the
    /// directory with the address it sees.
    pub fn register_host(&mut self, host: HostData) -> Result<(), ClientError> {
        self.send(InternalMessage::RegisterHost(host))
    }

    pub fn update_host(&mut self, host: HostData) -> Result<(), ClientError> {
        self.send(InternalMessage::UpdateHost(host))
    }

    pub fn unregister_host(&mut self) -> Result<(), ClientError> {
        self.send(InternalMessage::UnregisterHost)
    }

    /// List the hosts of one game type; an empty type lists all of them
    pub fn request_host_list(&mut self, game_type: &str) -> Result<(), ClientError> {
        self.send(InternalMessage::RequestHostList {
            game_type: game_type.to_string(),
        })
    }

    /// Ask which address the directory sees this client connecting from
    pub fn discover_endpoint(&mut self) -> Result<(), ClientError> {
        self.send(InternalMessage::DiscoverEndpoint)
    }

    fn send(&mut self, message: InternalMessage) -> Result<(), ClientError> {
        if !self.client.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.client.send_internal(message)
    }
}
