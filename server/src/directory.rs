use std::collections::BTreeMap;

use log::info;

use weft_shared::{HostData, PeerId};

/// Servers registered with a directory, keyed by the registering peer
#[derive(Default)]
pub struct DirectoryRegistry {
    hosts: BTreeMap<PeerId, HostData>,
}

impl DirectoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a host. An empty address is filled in with the
    /// address the peer connected from.
    pub fn register(&mut self, peer: PeerId, mut host: HostData, seen_address: &str) {
        if host.address.is_empty() {
            host.address = seen_address.to_string();
        }
        if !self.hosts.contains_key(&peer) {
            info!("directory registered {} ({})", host.game_name, host.address);
        }
        self.hosts.insert(peer, host);
    }

    /// Returns whether `peer` had registered a host
    pub fn update(&mut self, peer: PeerId, host: HostData, seen_address: &str) -> bool {
        if !self.hosts.contains_key(&peer) {
            return false;
        }
        self.register(peer, host, seen_address);
        true
    }

    pub fn unregister(&mut self, peer: PeerId) -> bool {
        self.hosts.remove(&peer).is_some()
    }

    /// Hosts of one game type; an empty type lists them all
    pub fn list(&self, game_type: &str) -> Vec<HostData> {
        self.hosts
            .values()
            .filter(|host| game_type.is_empty() || host.game_type == game_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
