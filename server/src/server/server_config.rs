use std::{default::Default, time::Duration};

use weft_shared::{ConnectionConfig, ReplicationConfig};

/// Contains Config properties which will be used by the Server
#[derive(Clone)]
pub struct ServerConfig {
    /// Used to configure the connections with Clients
    pub connection: ConnectionConfig,
    /// Used to configure the replication scheduler
    pub replication: ReplicationConfig,
    /// Connect requests beyond this many peers are denied with
    /// `TooManyPeers`
    pub max_connections: usize,
    /// Password every connect request must carry. Empty means none.
    pub password: String,
    /// Determines whether the application must explicitly accept each
    /// connect request
    pub require_approval: bool,
    /// Determines whether connect requests are only accepted over an
    /// encrypted channel
    pub require_security: bool,
    /// How long a released identity rests before it is handed out again
    pub identity_recycle_delay: Duration,
    /// How long a handover session token stays redeemable
    pub handover_lifetime: Duration,
    /// Answer the directory message set
    pub directory_mode: bool,
    /// Drop a peer's buffered messages when it disconnects
    pub prune_buffered_on_disconnect: bool,
    /// Scratch streams available for unreliable sends each tick
    pub send_pool_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            replication: ReplicationConfig::default(),
            max_connections: 64,
            password: String::new(),
            require_approval: false,
            require_security: false,
            identity_recycle_delay: Duration::from_secs(10),
            handover_lifetime: Duration::from_secs(30),
            directory_mode: false,
            prune_buffered_on_disconnect: true,
            send_pool_size: 64,
        }
    }
}
