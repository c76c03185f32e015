use std::default::Default;

use weft_shared::ConnectionConfig;

/// Contains Config properties which will be used by a Client
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Used to configure the connection with the Server
    pub connection: ConnectionConfig,
    /// Determines whether the connect request waits for an encrypted
    /// channel. Requires a security factory on the Client.
    pub require_security: bool,
    /// Scratch streams available for unreliable sends each tick
    pub send_pool_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            require_security: false,
            send_pool_size: 16,
        }
    }
}
