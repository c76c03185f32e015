use std::{default::Default, time::Duration};

/// Protocol version spoken by this build; peers with another version are
/// refused
pub const PROTOCOL_VERSION: u16 = 1;

/// Timing of the connection lifecycle, shared by every role
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// How long to wait for a connect response before giving up
    pub connect_timeout: Duration,
    /// How long to wait for the security handshake before giving up
    pub security_timeout: Duration,
    /// How long a graceful disconnect waits for the transport to drain.
    /// Zero disconnects immediately.
    pub disconnect_timeout: Duration,
    pub protocol_version: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            security_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_millis(500),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
