/// Lifecycle shared by the client, server and directory drivers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Disconnected, Connecting) => true,

            (Connecting, Connected) => true,
            // failure, cancel, or redirect before approval
            (Connecting, Disconnected) => true,
            (Connecting, Connecting) => true,

            (Connected, Disconnecting) => true,
            (Connected, Disconnected) => true,
            // redirect
            (Connected, Connecting) => true,

            (Disconnecting, Disconnected) => true,

            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    /// Application traffic may only flow once approved
    pub fn can_send(&self) -> bool {
        self.is_connected()
    }
}
