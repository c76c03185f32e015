/// Negotiated security of one connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SecurityStatus {
    #[default]
    Disabled,
    /// A handshake is in flight
    Requested,
    Enabled,
    Disabling,
}

/// An encrypt/decrypt capability negotiated per connection.
///
/// The handshake is opaque: the initiator sends the bytes from
/// [`initiate`](Security::initiate), the responder answers with the bytes
/// from [`respond`](Security::respond), and the initiator finishes with
/// [`complete`](Security::complete). Both ends are `Enabled` afterwards.
pub trait Security {
    fn status(&self) -> SecurityStatus;

    /// Start a handshake, returning the request to send
    fn initiate(&mut self) -> Vec<u8>;

    /// Answer a handshake request. `None` rejects it.
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>>;

    /// Finish a handshake with the remote answer. Returns whether the
    /// session is now enabled.
    fn complete(&mut self, response: &[u8]) -> bool;

    fn encrypt(&mut self, plain: &[u8]) -> Option<Vec<u8>>;

    fn decrypt(&mut self, cipher: &[u8]) -> Option<Vec<u8>>;

    fn disable(&mut self);

    fn is_enabled(&self) -> bool {
        self.status() == SecurityStatus::Enabled
    }
}

/// Creates one [`Security`] session per connection
pub trait SecurityFactory {
    fn create(&self) -> Box<dyn Security>;
}
