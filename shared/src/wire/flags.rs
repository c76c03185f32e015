use bitflags::bitflags;

bitflags! {
    /// Delivery options of a message.
    ///
    /// Only `TYPED` and the timestamp presence travel in the header byte;
    /// `RELIABLE` picks the transport channel, `ENCRYPTED` the frame kind, and
    /// `BUFFERED` is carried by the selector of named messages.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u8 {
        const RELIABLE = 1 << 0;
        /// Retained by the server and replayed to late joiners
        const BUFFERED = 1 << 1;
        const ENCRYPTED = 1 << 2;
        /// Payload values are prefixed with registry type tags
        const TYPED = 1 << 3;
        const TIMESTAMPED = 1 << 4;
    }
}

impl MessageFlags {
    /// Buffered messages are always reliable
    pub fn normalized(self) -> Self {
        if self.contains(Self::BUFFERED) {
            self | Self::RELIABLE
        } else {
            self
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.contains(Self::RELIABLE)
    }

    pub fn is_buffered(&self) -> bool {
        self.contains(Self::BUFFERED)
    }

    pub fn is_encrypted(&self) -> bool {
        self.contains(Self::ENCRYPTED)
    }
}
