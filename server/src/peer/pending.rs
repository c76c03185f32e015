use std::time::Instant;

use weft_shared::{BitStream, Link};

pub(crate) enum PendingStage {
    /// Waiting for the connect request, possibly after a security handshake
    AwaitingRequest,
    /// The request passed every automatic check; the application decides
    AwaitingApproval {
        login: BitStream,
        /// Checked but not yet spent; redeemed once an identity is assigned
        handover: Option<String>,
    },
}

/// A transport connection that has not been approved yet. No identity is
/// assigned until the connect request is accepted.
pub(crate) struct PendingConnection {
    pub link: Link,
    pub since: Instant,
    pub stage: PendingStage,
}

impl PendingConnection {
    pub fn new(link: Link, now: Instant) -> Self {
        Self {
            link,
            since: now,
            stage: PendingStage::AwaitingRequest,
        }
    }
}
