use thiserror::Error;

use weft_serde::SerdeErr;

/// Reasons a received snapshot is dropped. None of these are fatal: the
/// view keeps its last good state until the next full snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// A delta arrived with a sequence number other than the one expected
    #[error("Delta sequence {received} does not follow {expected}; waiting for the next delta-init")]
    SequenceMismatch { expected: u8, received: u8 },

    /// A delta arrived before any baseline, or after a rejected one
    #[error("Delta received while waiting for a delta-init baseline")]
    AwaitingInit,

    /// A reconstructed snapshot does not match the baseline length
    #[error("Decompressed delta covers {actual} bytes but the baseline has {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// A snapshot older than the last accepted one
    #[error("Snapshot stamped {timestamp_ms} ms is older than the last accepted {last_ms} ms")]
    Stale { timestamp_ms: u64, last_ms: u64 },

    /// The delta encoding itself is malformed
    #[error("Malformed delta: {0}")]
    MalformedDelta(#[from] SerdeErr),
}
