use log::{trace, warn};

use super::{
    delta::{self, DeltaOutcome},
    error::ReplicationError,
};

/// What a compressed stream sends this tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompressedSnapshot {
    /// A full baseline. Always carries sequence 0.
    Init { data: Vec<u8> },
    /// A diff against the previous snapshot
    Delta { sequence: u8, data: Vec<u8> },
}

/// Sending half of a delta-compressed state stream
#[derive(Clone, Debug, Default)]
pub struct SnapshotSender {
    previous: Option<Vec<u8>>,
    sequence: u8,
    since_init: u32,
}

impl SnapshotSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the baseline so the next snapshot is sent in full
    pub fn reset(&mut self) {
        self.previous = None;
        self.sequence = 0;
        self.since_init = 0;
    }

    /// Decide how to send `next`. Returns `None` when nothing changed.
    ///
    /// A non-zero `resync_interval` forces a fresh baseline after that many
    /// deltas, so unreliable streams recover from loss.
    pub fn prepare(&mut self, next: Vec<u8>, resync_interval: u32) -> Option<CompressedSnapshot> {
        let resync_due = resync_interval > 0 && self.since_init >= resync_interval;
        let outcome = match &self.previous {
            None => DeltaOutcome::Init,
            Some(previous) => match delta::encode(previous, &next) {
                DeltaOutcome::Unchanged => return None,
                _ if resync_due => DeltaOutcome::Init,
                outcome => outcome,
            },
        };

        let snapshot = match outcome {
            DeltaOutcome::Delta(data) => {
                self.sequence = self.sequence.wrapping_add(1);
                self.since_init += 1;
                CompressedSnapshot::Delta {
                    sequence: self.sequence,
                    data,
                }
            }
            _ => {
                self.sequence = 0;
                self.since_init = 0;
                CompressedSnapshot::Init { data: next.clone() }
            }
        };
        self.previous = Some(next);
        Some(snapshot)
    }
}

/// Receiving half of a state stream. Enforces timestamp order for every
/// snapshot and strict sequence order for deltas.
#[derive(Clone, Debug, Default)]
pub struct SnapshotReceiver {
    baseline: Option<Vec<u8>>,
    expected_sequence: u8,
    awaiting_init: bool,
    last_timestamp_ms: Option<u64>,
}

impl SnapshotReceiver {
    pub fn new() -> Self {
        Self {
            awaiting_init: true,
            ..Self::default()
        }
    }

    pub fn is_awaiting_init(&self) -> bool {
        self.awaiting_init
    }

    /// Reject snapshots older than the last accepted one
    pub fn check_timestamp(&mut self, timestamp_ms: Option<u64>) -> Result<(), ReplicationError> {
        let Some(timestamp_ms) = timestamp_ms else {
            return Ok(());
        };
        if let Some(last_ms) = self.last_timestamp_ms {
            if timestamp_ms < last_ms {
                return Err(ReplicationError::Stale {
                    timestamp_ms,
                    last_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        Ok(())
    }

    /// An uncompressed snapshot
    pub fn receive_full(&mut self, timestamp_ms: Option<u64>) -> Result<(), ReplicationError> {
        self.check_timestamp(timestamp_ms)
    }

    /// A baseline. Accepted whatever the previous state of the stream.
    pub fn receive_init(
        &mut self,
        sequence: u8,
        data: &[u8],
        timestamp_ms: Option<u64>,
    ) -> Result<Vec<u8>, ReplicationError> {
        self.check_timestamp(timestamp_ms)?;
        self.baseline = Some(data.to_vec());
        self.expected_sequence = sequence.wrapping_add(1);
        if self.awaiting_init {
            trace!("delta stream resynchronized at sequence {}", sequence);
        }
        self.awaiting_init = false;
        Ok(data.to_vec())
    }

    /// A diff. Accepted only if it directly follows the last accepted
    /// snapshot; otherwise the stream waits for the next baseline.
    pub fn receive_delta(
        &mut self,
        sequence: u8,
        data: &[u8],
        timestamp_ms: Option<u64>,
    ) -> Result<Vec<u8>, ReplicationError> {
        self.check_timestamp(timestamp_ms)?;
        let baseline = match (&self.baseline, self.awaiting_init) {
            (Some(baseline), false) => baseline,
            _ => return Err(ReplicationError::AwaitingInit),
        };
        if sequence != self.expected_sequence {
            warn!(
                "delta sequence {} does not follow {}, waiting for a delta-init",
                sequence,
                self.expected_sequence.wrapping_sub(1)
            );
            self.awaiting_init = true;
            return Err(ReplicationError::SequenceMismatch {
                expected: self.expected_sequence,
                received: sequence,
            });
        }
        match delta::apply(baseline, data) {
            Ok(next) => {
                self.baseline = Some(next.clone());
                self.expected_sequence = sequence.wrapping_add(1);
                Ok(next)
            }
            Err(error) => {
                self.awaiting_init = true;
                Err(error)
            }
        }
    }
}
