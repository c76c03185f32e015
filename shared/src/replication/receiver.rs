use std::collections::HashMap;

use log::warn;
use weft_serde::BitStream;

use crate::{
    types::{PeerId, ViewId},
    wire::internal_message::{InternalMessage, StateChannel},
};

use super::{
    entity_host::{DeserializeInfo, EntityHost},
    error::ReplicationError,
    snapshot::SnapshotReceiver,
};

/// Validates incoming state-sync messages and applies them to the host
#[derive(Default)]
pub struct ReplicationReceiver {
    streams: HashMap<(ViewId, StateChannel), SnapshotReceiver>,
}

impl ReplicationReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one state-sync message. Rejected snapshots leave the view on
    /// its last good state. Returns `Ok(false)` for messages that carry no
    /// state.
    pub fn receive<H: EntityHost + ?Sized>(
        &mut self,
        host: &mut H,
        message: InternalMessage,
        sender: PeerId,
        timestamp_ms: Option<u64>,
    ) -> Result<bool, ReplicationError> {
        let (view, channel, mut state) = match message {
            InternalMessage::StateSync {
                view,
                channel,
                state,
            } => {
                self.stream(view, channel).receive_full(timestamp_ms)?;
                (view, channel, state)
            }
            InternalMessage::StateDelta {
                view,
                owner,
                init,
                sequence,
                data,
            } => {
                let channel = if owner {
                    StateChannel::Owner
                } else {
                    StateChannel::Proxy
                };
                let stream = self.stream(view, channel);
                let bytes = data.to_bytes();
                let snapshot = if init {
                    stream.receive_init(sequence, &bytes, timestamp_ms)
                } else {
                    stream.receive_delta(sequence, &bytes, timestamp_ms)
                }
                .inspect_err(|error| warn!("dropping state update for {}: {}", view, error))?;
                (view, channel, BitStream::from_vec(snapshot))
            }
            _ => return Ok(false),
        };

        let info = DeserializeInfo {
            view,
            channel,
            sender,
            timestamp_ms,
        };
        host.deserialize(&mut state, &info);
        Ok(true)
    }

    /// Whether the compressed stream of `view` is waiting for a delta-init
    pub fn is_awaiting_init(&self, view: ViewId, channel: StateChannel) -> bool {
        self.streams
            .get(&(view, channel))
            .map(|stream| stream.is_awaiting_init())
            .unwrap_or(true)
    }

    pub fn forget_view(&mut self, view: ViewId) {
        self.streams.retain(|(stream_view, _), _| *stream_view != view);
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }

    fn stream(&mut self, view: ViewId, channel: StateChannel) -> &mut SnapshotReceiver {
        self.streams
            .entry((view, channel))
            .or_insert_with(SnapshotReceiver::new)
    }
}
