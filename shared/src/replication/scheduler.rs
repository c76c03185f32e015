use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};

use log::{debug, trace};
use weft_serde::BitStream;

use crate::{
    time::Timer,
    types::{PeerId, ViewId},
    wire::{
        flags::MessageFlags,
        header::Destination,
        internal_message::{InternalMessage, StateChannel},
        network_message::NetworkMessage,
    },
};

use super::{
    entity_host::{EntityHost, SerializeInfo},
    replication_config::ReplicationConfig,
    snapshot::{CompressedSnapshot, SnapshotSender},
    state_sync::StateSyncMode,
};

/// Who a state update is for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    /// Every peer that can see the view, minus `except`
    Observers { except: Option<PeerId> },
    /// Only the owner of the view
    Owner(PeerId),
    /// The secondary authorities mirroring the view
    CellProxies(Vec<PeerId>),
}

/// One serialized snapshot ready to be dispatched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateUpdate {
    pub view: ViewId,
    pub audience: Audience,
    pub message: InternalMessage,
    pub reliable: bool,
    pub time_ms: u64,
}

impl StateUpdate {
    /// Wrap the update in a timestamped envelope
    pub fn to_network_message(&self) -> NetworkMessage {
        let flags = if self.reliable {
            MessageFlags::RELIABLE
        } else {
            MessageFlags::empty()
        };
        self.message
            .to_message(Destination::Broadcast, flags)
            .with_timestamp(self.time_ms)
    }
}

#[derive(Clone, Debug)]
struct ReplicatedView {
    mode: StateSyncMode,
    owner: PeerId,
    owner_state_differs: bool,
    cell_proxies: BTreeSet<PeerId>,
    proxy_stream: SnapshotSender,
    owner_stream: SnapshotSender,
}

impl ReplicatedView {
    fn reset_streams(&mut self) {
        self.proxy_stream.reset();
        self.owner_stream.reset();
    }
}

/// Serializes every replicated view at a fixed rate and turns the snapshots
/// into state-sync messages
pub struct ReplicationScheduler {
    config: ReplicationConfig,
    views: BTreeMap<ViewId, ReplicatedView>,
    timer: Timer,
}

impl ReplicationScheduler {
    pub fn new(config: ReplicationConfig, now: Instant) -> Self {
        let timer = Timer::new(config.send_interval(), now);
        Self {
            config,
            views: BTreeMap::new(),
            timer,
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn set_send_rate(&mut self, send_rate_hz: f32) {
        self.config.send_rate_hz = send_rate_hz;
        self.timer.set_duration(self.config.send_interval());
    }

    /// Start replicating `view` with the default mode
    pub fn add_view(&mut self, view: ViewId, owner: PeerId) {
        self.add_view_with_mode(view, owner, self.config.default_mode);
    }

    pub fn add_view_with_mode(&mut self, view: ViewId, owner: PeerId, mode: StateSyncMode) {
        self.views.insert(
            view,
            ReplicatedView {
                mode,
                owner,
                owner_state_differs: self.config.owner_state_differs,
                cell_proxies: BTreeSet::new(),
                proxy_stream: SnapshotSender::new(),
                owner_stream: SnapshotSender::new(),
            },
        );
    }

    /// Stop replicating `view`, discarding its snapshot history
    pub fn remove_view(&mut self, view: ViewId) -> bool {
        self.views.remove(&view).is_some()
    }

    pub fn contains(&self, view: ViewId) -> bool {
        self.views.contains_key(&view)
    }

    pub fn mode(&self, view: ViewId) -> Option<StateSyncMode> {
        self.views.get(&view).map(|entry| entry.mode)
    }

    pub fn owner(&self, view: ViewId) -> Option<PeerId> {
        self.views.get(&view).map(|entry| entry.owner)
    }

    /// Change how `view` is replicated. Compressed streams restart with a
    /// delta-init.
    pub fn set_mode(&mut self, view: ViewId, mode: StateSyncMode) -> bool {
        let Some(entry) = self.views.get_mut(&view) else {
            return false;
        };
        if entry.mode != mode {
            debug!("{} state sync {:?} -> {:?}", view, entry.mode, mode);
            entry.mode = mode;
            entry.reset_streams();
        }
        true
    }

    pub fn set_owner(&mut self, view: ViewId, owner: PeerId) -> bool {
        let Some(entry) = self.views.get_mut(&view) else {
            return false;
        };
        entry.owner = owner;
        entry.owner_stream.reset();
        true
    }

    pub fn set_owner_state_differs(&mut self, view: ViewId, differs: bool) -> bool {
        let Some(entry) = self.views.get_mut(&view) else {
            return false;
        };
        entry.owner_state_differs = differs;
        entry.owner_stream.reset();
        true
    }

    pub fn add_cell_proxy(&mut self, view: ViewId, peer: PeerId) -> bool {
        match self.views.get_mut(&view) {
            Some(entry) => entry.cell_proxies.insert(peer),
            None => false,
        }
    }

    pub fn remove_cell_proxy(&mut self, view: ViewId, peer: PeerId) -> bool {
        match self.views.get_mut(&view) {
            Some(entry) => entry.cell_proxies.remove(&peer),
            None => false,
        }
    }

    /// Drop every reference to a disconnected peer
    pub fn forget_peer(&mut self, peer: PeerId) {
        for entry in self.views.values_mut() {
            entry.cell_proxies.remove(&peer);
        }
    }

    /// Restart every compressed stream, e.g. after a new observer appears
    pub fn restart_streams(&mut self, view: ViewId) {
        if let Some(entry) = self.views.get_mut(&view) {
            entry.reset_streams();
        }
    }

    pub fn clear(&mut self) {
        self.views.clear();
    }

    /// Whether the send interval has elapsed. Restarts the interval when it
    /// has.
    pub fn should_send(&mut self, now: Instant) -> bool {
        if self.timer.ringing(now) {
            self.timer.reset(now);
            return true;
        }
        false
    }

    /// Serialize every replicated view
    pub fn collect<H: EntityHost + ?Sized>(
        &mut self,
        host: &mut H,
        time_ms: u64,
    ) -> Vec<StateUpdate> {
        let resync_interval = self.config.delta_resync_interval;
        let mut updates = Vec::new();

        for (view, entry) in self.views.iter_mut() {
            if entry.mode.is_off() {
                continue;
            }
            let view = *view;
            let reliable = entry.mode.is_reliable();
            let info = SerializeInfo {
                view,
                owner: entry.owner,
                time_ms,
            };
            let separate_owner = entry.owner_state_differs && !entry.owner.is_server();

            let mut stream = BitStream::new();
            if host.serialize_proxy(&mut stream, &info) {
                let except = if separate_owner { Some(entry.owner) } else { None };
                if let Some(message) = state_message(
                    view,
                    entry.mode,
                    false,
                    &mut entry.proxy_stream,
                    stream,
                    resync_interval,
                ) {
                    updates.push(StateUpdate {
                        view,
                        audience: Audience::Observers { except },
                        message,
                        reliable,
                        time_ms,
                    });
                }
            }

            if separate_owner {
                let mut stream = BitStream::new();
                if host.serialize_owner(&mut stream, &info) {
                    if let Some(message) = state_message(
                        view,
                        entry.mode,
                        true,
                        &mut entry.owner_stream,
                        stream,
                        resync_interval,
                    ) {
                        updates.push(StateUpdate {
                            view,
                            audience: Audience::Owner(entry.owner),
                            message,
                            reliable,
                            time_ms,
                        });
                    }
                }
            }

            if !entry.cell_proxies.is_empty() {
                let mut stream = BitStream::new();
                if host.serialize_cell_proxy(&mut stream, &info) {
                    updates.push(StateUpdate {
                        view,
                        audience: Audience::CellProxies(
                            entry.cell_proxies.iter().copied().collect(),
                        ),
                        message: InternalMessage::StateSync {
                            view,
                            channel: StateChannel::CellProxy,
                            state: stream,
                        },
                        reliable,
                        time_ms,
                    });
                }
            }
        }

        trace!("collected {} state updates", updates.len());
        updates
    }
}

fn state_message(
    view: ViewId,
    mode: StateSyncMode,
    owner: bool,
    sender: &mut SnapshotSender,
    stream: BitStream,
    resync_interval: u32,
) -> Option<InternalMessage> {
    if !mode.is_delta() {
        let channel = if owner {
            StateChannel::Owner
        } else {
            StateChannel::Proxy
        };
        return Some(InternalMessage::StateSync {
            view,
            channel,
            state: stream,
        });
    }

    match sender.prepare(stream.to_bytes(), resync_interval)? {
        CompressedSnapshot::Init { data } => Some(InternalMessage::StateDelta {
            view,
            owner,
            init: true,
            sequence: 0,
            data: BitStream::from_vec(data),
        }),
        CompressedSnapshot::Delta { sequence, data } => Some(InternalMessage::StateDelta {
            view,
            owner,
            init: false,
            sequence,
            data: BitStream::from_vec(data),
        }),
    }
}
