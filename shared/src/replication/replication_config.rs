use std::time::Duration;

use super::state_sync::StateSyncMode;

/// Contains Config properties which will be used by the replication scheduler
#[derive(Clone, Debug)]
pub struct ReplicationConfig {
    /// How many times per second views are serialized
    pub send_rate_hz: f32,
    /// Whether newly added views also send a separate owner snapshot
    pub owner_state_differs: bool,
    /// Compressed streams send a fresh delta-init after this many deltas.
    /// 0 disables the periodic resync.
    pub delta_resync_interval: u32,
    /// Mode given to views added without an explicit one
    pub default_mode: StateSyncMode,
}

impl ReplicationConfig {
    pub fn send_interval(&self) -> Duration {
        if self.send_rate_hz <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f32(1.0 / self.send_rate_hz)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            send_rate_hz: 15.0,
            owner_state_differs: false,
            delta_resync_interval: 32,
            default_mode: StateSyncMode::ReliableDeltaCompressed,
        }
    }
}
