use std::time::{Duration, Instant};

/// Monotonic millisecond clock used for message timestamps.
///
/// Local time counts from the clock's creation. Network time is local time
/// shifted by an offset; a server keeps offset zero, a client adopts the
/// server's clock from the connect response so both sides stamp and unwrap
/// messages in the same timeline.
#[derive(Clone, Debug)]
pub struct NetworkClock {
    epoch: Instant,
    offset_ms: i64,
}

impl NetworkClock {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            offset_ms: 0,
        }
    }

    pub fn local_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    pub fn network_ms(&self, now: Instant) -> u64 {
        let local = self.local_ms(now) as i64;
        (local + self.offset_ms).max(0) as u64
    }

    /// Align network time with a remote clock that read `remote_ms` at `now`
    pub fn sync_to(&mut self, remote_ms: u64, now: Instant) {
        self.offset_ms = remote_ms as i64 - self.local_ms(now) as i64;
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    pub fn reset(&mut self) {
        self.offset_ms = 0;
    }
}

/// Rings once `duration` has elapsed since the last reset
#[derive(Clone, Debug)]
pub struct Timer {
    duration: Duration,
    last: Instant,
}

impl Timer {
    pub fn new(duration: Duration, now: Instant) -> Self {
        Self {
            duration,
            last: now,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }

    pub fn ringing(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last) >= self.duration
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }
}
