use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use log::trace;

use crate::{connection::error::IdentityError, types::PeerId};

/// Hands out peer identities. A released identity is only reused after the
/// recycle delay, so late messages addressed to the previous owner can't
/// reach a new one.
pub struct IdentityPool {
    next: u32,
    limit: u32,
    recycle_delay: Duration,
    in_use: HashSet<PeerId>,
    // oldest release first
    released: VecDeque<(PeerId, Instant)>,
    released_at: HashMap<PeerId, Instant>,
}

impl IdentityPool {
    pub fn new(recycle_delay: Duration) -> Self {
        Self::with_limit(recycle_delay, PeerId::UNASSIGNED.0 - 1)
    }

    /// A pool that never hands out identities above `limit`
    pub fn with_limit(recycle_delay: Duration, limit: u32) -> Self {
        Self {
            next: PeerId::FIRST_CLIENT.0,
            limit,
            recycle_delay,
            in_use: HashSet::new(),
            released: VecDeque::new(),
            released_at: HashMap::new(),
        }
    }

    pub fn allocate(&mut self, now: Instant) -> Result<PeerId, IdentityError> {
        if let Some((peer, released)) = self.released.front().copied() {
            if now.saturating_duration_since(released) >= self.recycle_delay {
                self.released.pop_front();
                self.released_at.remove(&peer);
                self.in_use.insert(peer);
                trace!("recycled identity {}", peer);
                return Ok(peer);
            }
        }

        while self.next <= self.limit {
            let peer = PeerId(self.next);
            self.next += 1;
            if !self.in_use.contains(&peer) && !self.released_at.contains_key(&peer) {
                self.in_use.insert(peer);
                return Ok(peer);
            }
        }

        Err(IdentityError::Exhausted)
    }

    /// Take a specific identity, e.g. to keep a player's id across a handover
    pub fn claim(&mut self, peer: PeerId, now: Instant) -> Result<(), IdentityError> {
        if !peer.is_assigned() || peer.is_server() || peer.0 > self.limit {
            return Err(IdentityError::Reserved { peer });
        }
        if self.in_use.contains(&peer) {
            return Err(IdentityError::InUse { peer });
        }
        if let Some(released) = self.released_at.get(&peer) {
            let elapsed = now.saturating_duration_since(*released);
            if elapsed < self.recycle_delay {
                return Err(IdentityError::RecycledTooSoon {
                    peer,
                    elapsed_ms: elapsed.as_millis() as u64,
                    cooldown_ms: self.recycle_delay.as_millis() as u64,
                });
            }
            self.released_at.remove(&peer);
            self.released.retain(|(released_peer, _)| *released_peer != peer);
        }
        self.in_use.insert(peer);
        Ok(())
    }

    /// Return an identity. Releasing an identity that is not in use does
    /// nothing.
    pub fn release(&mut self, peer: PeerId, now: Instant) {
        if self.in_use.remove(&peer) {
            self.released.push_back((peer, now));
            self.released_at.insert(peer, now);
        }
    }

    pub fn is_in_use(&self, peer: PeerId) -> bool {
        self.in_use.contains(&peer)
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }
}
