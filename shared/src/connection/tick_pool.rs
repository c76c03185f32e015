use weft_serde::BitStream;

const DEFAULT_BUFFER_BYTES: usize = 512;

/// A bounded set of scratch streams for unreliable sends, recycled once per
/// tick.
///
/// A stream handed out by [`acquire`](TickPool::acquire) borrows the pool,
/// so it can't outlive the next [`reset`](TickPool::reset). Reliable sends
/// never use the pool: [`Outgoing::Reliable`](crate::Outgoing) owns its
/// bytes.
pub struct TickPool {
    buffers: Vec<BitStream>,
    in_use: usize,
    capacity: usize,
}

impl TickPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Vec::new(),
            in_use: 0,
            capacity,
        }
    }

    /// A cleared stream, or `None` once every pooled stream has been used
    /// this tick
    pub fn acquire(&mut self) -> Option<&mut BitStream> {
        if self.in_use >= self.capacity {
            return None;
        }
        if self.in_use == self.buffers.len() {
            self.buffers
                .push(BitStream::with_capacity(DEFAULT_BUFFER_BYTES));
        }
        let index = self.in_use;
        self.in_use += 1;
        let buffer = &mut self.buffers[index];
        buffer.clear();
        Some(buffer)
    }

    /// Make every stream available again. Call at each tick boundary.
    pub fn reset(&mut self) {
        self.in_use = 0;
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

impl Default for TickPool {
    fn default() -> Self {
        Self::new(64)
    }
}
