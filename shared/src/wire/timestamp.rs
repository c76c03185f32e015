use weft_serde::{BitStream, SerdeErr};

use super::flags::MessageFlags;

/// How far into the future a timestamp may point before it is treated as a
/// wrapped value from the past
pub const MAX_FORWARD_SKEW_MS: u64 = 1_000;

/// Width of the truncated timestamp carried in a header
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimestampWidth {
    None,
    Bits16,
    Bits24,
    Bits40,
}

impl TimestampWidth {
    /// Buffered messages may be replayed long after they were sent so they
    /// get the widest field
    pub fn for_flags(flags: MessageFlags) -> Self {
        if !flags.contains(MessageFlags::TIMESTAMPED) {
            Self::None
        } else if flags.is_buffered() {
            Self::Bits40
        } else if flags.is_reliable() {
            Self::Bits24
        } else {
            Self::Bits16
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Bits16 => 16,
            Self::Bits24 => 24,
            Self::Bits40 => 40,
        }
    }

    pub(crate) fn kind(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Bits16 => 1,
            Self::Bits24 => 2,
            Self::Bits40 => 3,
        }
    }

    pub(crate) fn from_kind(kind: u8) -> Self {
        match kind & 0b11 {
            0 => Self::None,
            1 => Self::Bits16,
            2 => Self::Bits24,
            _ => Self::Bits40,
        }
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits()) - 1
    }

    /// Keep the low bits of a millisecond clock value
    pub fn encode(&self, time_ms: u64) -> u64 {
        time_ms & self.mask()
    }

    /// Rebuild a full clock value from its low bits, picking the candidate in
    /// the window `(now + skew - 2^N, now + skew]`
    pub fn unwrap(&self, encoded: u64, now_ms: u64) -> u64 {
        if *self == Self::None {
            return now_ms;
        }
        let modulus = 1u64 << self.bits();
        let limit = now_ms + MAX_FORWARD_SKEW_MS;
        let mut candidate = (now_ms & !self.mask()) | (encoded & self.mask());
        if candidate > limit {
            if candidate >= modulus {
                candidate -= modulus;
            }
        } else if candidate + modulus <= limit {
            candidate += modulus;
        }
        candidate
    }

    pub fn write(&self, stream: &mut BitStream, time_ms: u64) {
        if *self != Self::None {
            stream.write_bits(self.encode(time_ms), self.bits());
        }
    }

    pub fn read(&self, stream: &mut BitStream, now_ms: u64) -> Result<Option<u64>, SerdeErr> {
        if *self == Self::None {
            return Ok(None);
        }
        let encoded = stream.read_bits(self.bits())?;
        Ok(Some(self.unwrap(encoded, now_ms)))
    }
}
