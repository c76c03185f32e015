use crate::error::SerdeErr;

const DEFAULT_CAPACITY_BYTES: usize = 64;
const VARIABLE_GROUP_BITS: u32 = 7;

/// A growable, seekable bit buffer.
///
/// The stream owns its bytes and tracks two bit counters: the content length
/// and the cursor. Bit `p` lives in byte `p / 8` at bit index `p % 8`, so
/// byte-aligned scalar writes produce plain little-endian bytes.
///
/// The mode is fixed at construction: [`BitStream::new`] gives a writable
/// stream, [`BitStream::from_bytes`] a read-only one. Writes past the current
/// capacity grow the buffer by doubling. Reads past the content length fail
/// with [`SerdeErr::EndOfStream`].
#[derive(Clone, Debug)]
pub struct BitStream {
    buffer: Vec<u8>,
    bit_length: usize,
    bit_position: usize,
    writing: bool,
}

impl BitStream {
    /// Create an empty, writable stream
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }

    /// Create an empty, writable stream with room for `bytes` bytes before
    /// the first growth
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: vec![0; bytes.max(1)],
            bit_length: 0,
            bit_position: 0,
            writing: true,
        }
    }

    /// Create a read-only stream over a copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Create a read-only stream taking ownership of `bytes`
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let bit_length = bytes.len() * 8;
        Self {
            buffer: bytes,
            bit_length,
            bit_position: 0,
            writing: false,
        }
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    /// Content length in bits
    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    /// Cursor position in bits
    pub fn bit_position(&self) -> usize {
        self.bit_position
    }

    /// Content length rounded up to whole bytes
    pub fn byte_length(&self) -> usize {
        (self.bit_length + 7) / 8
    }

    pub fn capacity_bits(&self) -> usize {
        self.buffer.len() * 8
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_length - self.bit_position
    }

    /// Whole bytes left between the cursor and the end of the content
    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bits() / 8
    }

    pub fn is_empty(&self) -> bool {
        self.bit_length == 0
    }

    pub fn is_aligned(&self) -> bool {
        self.bit_position % 8 == 0
    }

    /// Move the cursor. The position may not exceed the content length.
    pub fn seek(&mut self, bit_position: usize) -> Result<(), SerdeErr> {
        if bit_position > self.bit_length {
            return Err(SerdeErr::SeekOutOfRange {
                position: bit_position,
                length: self.bit_length,
            });
        }
        self.bit_position = bit_position;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.bit_position = 0;
    }

    /// Drop all content, keeping the allocation. Used when a stream is
    /// recycled by a pool.
    pub fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|byte| *byte = 0);
        self.bit_length = 0;
        self.bit_position = 0;
        self.writing = true;
    }

    /// The content bytes. A trailing partial byte is zero padded.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.byte_length()]
    }

    pub fn to_bytes(mut self) -> Vec<u8> {
        let length = self.byte_length();
        self.buffer.truncate(length);
        self.buffer
    }

    /// A read-only copy of this stream's content with the cursor at zero
    pub fn to_reader(&self) -> BitStream {
        let mut reader = BitStream::from_bytes(self.as_bytes());
        reader.bit_length = self.bit_length;
        reader
    }

    /// Copy everything from the cursor to the end into a new read-only
    /// stream. The original stream and its cursor are unaffected.
    pub fn get_remaining_bit_stream(&self) -> BitStream {
        let remaining = self.remaining_bits();
        if self.is_aligned() {
            let start = self.bit_position / 8;
            let mut output = BitStream::from_bytes(&self.buffer[start..self.byte_length()]);
            output.bit_length = remaining;
            return output;
        }

        let mut output = BitStream::with_capacity((remaining + 7) / 8);
        for position in self.bit_position..self.bit_length {
            output.write_bit(self.bit_at(position));
        }
        output.writing = false;
        output.bit_position = 0;
        output
    }

    /// Copy the content of `source` from its cursor to its end, verbatim,
    /// onto this stream. `source` is not advanced.
    pub fn append_remaining(&mut self, source: &BitStream) {
        self.append_from(source, source.bit_position);
    }

    /// Copy the whole content of `source`, regardless of its cursor
    pub fn append(&mut self, source: &BitStream) {
        self.append_from(source, 0);
    }

    fn append_from(&mut self, source: &BitStream, start: usize) {
        if self.is_aligned() && start % 8 == 0 {
            let first_byte = start / 8;
            let full_bytes = (source.bit_length - start) / 8;
            self.write_raw(&source.buffer[first_byte..first_byte + full_bytes]);
            for position in start + full_bytes * 8..source.bit_length {
                self.write_bit(source.bit_at(position));
            }
            return;
        }

        for position in start..source.bit_length {
            self.write_bit(source.bit_at(position));
        }
    }

    // Bits

    fn bit_at(&self, position: usize) -> bool {
        (self.buffer[position / 8] >> (position % 8)) & 1 != 0
    }

    fn reserve_bits(&mut self, bits: usize) {
        let needed_bytes = (self.bit_position + bits + 7) / 8;
        if needed_bytes <= self.buffer.len() {
            return;
        }
        let mut new_length = self.buffer.len().max(1);
        while new_length < needed_bytes {
            new_length *= 2;
        }
        self.buffer.resize(new_length, 0);
    }

    fn advance_write(&mut self, bits: usize) {
        self.bit_position += bits;
        if self.bit_position > self.bit_length {
            self.bit_length = self.bit_position;
        }
    }

    fn check_remaining(&self, bits: usize) -> Result<(), SerdeErr> {
        if self.remaining_bits() < bits {
            return Err(SerdeErr::EndOfStream {
                requested_bits: bits,
                remaining_bits: self.remaining_bits(),
            });
        }
        Ok(())
    }

    pub fn write_bit(&mut self, bit: bool) {
        debug_assert!(self.writing, "attempted to write into a read-only BitStream");
        self.reserve_bits(1);
        let byte = self.bit_position / 8;
        let mask = 1u8 << (self.bit_position % 8);
        if bit {
            self.buffer[byte] |= mask;
        } else {
            self.buffer[byte] &= !mask;
        }
        self.advance_write(1);
    }

    /// Write the low `bits` bits of `value`, least significant first
    pub fn write_bits(&mut self, value: u64, bits: u32) {
        debug_assert!(bits <= 64);
        if self.is_aligned() && bits % 8 == 0 {
            let bytes = value.to_le_bytes();
            self.write_raw(&bytes[..(bits / 8) as usize]);
            return;
        }
        for index in 0..bits {
            self.write_bit((value >> index) & 1 != 0);
        }
    }

    /// Write bytes with no length prefix
    pub fn write_raw(&mut self, bytes: &[u8]) {
        debug_assert!(self.writing, "attempted to write into a read-only BitStream");
        if self.is_aligned() {
            self.reserve_bits(bytes.len() * 8);
            let start = self.bit_position / 8;
            self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
            self.advance_write(bytes.len() * 8);
            return;
        }
        for byte in bytes {
            self.write_bits(*byte as u64, 8);
        }
    }

    pub fn read_bit(&mut self) -> Result<bool, SerdeErr> {
        self.check_remaining(1)?;
        let bit = self.bit_at(self.bit_position);
        self.bit_position += 1;
        Ok(bit)
    }

    /// Read `bits` bits, least significant first
    pub fn read_bits(&mut self, bits: u32) -> Result<u64, SerdeErr> {
        debug_assert!(bits <= 64);
        self.check_remaining(bits as usize)?;
        if self.is_aligned() && bits % 8 == 0 {
            let start = self.bit_position / 8;
            let count = (bits / 8) as usize;
            let mut bytes = [0u8; 8];
            bytes[..count].copy_from_slice(&self.buffer[start..start + count]);
            self.bit_position += bits as usize;
            return Ok(u64::from_le_bytes(bytes));
        }
        let mut value = 0u64;
        for index in 0..bits {
            if self.read_bit()? {
                value |= 1 << index;
            }
        }
        Ok(value)
    }

    /// Read `count` bytes with no length prefix
    pub fn read_raw(&mut self, count: usize) -> Result<Vec<u8>, SerdeErr> {
        self.check_remaining(count * 8)?;
        if self.is_aligned() {
            let start = self.bit_position / 8;
            let bytes = self.buffer[start..start + count].to_vec();
            self.bit_position += count * 8;
            return Ok(bytes);
        }
        let mut bytes = Vec::with_capacity(count);
        for _ in 0..count {
            bytes.push(self.read_bits(8)? as u8);
        }
        Ok(bytes)
    }

    // Scalars

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u64, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u64, 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value as u64, 32);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bits(value, 64);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    /// Booleans take a whole byte at this layer
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn read_u8(&mut self) -> Result<u8, SerdeErr> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, SerdeErr> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, SerdeErr> {
        Ok(self.read_bits(32)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64, SerdeErr> {
        self.read_bits(64)
    }

    pub fn read_i8(&mut self) -> Result<i8, SerdeErr> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, SerdeErr> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, SerdeErr> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, SerdeErr> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32, SerdeErr> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, SerdeErr> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, SerdeErr> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerdeErr::InvalidValue { type_name: "bool" }),
        }
    }

    // Variable-length integers

    /// Groups of 7 value bits, each preceded by a continue bit, least
    /// significant group first
    pub fn write_var_u64(&mut self, mut value: u64) {
        loop {
            let proceed = value >= (1 << VARIABLE_GROUP_BITS);
            self.write_bit(proceed);
            self.write_bits(value & 0x7f, VARIABLE_GROUP_BITS);
            value >>= VARIABLE_GROUP_BITS;
            if !proceed {
                return;
            }
        }
    }

    pub fn read_var_u64(&mut self) -> Result<u64, SerdeErr> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let proceed = self.read_bit()?;
            let group = self.read_bits(VARIABLE_GROUP_BITS)?;
            if shift >= 64 || (shift > 0 && group >> (64 - shift) != 0) {
                return Err(SerdeErr::InvalidValue {
                    type_name: "variable-length integer",
                });
            }
            value |= group << shift;
            shift += VARIABLE_GROUP_BITS;
            if !proceed {
                return Ok(value);
            }
        }
    }

    pub fn write_var_u32(&mut self, value: u32) {
        self.write_var_u64(value as u64);
    }

    pub fn read_var_u32(&mut self) -> Result<u32, SerdeErr> {
        u32::try_from(self.read_var_u64()?).map_err(|_| SerdeErr::InvalidValue {
            type_name: "variable-length u32",
        })
    }

    // Length-prefixed data

    /// Read a byte count and check it against what is left in the stream
    pub fn read_length(&mut self) -> Result<usize, SerdeErr> {
        let length = self.read_var_u64()?;
        if length > self.remaining_bytes() as u64 {
            return Err(SerdeErr::LengthOverflow {
                length,
                remaining_bytes: self.remaining_bytes(),
            });
        }
        Ok(length as usize)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_var_u64(bytes.len() as u64);
        self.write_raw(bytes);
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, SerdeErr> {
        let length = self.read_length()?;
        self.read_raw(length)
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn read_string(&mut self) -> Result<String, SerdeErr> {
        String::from_utf8(self.read_bytes()?).map_err(|_| SerdeErr::InvalidUtf8)
    }

    /// Write a nested stream as a length-prefixed byte range
    pub fn write_stream(&mut self, stream: &BitStream) {
        self.write_bytes(stream.as_bytes());
    }

    pub fn read_stream(&mut self) -> Result<BitStream, SerdeErr> {
        Ok(BitStream::from_vec(self.read_bytes()?))
    }
}

impl Default for BitStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams compare by content only; mode, cursor and spare capacity are
/// ignored.
impl PartialEq for BitStream {
    fn eq(&self, other: &Self) -> bool {
        self.bit_length == other.bit_length && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for BitStream {}
