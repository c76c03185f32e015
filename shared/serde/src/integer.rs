use crate::{bit_stream::BitStream, error::SerdeErr, serde::Serde};

pub type UnsignedInteger<const BITS: u8> = SerdeInteger<false, BITS>;
pub type UnsignedVariableInteger<const BITS: u8> = SerdeInteger<true, BITS>;

/// An unsigned integer written with an explicit bit width.
///
/// Fixed integers always take `BITS` bits. Variable integers are written as
/// groups of `BITS` value bits, each preceded by a continue bit, least
/// significant group first, so `UnsignedVariableInteger<7>` matches
/// [`BitStream::write_var_u64`].
// The generic wrapper delegates to a non-generic inner type to limit
// monomorphization.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SerdeInteger<const VARIABLE: bool, const BITS: u8> {
    inner: IntegerInner,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
struct IntegerInner {
    value: u64,
    variable: bool,
    bits: u8,
}

impl IntegerInner {
    fn max_fixed(bits: u8) -> u64 {
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    fn fits(variable: bool, bits: u8, value: u64) -> bool {
        variable || value <= Self::max_fixed(bits)
    }

    fn ser(&self, stream: &mut BitStream) {
        if !self.variable {
            stream.write_bits(self.value, self.bits as u32);
            return;
        }
        let mut value = self.value;
        loop {
            let proceed = value > Self::max_fixed(self.bits);
            stream.write_bit(proceed);
            stream.write_bits(value & Self::max_fixed(self.bits), self.bits as u32);
            value = value.checked_shr(self.bits as u32).unwrap_or(0);
            if !proceed {
                return;
            }
        }
    }

    fn de(stream: &mut BitStream, variable: bool, bits: u8) -> Result<Self, SerdeErr> {
        if !variable {
            let value = stream.read_bits(bits as u32)?;
            return Ok(Self {
                value,
                variable,
                bits,
            });
        }

        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let proceed = stream.read_bit()?;
            let group = stream.read_bits(bits as u32)?;
            if shift >= 64 || group.checked_shl(shift).map(|v| v >> shift) != Some(group) {
                return Err(SerdeErr::InvalidValue {
                    type_name: "UnsignedVariableInteger",
                });
            }
            value |= group << shift;
            shift += bits as u32;
            if !proceed {
                return Ok(Self {
                    value,
                    variable,
                    bits,
                });
            }
        }
    }

    fn bit_length(&self) -> u32 {
        if !self.variable {
            return self.bits as u32;
        }
        let mut output = 0;
        let mut value = self.value;
        loop {
            output += 1 + self.bits as u32;
            if value <= Self::max_fixed(self.bits) {
                return output;
            }
            value >>= self.bits;
        }
    }
}

impl<const VARIABLE: bool, const BITS: u8> SerdeInteger<VARIABLE, BITS> {
    /// Wrap `value`, failing if a fixed-width integer cannot hold it
    pub fn new<T: Into<u64>>(value: T) -> Result<Self, SerdeErr> {
        debug_assert!(BITS > 0 && BITS <= 64);
        let value = value.into();
        if !IntegerInner::fits(VARIABLE, BITS, value) {
            return Err(SerdeErr::InvalidValue {
                type_name: "UnsignedInteger",
            });
        }
        Ok(Self {
            inner: IntegerInner {
                value,
                variable: VARIABLE,
                bits: BITS,
            },
        })
    }

    /// Wrap `value`, keeping only the low `BITS` bits for fixed widths
    pub fn truncated(value: u64) -> Self {
        let value = if VARIABLE {
            value
        } else {
            value & IntegerInner::max_fixed(BITS)
        };
        Self {
            inner: IntegerInner {
                value,
                variable: VARIABLE,
                bits: BITS,
            },
        }
    }

    pub fn get(&self) -> u64 {
        self.inner.value
    }

    pub fn bit_length(&self) -> u32 {
        self.inner.bit_length()
    }
}

impl<const VARIABLE: bool, const BITS: u8> Serde for SerdeInteger<VARIABLE, BITS> {
    fn ser(&self, stream: &mut BitStream) {
        self.inner.ser(stream);
    }

    fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
        let inner = IntegerInner::de(stream, VARIABLE, BITS)?;
        Ok(Self { inner })
    }
}
