use crate::{bit_stream::BitStream, error::SerdeErr};

/// A type that knows how to write itself into, and read itself from, a
/// [`BitStream`]
pub trait Serde: Sized {
    /// `true` for the nullable and array wrappers, which the registry never
    /// derives further codecs from
    const DERIVED: bool = false;

    fn ser(&self, stream: &mut BitStream);

    fn de(stream: &mut BitStream) -> Result<Self, SerdeErr>;
}

macro_rules! impl_serde_scalar {
    ($type:ty, $write:ident, $read:ident) => {
        impl Serde for $type {
            fn ser(&self, stream: &mut BitStream) {
                stream.$write(*self);
            }

            fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
                stream.$read()
            }
        }
    };
}

impl_serde_scalar!(bool, write_bool, read_bool);
impl_serde_scalar!(u8, write_u8, read_u8);
impl_serde_scalar!(i8, write_i8, read_i8);
impl_serde_scalar!(u16, write_u16, read_u16);
impl_serde_scalar!(i16, write_i16, read_i16);
impl_serde_scalar!(u32, write_u32, read_u32);
impl_serde_scalar!(i32, write_i32, read_i32);
impl_serde_scalar!(u64, write_u64, read_u64);
impl_serde_scalar!(i64, write_i64, read_i64);
impl_serde_scalar!(f32, write_f32, read_f32);
impl_serde_scalar!(f64, write_f64, read_f64);

impl Serde for String {
    fn ser(&self, stream: &mut BitStream) {
        stream.write_string(self);
    }

    fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
        stream.read_string()
    }
}

impl Serde for BitStream {
    fn ser(&self, stream: &mut BitStream) {
        stream.write_stream(self);
    }

    fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
        stream.read_stream()
    }
}

impl Serde for () {
    fn ser(&self, _: &mut BitStream) {}

    fn de(_: &mut BitStream) -> Result<Self, SerdeErr> {
        Ok(())
    }
}

/// Upper bound on the element count of any decoded array
pub const MAX_ARRAY_ITEMS: u64 = 1 << 20;

/// Read an array count and reject counts the stream cannot hold. Elements
/// that are not zero-sized take at least one bit each.
pub(crate) fn read_item_count(stream: &mut BitStream, zero_sized: bool) -> Result<u64, SerdeErr> {
    let count = stream.read_var_u64()?;
    if count > MAX_ARRAY_ITEMS {
        return Err(SerdeErr::TooManyItems {
            count,
            max: MAX_ARRAY_ITEMS,
        });
    }
    if !zero_sized && count > stream.remaining_bits() as u64 {
        return Err(SerdeErr::LengthOverflow {
            length: count,
            remaining_bytes: stream.remaining_bytes(),
        });
    }
    Ok(count)
}

// Nullable: one flag bit, then the value when present
impl<T: Serde> Serde for Option<T> {
    const DERIVED: bool = true;

    fn ser(&self, stream: &mut BitStream) {
        match self {
            Some(value) => {
                stream.write_bit(true);
                value.ser(stream);
            }
            None => stream.write_bit(false),
        }
    }

    fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
        if stream.read_bit()? {
            Ok(Some(T::de(stream)?))
        } else {
            Ok(None)
        }
    }
}

// Array: variable-length count, then each element
impl<T: Serde> Serde for Vec<T> {
    const DERIVED: bool = true;

    fn ser(&self, stream: &mut BitStream) {
        stream.write_var_u64(self.len() as u64);
        for item in self {
            item.ser(stream);
        }
    }

    fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
        let count = read_item_count(stream, std::mem::size_of::<T>() == 0)?;
        let mut output = Vec::with_capacity((count as usize).min(stream.remaining_bytes() + 1));
        for _ in 0..count {
            output.push(T::de(stream)?);
        }
        Ok(output)
    }
}

macro_rules! impl_serde_tuple {
    ($($name:ident),+) => {
        impl<$($name: Serde),+> Serde for ($($name,)+) {
            #[allow(non_snake_case)]
            fn ser(&self, stream: &mut BitStream) {
                let ($($name,)+) = self;
                $($name.ser(stream);)+
            }

            fn de(stream: &mut BitStream) -> Result<Self, SerdeErr> {
                Ok(($($name::de(stream)?,)+))
            }
        }
    };
}

impl_serde_tuple!(A);
impl_serde_tuple!(A, B);
impl_serde_tuple!(A, B, C);
impl_serde_tuple!(A, B, C, D);
