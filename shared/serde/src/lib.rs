mod bit_stream;
mod error;
mod fields;
mod integer;
mod registry;
mod serde;

pub use bit_stream::BitStream;
pub use error::{RegistryError, SerdeErr};
pub use fields::{de_fields, ser_fields, sorted_field_order, WireFields};
pub use integer::{SerdeInteger, UnsignedInteger, UnsignedVariableInteger};
pub use registry::{
    builtin_tags, CodecRegistry, TypeTag, ARRAY_FLAG, FIRST_USER_TAG, NULLABLE_FLAG, TAG_LIMIT,
};
pub use serde::{Serde, MAX_ARRAY_ITEMS};
