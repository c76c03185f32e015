use thiserror::Error;

use crate::registry::TypeTag;

/// Errors produced while reading from a [`BitStream`](crate::BitStream) or
/// dispatching through the [`CodecRegistry`](crate::CodecRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// Attempted to read beyond the stream's content length
    #[error("Attempted to read {requested_bits} bits with only {remaining_bits} bits remaining in the stream")]
    EndOfStream {
        requested_bits: usize,
        remaining_bits: usize,
    },

    /// Attempted to move the cursor beyond the stream's content length
    #[error("Cannot seek to bit {position}, stream length is {length} bits")]
    SeekOutOfRange { position: usize, length: usize },

    /// A decoded value is not valid for its type
    #[error("Invalid value decoded for type {type_name}")]
    InvalidValue { type_name: &'static str },

    /// A decoded string is not valid UTF-8
    #[error("Decoded string is not valid UTF-8")]
    InvalidUtf8,

    /// A length prefix exceeds what the stream can possibly contain
    #[error("Length prefix {length} exceeds the {remaining_bytes} bytes remaining in the stream")]
    LengthOverflow { length: u64, remaining_bytes: usize },

    /// An array count is above the decoder's item limit
    #[error("Array of {count} items exceeds the limit of {max}")]
    TooManyItems { count: u64, max: u64 },

    /// A typed operation was requested for a type with no registered codec
    #[error("No codec registered for type {type_name}")]
    UnknownType { type_name: &'static str },

    /// A type tag read from the stream has no registered codec
    #[error("No codec registered for type tag {tag:#04x}")]
    UnknownTag { tag: TypeTag },

    /// The type tag read from the stream does not match the requested type
    #[error("Type tag mismatch: expected {expected:#04x}, found {found:#04x}")]
    TypeTagMismatch { expected: TypeTag, found: TypeTag },

    /// A type-erased codec was handed a value of a different type
    #[error("Codec for {type_name} received a value of another type")]
    ValueTypeMismatch { type_name: &'static str },
}

/// Errors that can occur while registering codecs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The tag is reserved for derived (nullable/array) codecs
    #[error("Type tag {tag:#04x} is outside the user range (must be below {max:#04x})")]
    TagOutOfRange { tag: TypeTag, max: TypeTag },

    /// The tag is already assigned to another type
    #[error("Type tag {tag:#04x} is already registered to {existing}")]
    TagInUse { tag: TypeTag, existing: &'static str },

    /// The type already has a codec
    #[error("Type {type_name} already has a registered codec")]
    AlreadyRegistered { type_name: &'static str },
}
