use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use log::trace;

use crate::{
    bit_stream::BitStream,
    error::{RegistryError, SerdeErr},
    serde::{read_item_count, Serde},
};

/// One-byte identifier written in front of a typed value
pub type TypeTag = u8;

/// Set on the tag of an auto-derived nullable codec
pub const NULLABLE_FLAG: TypeTag = 0x40;
/// Set on the tag of an auto-derived array codec
pub const ARRAY_FLAG: TypeTag = 0x80;
/// Base tags must stay below this value so the derived flags stay free
pub const TAG_LIMIT: TypeTag = NULLABLE_FLAG;
/// First tag not used by the builtin codecs
pub const FIRST_USER_TAG: TypeTag = 16;

pub mod builtin_tags {
    use super::TypeTag;

    pub const BOOL: TypeTag = 1;
    pub const U8: TypeTag = 2;
    pub const I8: TypeTag = 3;
    pub const U16: TypeTag = 4;
    pub const I16: TypeTag = 5;
    pub const U32: TypeTag = 6;
    pub const I32: TypeTag = 7;
    pub const U64: TypeTag = 8;
    pub const I64: TypeTag = 9;
    pub const F32: TypeTag = 10;
    pub const F64: TypeTag = 11;
    pub const STRING: TypeTag = 12;
    pub const BIT_STREAM: TypeTag = 13;
}

type SerFn = Arc<dyn Fn(&dyn Any, &mut BitStream) -> Result<(), SerdeErr> + Send + Sync>;
type DeFn = Arc<dyn Fn(&mut BitStream) -> Result<Box<dyn Any>, SerdeErr> + Send + Sync>;

struct CodecEntry {
    type_name: &'static str,
    tag: TypeTag,
    ser: SerFn,
    de: DeFn,
    derived_from: Option<TypeId>,
}

/// Maps a value's static type to its tag, serializer and deserializer.
///
/// Registering `T` also registers `Option<T>` under `tag | NULLABLE_FLAG`
/// and `Vec<T>` under `tag | ARRAY_FLAG`. Unregistering `T` removes both.
/// Types without an entry fall back to their own [`Serde`] impl for
/// untagged reads and writes, and fail with [`SerdeErr::UnknownType`] for
/// tagged ones.
///
/// The registry is built once before traffic starts and then shared by
/// reference.
pub struct CodecRegistry {
    by_type: HashMap<TypeId, CodecEntry>,
    by_tag: HashMap<TypeTag, TypeId>,
}

impl CodecRegistry {
    /// A registry with no codecs at all
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
            by_tag: HashMap::new(),
        }
    }

    /// A registry holding the scalar, string and stream codecs
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert_serde::<bool>(builtin_tags::BOOL);
        registry.insert_serde::<u8>(builtin_tags::U8);
        registry.insert_serde::<i8>(builtin_tags::I8);
        registry.insert_serde::<u16>(builtin_tags::U16);
        registry.insert_serde::<i16>(builtin_tags::I16);
        registry.insert_serde::<u32>(builtin_tags::U32);
        registry.insert_serde::<i32>(builtin_tags::I32);
        registry.insert_serde::<u64>(builtin_tags::U64);
        registry.insert_serde::<i64>(builtin_tags::I64);
        registry.insert_serde::<f32>(builtin_tags::F32);
        registry.insert_serde::<f64>(builtin_tags::F64);
        registry.insert_serde::<String>(builtin_tags::STRING);
        registry.insert_serde::<BitStream>(builtin_tags::BIT_STREAM);
        registry
    }

    /// Register `T` using its [`Serde`] impl
    pub fn register<T: Serde + Any + Send + Sync>(
        &mut self,
        tag: TypeTag,
    ) -> Result<(), RegistryError> {
        self.register_with::<T>(tag, T::ser, T::de)
    }

    /// Register `T` with explicit serialize and deserialize functions
    pub fn register_with<T: Any + Send + Sync>(
        &mut self,
        tag: TypeTag,
        ser: impl Fn(&T, &mut BitStream) + Send + Sync + 'static,
        de: impl Fn(&mut BitStream) -> Result<T, SerdeErr> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        if tag >= TAG_LIMIT {
            return Err(RegistryError::TagOutOfRange {
                tag,
                max: TAG_LIMIT,
            });
        }
        for candidate in [TypeId::of::<T>(), TypeId::of::<Option<T>>(), TypeId::of::<Vec<T>>()] {
            if let Some(existing) = self.by_type.get(&candidate) {
                return Err(RegistryError::AlreadyRegistered {
                    type_name: existing.type_name,
                });
            }
        }
        for candidate in [tag, tag | NULLABLE_FLAG, tag | ARRAY_FLAG] {
            if let Some(existing) = self
                .by_tag
                .get(&candidate)
                .and_then(|type_id| self.by_type.get(type_id))
            {
                return Err(RegistryError::TagInUse {
                    tag: candidate,
                    existing: existing.type_name,
                });
            }
        }

        self.insert_family::<T>(tag, Arc::new(ser), Arc::new(de));
        trace!("registered codec for {} with tag {:#04x}", type_name::<T>(), tag);
        Ok(())
    }

    /// Remove `T` and its derived nullable and array codecs. Returns whether
    /// `T` was registered.
    pub fn unregister<T: Any>(&mut self) -> bool {
        let base = TypeId::of::<T>();
        let Some(entry) = self.by_type.remove(&base) else {
            return false;
        };
        self.by_tag.remove(&entry.tag);

        let derived: Vec<TypeId> = self
            .by_type
            .iter()
            .filter(|(_, entry)| entry.derived_from == Some(base))
            .map(|(type_id, _)| *type_id)
            .collect();
        for type_id in derived {
            if let Some(entry) = self.by_type.remove(&type_id) {
                self.by_tag.remove(&entry.tag);
            }
        }
        true
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn tag_of<T: Any>(&self) -> Option<TypeTag> {
        self.by_type.get(&TypeId::of::<T>()).map(|entry| entry.tag)
    }

    /// Write `value` without a tag
    pub fn write<T: Serde + Any>(&self, stream: &mut BitStream, value: &T) -> Result<(), SerdeErr> {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(entry) => (entry.ser)(value, stream),
            None => {
                value.ser(stream);
                Ok(())
            }
        }
    }

    /// Read an untagged value of type `T`
    pub fn read<T: Serde + Any>(&self, stream: &mut BitStream) -> Result<T, SerdeErr> {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(entry) => downcast::<T>((entry.de)(stream)?),
            None => T::de(stream),
        }
    }

    /// Write the type tag of `T`, then `value`
    pub fn write_typed<T: Any>(&self, stream: &mut BitStream, value: &T) -> Result<(), SerdeErr> {
        let entry = self.entry::<T>()?;
        stream.write_u8(entry.tag);
        (entry.ser)(value, stream)
    }

    /// Read a type tag, check that it belongs to `T`, then read the value
    pub fn read_typed<T: Any>(&self, stream: &mut BitStream) -> Result<T, SerdeErr> {
        let entry = self.entry::<T>()?;
        let found = stream.read_u8()?;
        if found != entry.tag {
            return Err(SerdeErr::TypeTagMismatch {
                expected: entry.tag,
                found,
            });
        }
        downcast::<T>((entry.de)(stream)?)
    }

    /// Read a type tag and the value it announces, whatever its type
    pub fn read_tagged_any(
        &self,
        stream: &mut BitStream,
    ) -> Result<(TypeTag, Box<dyn Any>), SerdeErr> {
        let tag = stream.read_u8()?;
        let entry = self
            .by_tag
            .get(&tag)
            .and_then(|type_id| self.by_type.get(type_id))
            .ok_or(SerdeErr::UnknownTag { tag })?;
        Ok((tag, (entry.de)(stream)?))
    }

    /// Write the tag of `value`'s concrete type, then `value`
    pub fn write_tagged_any(
        &self,
        stream: &mut BitStream,
        value: &dyn Any,
    ) -> Result<(), SerdeErr> {
        let entry = self
            .by_type
            .get(&Any::type_id(value))
            .ok_or(SerdeErr::UnknownType {
                type_name: "<unregistered value>",
            })?;
        stream.write_u8(entry.tag);
        (entry.ser)(value, stream)
    }

    /// Write a count, then each value with its tag
    pub fn write_tagged_list(
        &self,
        stream: &mut BitStream,
        values: &[&dyn Any],
    ) -> Result<(), SerdeErr> {
        stream.write_var_u64(values.len() as u64);
        for value in values {
            self.write_tagged_any(stream, *value)?;
        }
        Ok(())
    }

    /// Read a list written by [`CodecRegistry::write_tagged_list`]
    pub fn read_tagged_list(
        &self,
        stream: &mut BitStream,
    ) -> Result<Vec<(TypeTag, Box<dyn Any>)>, SerdeErr> {
        let count = read_item_count(stream, false)?;
        let mut values = Vec::with_capacity((count as usize).min(stream.remaining_bytes() + 1));
        for _ in 0..count {
            values.push(self.read_tagged_any(stream)?);
        }
        Ok(values)
    }

    fn entry<T: Any>(&self) -> Result<&CodecEntry, SerdeErr> {
        self.by_type
            .get(&TypeId::of::<T>())
            .ok_or(SerdeErr::UnknownType {
                type_name: type_name::<T>(),
            })
    }

    fn insert_serde<T: Serde + Any + Send + Sync>(&mut self, tag: TypeTag) {
        self.insert_family::<T>(tag, Arc::new(T::ser), Arc::new(T::de));
    }

    fn insert_family<T: Any>(
        &mut self,
        tag: TypeTag,
        ser: Arc<dyn Fn(&T, &mut BitStream) + Send + Sync>,
        de: Arc<dyn Fn(&mut BitStream) -> Result<T, SerdeErr> + Send + Sync>,
    ) {
        let base = TypeId::of::<T>();

        // T
        {
            let ser = ser.clone();
            let de = de.clone();
            self.insert_entry::<T>(
                tag,
                Arc::new(move |value: &dyn Any, stream: &mut BitStream| -> Result<(), SerdeErr> {
                    ser(downcast_ref::<T>(value)?, stream);
                    Ok(())
                }),
                Arc::new(move |stream: &mut BitStream| -> Result<Box<dyn Any>, SerdeErr> {
                    Ok(Box::new(de(stream)?) as Box<dyn Any>)
                }),
                None,
            );
        }

        // Option<T>
        {
            let ser = ser.clone();
            let de = de.clone();
            self.insert_entry::<Option<T>>(
                tag | NULLABLE_FLAG,
                Arc::new(move |value: &dyn Any, stream: &mut BitStream| -> Result<(), SerdeErr> {
                    match downcast_ref::<Option<T>>(value)? {
                        Some(inner) => {
                            stream.write_bit(true);
                            ser(inner, stream);
                        }
                        None => stream.write_bit(false),
                    }
                    Ok(())
                }),
                Arc::new(move |stream: &mut BitStream| -> Result<Box<dyn Any>, SerdeErr> {
                    let value: Option<T> = if stream.read_bit()? {
                        Some(de(stream)?)
                    } else {
                        None
                    };
                    Ok(Box::new(value) as Box<dyn Any>)
                }),
                Some(base),
            );
        }

        // Vec<T>
        self.insert_entry::<Vec<T>>(
            tag | ARRAY_FLAG,
            Arc::new(move |value: &dyn Any, stream: &mut BitStream| -> Result<(), SerdeErr> {
                let items = downcast_ref::<Vec<T>>(value)?;
                stream.write_var_u64(items.len() as u64);
                for item in items {
                    ser(item, stream);
                }
                Ok(())
            }),
            Arc::new(move |stream: &mut BitStream| -> Result<Box<dyn Any>, SerdeErr> {
                let count = read_item_count(stream, std::mem::size_of::<T>() == 0)?;
                let mut items: Vec<T> =
                    Vec::with_capacity((count as usize).min(stream.remaining_bytes() + 1));
                for _ in 0..count {
                    items.push(de(stream)?);
                }
                Ok(Box::new(items) as Box<dyn Any>)
            }),
            Some(base),
        );
    }

    fn insert_entry<T: Any>(
        &mut self,
        tag: TypeTag,
        ser: SerFn,
        de: DeFn,
        derived_from: Option<TypeId>,
    ) {
        let type_id = TypeId::of::<T>();
        self.by_tag.insert(tag, type_id);
        self.by_type.insert(
            type_id,
            CodecEntry {
                type_name: type_name::<T>(),
                tag,
                ser,
                de,
                derived_from,
            },
        );
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast_ref<T: Any>(value: &dyn Any) -> Result<&T, SerdeErr> {
    value.downcast_ref::<T>().ok_or(SerdeErr::ValueTypeMismatch {
        type_name: type_name::<T>(),
    })
}

fn downcast<T: Any>(value: Box<dyn Any>) -> Result<T, SerdeErr> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| SerdeErr::ValueTypeMismatch {
            type_name: type_name::<T>(),
        })
}
