use crate::{bit_stream::BitStream, error::SerdeErr};

/// The default codec for plain data structs.
///
/// Fields are written in the order of their names, not their declaration
/// order, so two copies of a struct that declare the same fields in a
/// different order produce identical bytes. Implement it with
/// [`wire_struct!`](crate::wire_struct).
pub trait WireFields: Sized + Default {
    /// Field names in declaration order
    const FIELD_NAMES: &'static [&'static str];

    /// Declaration indices sorted by field name. Computed once per type.
    fn field_order() -> &'static [usize];

    fn ser_field(&self, index: usize, stream: &mut BitStream);

    fn de_field(&mut self, index: usize, stream: &mut BitStream) -> Result<(), SerdeErr>;
}

pub fn sorted_field_order(names: &[&str]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..names.len()).collect();
    order.sort_by(|a, b| names[*a].cmp(names[*b]));
    order
}

pub fn ser_fields<T: WireFields>(value: &T, stream: &mut BitStream) {
    for index in T::field_order() {
        value.ser_field(*index, stream);
    }
}

pub fn de_fields<T: WireFields>(stream: &mut BitStream) -> Result<T, SerdeErr> {
    let mut value = T::default();
    for index in T::field_order() {
        value.de_field(*index, stream)?;
    }
    Ok(value)
}

/// Declare a struct together with its name-ordered [`WireFields`] and
/// [`Serde`](crate::Serde) impls. The struct must implement `Default`.
///
/// ```
/// weft_serde::wire_struct! {
///     #[derive(Debug, Default, PartialEq)]
///     pub struct Score {
///         pub player: String,
///         pub points: u32,
///     }
/// }
/// ```
#[macro_export]
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$field_meta:meta])* $field_vis:vis $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($(#[$field_meta])* $field_vis $field: $ty,)*
        }

        impl $crate::WireFields for $name {
            const FIELD_NAMES: &'static [&'static str] = &[$(stringify!($field)),*];

            fn field_order() -> &'static [usize] {
                static ORDER: ::std::sync::OnceLock<::std::vec::Vec<usize>> =
                    ::std::sync::OnceLock::new();
                ORDER.get_or_init(|| $crate::sorted_field_order(Self::FIELD_NAMES))
            }

            #[allow(unused_assignments, unused_variables, unused_mut)]
            fn ser_field(&self, index: usize, stream: &mut $crate::BitStream) {
                let mut current: usize = 0;
                $(
                    if index == current {
                        $crate::Serde::ser(&self.$field, stream);
                        return;
                    }
                    current += 1;
                )*
            }

            #[allow(unused_assignments, unused_variables, unused_mut)]
            fn de_field(
                &mut self,
                index: usize,
                stream: &mut $crate::BitStream,
            ) -> ::std::result::Result<(), $crate::SerdeErr> {
                let mut current: usize = 0;
                $(
                    if index == current {
                        self.$field = $crate::Serde::de(stream)?;
                        return Ok(());
                    }
                    current += 1;
                )*
                Err($crate::SerdeErr::InvalidValue {
                    type_name: stringify!($name),
                })
            }
        }

        impl $crate::Serde for $name {
            fn ser(&self, stream: &mut $crate::BitStream) {
                $crate::ser_fields(self, stream);
            }

            fn de(stream: &mut $crate::BitStream) -> ::std::result::Result<Self, $crate::SerdeErr> {
                $crate::de_fields(stream)
            }
        }
    };
}

/// Implement [`Serde`](crate::Serde) for a fieldless enum by delegating to
/// its integer representation. The enum must be `Copy`, convert into the
/// representation with `From`, and back with `TryFrom`.
#[macro_export]
macro_rules! wire_enum {
    ($name:ty as $repr:ty) => {
        impl $crate::Serde for $name {
            fn ser(&self, stream: &mut $crate::BitStream) {
                let value: $repr = (*self).into();
                $crate::Serde::ser(&value, stream);
            }

            fn de(stream: &mut $crate::BitStream) -> ::std::result::Result<Self, $crate::SerdeErr> {
                let value = <$repr as $crate::Serde>::de(stream)?;
                <$name>::try_from(value).map_err(|_| $crate::SerdeErr::InvalidValue {
                    type_name: stringify!($name),
                })
            }
        }
    };
}
