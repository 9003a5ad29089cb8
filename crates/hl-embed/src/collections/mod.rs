//! Collection adapters: arrays, maps, enums, byte buffers, and abstracts.

pub mod array;
pub mod bytes;
pub mod enums;
pub mod map;

pub use array::{ArrayElementKind, array_get, array_length, array_new, array_push, array_set};
pub use bytes::{bytes_length, bytes_new, bytes_read, bytes_write};
pub use enums::{
    enum_alloc, enum_construct_count, enum_construct_name, enum_get_index, enum_get_name,
    enum_get_param, enum_get_param_count, enum_is, enum_is_named,
};
pub use map::{map_get, map_has, map_keys, map_new, map_set};

/// Abstracts are compile-time wrappers; at runtime they are their
/// underlying type.
pub fn is_abstract(ty: &crate::types::TypeDescriptor) -> bool {
    ty.is_abstract()
}

pub fn abstract_name(ty: &crate::types::TypeDescriptor) -> crate::error::Result<String> {
    ty.name()
}
