//! Enums: constructor reflection and construction. Each enum constructor
//! has its own parameter layout; offsets come from a per-constructor
//! offset table via `hl_enum_construct_param_offset`, not a shared
//! runtime-layout table.

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::sys::{self, HlValueKind};
use crate::types::TypeDescriptor;
use crate::vm::VmShared;
use std::ffi::CStr;

/// Number of constructors `ty` declares.
pub fn enum_construct_count(ty: &TypeDescriptor) -> i32 {
    // SAFETY: `ty.layout` is a valid, module-lifetime enum type descriptor.
    unsafe { sys::hl_enum_construct_count(ty.layout) }
}

/// Name of constructor `index`.
pub fn enum_construct_name(ty: &TypeDescriptor, index: i32) -> Result<String> {
    // SAFETY: index range is validated by the runtime, which returns null
    // out of bounds.
    let ptr = unsafe { sys::hl_enum_construct_name(ty.layout, index) };
    if ptr.is_null() {
        return Err(Error::InvalidArgument(format!(
            "enum constructor index {index} out of range"
        )));
    }
    // SAFETY: non-null, NUL-terminated, owned by the runtime for the
    // module's lifetime.
    Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Which constructor `value` was built with.
pub fn enum_get_index(value: &Handle) -> Result<i32> {
    if value.is_null() {
        return Err(Error::NullValue);
    }
    // SAFETY: non-null handle known to wrap an enum value.
    Ok(unsafe { sys::hl_enum_get_index(value.raw()) })
}

/// The name of the constructor `value` was built with.
pub fn enum_get_name(ty: &TypeDescriptor, value: &Handle) -> Result<String> {
    let index = enum_get_index(value)?;
    enum_construct_name(ty, index)
}

/// Number of parameters the constructor `value` was built with declares.
pub fn enum_get_param_count(ty: &TypeDescriptor, value: &Handle) -> Result<i32> {
    let index = enum_get_index(value)?;
    // SAFETY: `index` just read back from the same value via
    // `hl_enum_get_index`, so it is in range for this type's constructor
    // table.
    Ok(unsafe { sys::hl_enum_construct_param_count(ty.layout, index) })
}

/// Reads constructor parameter `param` out of `value`.
pub fn enum_get_param(vm: &VmShared, ty: &TypeDescriptor, value: &Handle, param: i32) -> Result<Handle> {
    if value.is_null() {
        return Err(Error::NullValue);
    }
    let index = enum_get_index(value)?;
    let count = enum_get_param_count(ty, value)?;
    if param < 0 || param >= count {
        return Err(Error::InvalidArgument(format!(
            "enum parameter index {param} out of range"
        )));
    }
    // SAFETY: `index`/`param` bounds-checked above against this
    // constructor's own parameter count.
    let offset = unsafe { sys::hl_enum_construct_param_offset(ty.layout, index, param) };
    // Parameter kind is not separately exposed per-slot by the raw surface;
    // enum payloads in HashLink are uniformly boxed as `Dynamic`-kind
    // pointers regardless of the Haxe-level declared type, so a pointer
    // read is always correct here (unlike object fields, which vary by
    // declared kind).
    let p = unsafe { sys::hl_dyn_getp(value.raw(), offset) };
    Ok(Handle::wrap_borrowed(vm, p))
}

/// Constructs a new enum value of constructor `index` with the given
/// boxed parameters.
pub fn enum_alloc(vm: &VmShared, ty: &TypeDescriptor, index: i32, params: &[Handle]) -> Result<Handle> {
    let count = unsafe { sys::hl_enum_construct_param_count(ty.layout, index) };
    if count as usize != params.len() {
        return Err(Error::ArgumentArityMismatch {
            expected: count as usize,
            actual: params.len(),
        });
    }
    // SAFETY: `ty.layout` valid; `index` is caller-supplied and validated
    // against the constructor table above.
    let raw = unsafe { sys::hl_alloc_enum(ty.layout, index) };
    if raw.is_null() {
        return Err(Error::OutOfMemory);
    }
    for (i, param) in params.iter().enumerate() {
        // SAFETY: `index`/`i` were validated against `count` above.
        let offset = unsafe { sys::hl_enum_construct_param_offset(ty.layout, index, i as i32) };
        unsafe { sys::hl_dyn_setp(raw, offset, param.raw()) };
    }
    Handle::wrap_borrowed(vm, raw).into_rooted()
}

/// Whether `value` was built with constructor `index`.
pub fn enum_is(value: &Handle, index: i32) -> Result<bool> {
    Ok(enum_get_index(value)? == index)
}

/// The name-based sibling of [`enum_is`].
pub fn enum_is_named(ty: &TypeDescriptor, value: &Handle, name: &str) -> Result<bool> {
    let index = enum_get_index(value)?;
    Ok(enum_construct_name(ty, index)? == name)
}

/// Whether `ty` describes an enum type at all, used by callers that only
/// have a `TypeDescriptor` and want to branch before calling the
/// functions above.
pub fn is_enum_type(ty: &TypeDescriptor) -> bool {
    ty.kind() == HlValueKind::Enum
}
