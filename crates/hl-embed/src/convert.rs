//! Typed convenience layer over [`crate::value`]. Nothing here is part of
//! the core marshalling contract — every function is a thin, generic
//! wrapper so host code stops hand-matching on Rust types at every call
//! site.

use crate::error::Result;
use crate::handle::Handle;
use crate::vm::VmShared;

/// Converts a host value into a [`Handle`], rooted, ready to pass as an
/// argument or store beyond the current call.
pub trait IntoVm {
    fn into_vm(self, vm: &VmShared) -> Result<Handle>;
}

/// Extracts a host value back out of a [`Handle`]. Mirrors the
/// null-for-primitive-extractor fallback: a null handle yields
/// `Self::default()`.
pub trait FromVm: Sized {
    fn from_vm(handle: &Handle) -> Self;
}

impl IntoVm for i32 {
    fn into_vm(self, vm: &VmShared) -> Result<Handle> {
        crate::value::int_to_vm(vm, self)
    }
}

impl FromVm for i32 {
    fn from_vm(handle: &Handle) -> Self {
        crate::value::int_from_vm(handle, 0)
    }
}

impl IntoVm for i64 {
    fn into_vm(self, vm: &VmShared) -> Result<Handle> {
        crate::value::i64_to_vm(vm, self)
    }
}

impl FromVm for i64 {
    fn from_vm(handle: &Handle) -> Self {
        crate::value::i64_from_vm(handle, 0)
    }
}

impl IntoVm for f32 {
    fn into_vm(self, vm: &VmShared) -> Result<Handle> {
        crate::value::f32_to_vm(vm, self)
    }
}

impl FromVm for f32 {
    fn from_vm(handle: &Handle) -> Self {
        crate::value::f32_from_vm(handle, 0.0)
    }
}

impl IntoVm for f64 {
    fn into_vm(self, vm: &VmShared) -> Result<Handle> {
        crate::value::f64_to_vm(vm, self)
    }
}

impl FromVm for f64 {
    fn from_vm(handle: &Handle) -> Self {
        crate::value::f64_from_vm(handle, 0.0)
    }
}

impl IntoVm for bool {
    fn into_vm(self, vm: &VmShared) -> Result<Handle> {
        crate::value::bool_to_vm(vm, self)
    }
}

impl FromVm for bool {
    fn from_vm(handle: &Handle) -> Self {
        crate::value::bool_from_vm(handle, false)
    }
}

impl IntoVm for &str {
    fn into_vm(self, vm: &VmShared) -> Result<Handle> {
        crate::value::string_to_vm(vm, self)
    }
}

impl IntoVm for String {
    fn into_vm(self, vm: &VmShared) -> Result<Handle> {
        crate::value::string_to_vm(vm, &self)
    }
}

/// `None` on a true VM null, matching the string-extraction contract
/// (distinct from the zero-value fallback the scalar impls use).
impl FromVm for Option<String> {
    fn from_vm(handle: &Handle) -> Self {
        crate::value::string_from_vm(handle).ok().flatten()
    }
}

/// Every [`Handle`] is trivially its own [`IntoVm`]/[`FromVm`] — useful in
/// generic call-site code that is parameterized over argument type.
impl IntoVm for Handle {
    fn into_vm(self, _vm: &VmShared) -> Result<Handle> {
        Ok(self)
    }
}
