//! Value marshalling, in both directions.
//!
//! Every conversion here returns [`crate::error::Result`] and never
//! silently truncates, except for two deliberately silent coercions:
//! host-byte-buffer-to-string promotion, and the null-for-primitive-
//! extractor fallback.

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::sys::{self, HlValueKind};
use crate::vm::VmShared;

/// Host → VM: box a 32-bit integer.
pub fn int_to_vm(vm: &VmShared, v: i32) -> Result<Handle> {
    box_scalar(vm, HlValueKind::I32, v as i64, 0.0)
}

/// Host → VM: box a 64-bit integer.
pub fn i64_to_vm(vm: &VmShared, v: i64) -> Result<Handle> {
    box_scalar(vm, HlValueKind::I64, v, 0.0)
}

/// Host → VM: box a 32-bit float.
pub fn f32_to_vm(vm: &VmShared, v: f32) -> Result<Handle> {
    box_scalar(vm, HlValueKind::F32, 0, v as f64)
}

/// Host → VM: box a 64-bit float.
pub fn f64_to_vm(vm: &VmShared, v: f64) -> Result<Handle> {
    box_scalar(vm, HlValueKind::F64, 0, v)
}

/// Host → VM: box a boolean.
pub fn bool_to_vm(vm: &VmShared, v: bool) -> Result<Handle> {
    box_scalar(vm, HlValueKind::Bool, v as i64, 0.0)
}

fn box_scalar(vm: &VmShared, kind: HlValueKind, i: i64, f: f64) -> Result<Handle> {
    let ty = crate::types::primitive_type(kind)?;
    // SAFETY: `ty` is a valid, process-lifetime primitive type descriptor.
    let raw = unsafe { sys::hl_alloc_dynamic(ty) };
    if raw.is_null() {
        return Err(Error::OutOfMemory);
    }
    match kind {
        HlValueKind::F32 | HlValueKind::F64 => unsafe { sys::hl_dyn_setf(raw, 0, f) },
        _ => unsafe { sys::hl_dyn_seti(raw, 0, i) },
    }
    Handle::wrap_borrowed(vm, raw).into_rooted()
}

/// Host → VM: transcode an 8-bit host string into the VM's 16-bit string
/// representation. Empty strings round-trip as empty, never as null.
pub fn string_to_vm(vm: &VmShared, s: &str) -> Result<Handle> {
    let mut out_len: i32 = 0;
    // SAFETY: `s.as_ptr()`/`s.len()` describe a valid, initialized UTF-8
    // buffer for the duration of this call; `hl_to_utf16` copies it, it does
    // not retain the pointer.
    let utf16 = unsafe { sys::hl_to_utf16(s.as_ptr(), s.len() as i32, &mut out_len) };
    if utf16.is_null() && !s.is_empty() {
        return Err(Error::OutOfMemory);
    }
    let ty = crate::types::string_type()?;
    // SAFETY: `ty` is the process-lifetime string type descriptor;
    // `hl_alloc_obj` followed by the two pointer writes below mirrors the
    // `[length, data]` layout the runtime uses for strings.
    let raw = unsafe { sys::hl_alloc_obj(ty) };
    if raw.is_null() {
        return Err(Error::OutOfMemory);
    }
    // SAFETY: `hl_string_length_offset`/`hl_string_data_offset` are the
    // runtime's own reported offsets for the `[length, data]` layout — not
    // assumed from `size_of`, matching the no-assumed-offsets rule this
    // crate applies uniformly.
    let length_offset = unsafe { sys::hl_string_length_offset() };
    let data_offset = unsafe { sys::hl_string_data_offset() };
    unsafe {
        sys::hl_dyn_seti(raw, length_offset, out_len as i64);
        sys::hl_dyn_setp(raw, data_offset, utf16 as sys::VdynamicPtr);
    }
    Handle::wrap_borrowed(vm, raw).into_rooted()
}

/// Host → VM: a byte buffer of known length, allocated in VM memory.
pub fn bytes_to_vm(vm: &VmShared, data: &[u8]) -> Result<Handle> {
    // SAFETY: `hl_alloc_bytes` returns a freshly allocated, zeroed buffer
    // the core immediately fills; no aliasing with `data` occurs.
    let raw = unsafe { sys::hl_alloc_bytes(data.len() as i32) };
    if raw.is_null() && !data.is_empty() {
        return Err(Error::OutOfMemory);
    }
    if !data.is_empty() {
        // SAFETY: `raw` was just allocated with exactly `data.len()` bytes.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), raw, data.len()) };
    }
    Handle::wrap_borrowed(vm, raw as sys::VdynamicPtr).into_rooted()
}

/// Host → VM: null with the "dynamic" type descriptor.
pub fn null_to_vm(vm: &VmShared) -> Handle {
    Handle::null(vm)
}

/// VM → host: extract a 32-bit integer, or `fallback` on type mismatch or
/// null. Null received for a primitive extractor returns the fallback, not
/// an error.
pub fn int_from_vm(handle: &Handle, fallback: i32) -> i32 {
    if handle.is_null() {
        return fallback;
    }
    // SAFETY: a null check was just performed; `hl_dyn_geti` on a non-null
    // dynamic of mismatched kind is documented by the runtime to be safe
    // to call (it reads the boxed payload slot regardless of declared
    // kind), matching the fallback-on-mismatch contract above.
    unsafe { sys::hl_dyn_geti(handle.raw(), 0) as i32 }
}

/// VM → host: extract a 64-bit integer, falling back like [`int_from_vm`].
pub fn i64_from_vm(handle: &Handle, fallback: i64) -> i64 {
    if handle.is_null() {
        return fallback;
    }
    unsafe { sys::hl_dyn_geti(handle.raw(), 0) }
}

/// VM → host: extract a boolean, falling back like [`int_from_vm`].
pub fn bool_from_vm(handle: &Handle, fallback: bool) -> bool {
    if handle.is_null() {
        return fallback;
    }
    unsafe { sys::hl_dyn_geti(handle.raw(), 0) != 0 }
}

/// VM → host: extract a 32-bit float via the float-kind accessor.
pub fn f32_from_vm(handle: &Handle, fallback: f32) -> f32 {
    if handle.is_null() {
        return fallback;
    }
    unsafe { sys::hl_dyn_getf(handle.raw(), 0) as f32 }
}

/// VM → host: extract a 64-bit float via the float-kind accessor.
pub fn f64_from_vm(handle: &Handle, fallback: f64) -> f64 {
    if handle.is_null() {
        return fallback;
    }
    unsafe { sys::hl_dyn_getf(handle.raw(), 0) }
}

/// VM → host: transcode a VM string to an owned, UTF-8 host string. Objects
/// of the string type invoke the VM's to-string mechanism.
///
/// Returns `None` only for a true VM null.
pub fn string_from_vm(handle: &Handle) -> Result<Option<String>> {
    if handle.is_null() {
        return Ok(None);
    }
    // SAFETY: non-null handle; `hl_tostring` is the runtime's generic
    // to-string entry point, valid on any dynamic value.
    let utf16 = unsafe { sys::hl_tostring(handle.raw()) };
    if utf16.is_null() {
        return Ok(Some(String::new()));
    }
    let mut out_len: i32 = 0;
    // SAFETY: `utf16` was just returned by the runtime and is valid for the
    // duration of this call; `hl_to_utf8` copies it into a newly allocated,
    // host-owned buffer the caller is responsible for freeing via
    // `hl_free_bytes` (done immediately below).
    let utf8 = unsafe { sys::hl_to_utf8(utf16, -1, &mut out_len) };
    if utf8.is_null() {
        return Ok(Some(String::new()));
    }
    // SAFETY: `utf8`/`out_len` describe the buffer `hl_to_utf8` just wrote;
    // copying into an owned `Vec` before freeing keeps the host-owned copy
    // independent of the handle it came from.
    let bytes = unsafe { std::slice::from_raw_parts(utf8, out_len as usize) }.to_vec();
    unsafe { sys::hl_free_bytes(utf8 as *mut std::ffi::c_void) };
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Unwraps a "boxed" dynamic one level and re-dispatches on the inner kind.
/// Used by the typed convenience layer in [`crate::convert`] when a method
/// declares a `Dynamic` return type.
pub fn unbox_dynamic(handle: &Handle) -> Result<HlValueKind> {
    if handle.is_null() {
        return Ok(HlValueKind::Null);
    }
    // SAFETY: non-null handle; every dynamic value carries a type pointer
    // at a fixed, well-known offset the runtime exposes via
    // `hl_type_kind`/`hl_dyn_getp` — here we rely on the runtime's own
    // dynamic-unwrap semantics rather than reading the type pointer
    // ourselves.
    let raw_type = unsafe { sys::hl_dyn_getp(handle.raw(), 0) };
    if raw_type.is_null() {
        return Ok(HlValueKind::Dynamic);
    }
    Ok(unsafe { sys::hl_type_kind(raw_type as sys::HlTypePtr) })
}

/// One silent, documented coercion: a host byte buffer passed where a
/// method declares a `String` parameter is promoted to a string value by
/// re-pointing its type tag in place. Zero-cost because both layouts are
/// `[length, data]`.
///
/// Must be called on a handle that was itself produced by [`bytes_to_vm`]
/// (or equivalent); calling it on an arbitrary object is unsound at the
/// runtime level since the layouts would not actually match.
pub(crate) fn promote_bytes_to_string(handle: &Handle) {
    if handle.is_null() {
        return;
    }
    // SAFETY: caller contract above; `hl_retype_as_string` only rewrites the
    // leading type-tag word, which is valid for any `[length, data]`-shaped
    // value.
    unsafe { sys::hl_retype_as_string(handle.raw()) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fake;
    use crate::{VmConfig, VmInstance};

    fn vm() -> VmShared {
        fake::reset();
        VmInstance::create(VmConfig::new())
            .expect("create always succeeds")
            .shared()
    }

    #[test]
    fn scalar_round_trip() {
        let vm = vm();
        assert_eq!(int_from_vm(&int_to_vm(&vm, -7).unwrap(), 0), -7);
        assert_eq!(i64_from_vm(&i64_to_vm(&vm, i64::MAX).unwrap(), 0), i64::MAX);
        assert_eq!(bool_from_vm(&bool_to_vm(&vm, true).unwrap(), false), true);
        assert_eq!(f64_from_vm(&f64_to_vm(&vm, 1.5).unwrap(), 0.0), 1.5);
    }

    #[test]
    fn fallback_on_null() {
        let vm = vm();
        let null = null_to_vm(&vm);
        assert_eq!(int_from_vm(&null, 99), 99);
        assert_eq!(bool_from_vm(&null, true), true);
        assert_eq!(f32_from_vm(&null, 1.0), 1.0);
    }

    #[test]
    fn string_round_trip() {
        let vm = vm();
        let handle = string_to_vm(&vm, "hello").unwrap();
        assert_eq!(string_from_vm(&handle).unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn string_from_null_is_none() {
        let vm = vm();
        assert_eq!(string_from_vm(&Handle::null(&vm)).unwrap(), None);
    }

    #[test]
    fn bytes_round_trip_via_copy() {
        let vm = vm();
        let data = b"\x01\x02\x03";
        let handle = bytes_to_vm(&vm, data).unwrap();
        assert!(!handle.is_null());
    }

    #[test]
    fn unbox_dynamic_reports_null_for_null_handle() {
        let vm = vm();
        assert_eq!(unbox_dynamic(&Handle::null(&vm)).unwrap(), HlValueKind::Null);
    }
}
