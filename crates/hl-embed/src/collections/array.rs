//! Arrays: two physical layouts, `ArrayBytes_*` (a contiguous primitive
//! buffer) and `ArrayObj` (a pointer array), both wrapped in an object
//! whose `size`/`elements` field order is `[size: i32, elements:
//! raw_array_ptr]` regardless of declaration order.

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::sys::{self, HlValueKind};
use crate::vm::VmShared;

/// The element kind an array was created for, selecting which
/// `ArrayBytes_*`/`ArrayObj` wrapper type to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayElementKind {
    I32,
    I64,
    F32,
    F64,
    Object,
}

impl ArrayElementKind {
    fn raw_kind(self) -> HlValueKind {
        match self {
            ArrayElementKind::I32 => HlValueKind::I32,
            ArrayElementKind::I64 => HlValueKind::I64,
            ArrayElementKind::F32 => HlValueKind::F32,
            ArrayElementKind::F64 => HlValueKind::F64,
            ArrayElementKind::Object => HlValueKind::Obj,
        }
    }

    fn wrapper_type_name(self) -> &'static str {
        match self {
            ArrayElementKind::I32 => "hl.types.ArrayBytes_Int",
            ArrayElementKind::I64 => "hl.types.ArrayBytes_I64",
            ArrayElementKind::F32 => "hl.types.ArrayBytes_Single",
            ArrayElementKind::F64 => "hl.types.ArrayBytes_Double",
            ArrayElementKind::Object => "hl.types.ArrayObj",
        }
    }
}

/// An array handle plus the element-kind metadata needed to read/write it
/// without re-deriving the wrapper type on every access.
pub struct VmArray {
    handle: Handle,
    elem: ArrayElementKind,
    size_offset: u32,
    elements_offset: u32,
}

/// Allocates a raw array of `length` elements, then wraps it in the
/// correct `ArrayBytes_*`/`ArrayObj` object so it can be passed to methods
/// accepting `Array<T>`.
pub fn array_new(vm: &VmShared, elem: ArrayElementKind, length: usize) -> Result<VmArray> {
    // SAFETY: `hl_alloc_array` allocates the raw, contiguous/pointer
    // storage; the element kind it's given determines the per-element
    // stride.
    let raw_storage = unsafe { sys::hl_alloc_array(elem.raw_kind(), length as i32) };
    if raw_storage.is_null() && length != 0 {
        return Err(Error::OutOfMemory);
    }

    let wrapper_ty = crate::types::resolve(vm, elem.wrapper_type_name())?;
    // SAFETY: `wrapper_ty.layout` is the `$`-prefixed runtime-layout
    // descriptor for the chosen `ArrayBytes_*`/`ArrayObj` class.
    let obj = unsafe { sys::hl_alloc_obj(wrapper_ty.layout) };
    if obj.is_null() {
        return Err(Error::OutOfMemory);
    }

    // Field offsets for `size`/`elements` come from the runtime layout,
    // never assumed, even though the physical order is documented to be
    // `[size, elements]` regardless of declaration order.
    let size_offset = unsafe { sys::hl_array_size_offset() };
    let elements_offset = unsafe { sys::hl_array_elements_offset() };
    unsafe {
        sys::hl_dyn_seti(obj, size_offset, length as i64);
        sys::hl_dyn_setp(obj, elements_offset, raw_storage as sys::VdynamicPtr);
    }

    let handle = Handle::wrap_rooted(vm, obj)?;
    Ok(VmArray {
        handle,
        elem,
        size_offset,
        elements_offset,
    })
}

impl VmArray {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    fn elements_ptr(&self) -> sys::VdynamicPtr {
        // SAFETY: `elements_offset` was read from the runtime layout at
        // construction and is valid for this object's lifetime.
        unsafe { sys::hl_dyn_getp(self.handle.raw(), self.elements_offset) }
    }
}

/// Current array length; works on either layout.
pub fn array_length(arr: &VmArray) -> i32 {
    // SAFETY: `size_offset` read from the runtime layout at construction.
    unsafe { sys::hl_dyn_geti(arr.handle.raw(), arr.size_offset) as i32 }
}

/// Reads element `index`; out-of-range access returns null.
pub fn array_get(vm: &VmShared, arr: &VmArray, index: i32) -> Handle {
    if index < 0 || index >= array_length(arr) {
        return Handle::null(vm);
    }
    let base = arr.elements_ptr();
    let elem_offset = element_byte_offset(arr.elem, index);
    match arr.elem {
        ArrayElementKind::I32 | ArrayElementKind::I64 => {
            // SAFETY: bounds-checked above; `elem_offset` derived from the
            // element's fixed stride within the contiguous buffer.
            let v = unsafe { sys::hl_dyn_geti(base, elem_offset) };
            crate::value::i64_to_vm(vm, v).unwrap_or_else(|_| Handle::null(vm))
        }
        ArrayElementKind::F32 | ArrayElementKind::F64 => {
            let v = unsafe { sys::hl_dyn_getf(base, elem_offset) };
            crate::value::f64_to_vm(vm, v).unwrap_or_else(|_| Handle::null(vm))
        }
        ArrayElementKind::Object => {
            let p = unsafe { sys::hl_dyn_getp(base, elem_offset) };
            Handle::wrap_borrowed(vm, p)
        }
    }
}

/// Writes element `index`; fails on out-of-range write.
pub fn array_set(arr: &VmArray, index: i32, value: &Handle) -> Result<()> {
    if index < 0 || index >= array_length(arr) {
        return Err(Error::InvalidArgument(format!(
            "array index {index} out of range"
        )));
    }
    let base = arr.elements_ptr();
    let elem_offset = element_byte_offset(arr.elem, index);
    match arr.elem {
        ArrayElementKind::I32 | ArrayElementKind::I64 => {
            let v = crate::value::i64_from_vm(value, 0);
            // SAFETY: bounds-checked above.
            unsafe { sys::hl_dyn_seti(base, elem_offset, v) };
        }
        ArrayElementKind::F32 | ArrayElementKind::F64 => {
            let v = crate::value::f64_from_vm(value, 0.0);
            unsafe { sys::hl_dyn_setf(base, elem_offset, v) };
        }
        ArrayElementKind::Object => {
            unsafe { sys::hl_dyn_setp(base, elem_offset, value.raw()) };
        }
    }
    Ok(())
}

/// Appends `value`. HashLink arrays are fixed-size once allocated; push is
/// modelled as the standard library operation would expose it —
/// grow-by-reallocating a new backing array and re-pointing
/// `elements`/`size` in place, keeping the wrapper object identity stable
/// for any `Handle`s already referencing it.
pub fn array_push(vm: &VmShared, arr: &mut VmArray, value: &Handle) -> Result<()> {
    let old_len = array_length(arr);
    let new_len = old_len + 1;
    // SAFETY: same allocation contract as `array_new`.
    let new_storage = unsafe { sys::hl_alloc_array(arr.elem.raw_kind(), new_len) };
    if new_storage.is_null() {
        return Err(Error::OutOfMemory);
    }
    let elem_size = element_stride(arr.elem);
    if old_len > 0 {
        // SAFETY: `new_storage` was just allocated with room for
        // `new_len` elements of the array's fixed stride; copying
        // `old_len` of them leaves the trailing slot for the pushed value.
        unsafe {
            std::ptr::copy_nonoverlapping(
                arr.elements_ptr() as *const u8,
                new_storage as *mut u8,
                old_len as usize * elem_size,
            )
        };
    }
    unsafe {
        sys::hl_dyn_setp(
            arr.handle.raw(),
            arr.elements_offset,
            new_storage as sys::VdynamicPtr,
        );
        sys::hl_dyn_seti(arr.handle.raw(), arr.size_offset, new_len as i64);
    }
    array_set(arr, old_len, value)
}

fn element_stride(elem: ArrayElementKind) -> usize {
    match elem {
        ArrayElementKind::I32 | ArrayElementKind::F32 => 4,
        ArrayElementKind::I64 | ArrayElementKind::F64 | ArrayElementKind::Object => 8,
    }
}

fn element_byte_offset(elem: ArrayElementKind, index: i32) -> u32 {
    index as u32 * element_stride(elem) as u32
}
