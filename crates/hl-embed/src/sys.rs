//! Raw bindings to the runtime primitives the core consumes.
//!
//! This module is intentionally thin: it declares the `extern "C"` surface
//! of the underlying HashLink runtime (`libhl`'s `hl.h`/`hlmodule.h`) plus
//! the handful of `#[repr(C)]` shapes the core reads fields out of by
//! offset (the runtime-layout descriptor). Nothing here is safe to call
//! directly outside of this crate; every wrapper in `crate::handle`,
//! `crate::value`, etc. is responsible for upholding the invariants this
//! crate documents (rooting, thread registration, stack markers).
//!
//! Optional symbols (the async-I/O loop, the Haxe event loop, hot reload)
//! are resolved through [`OptionalSymbols`] rather than linked directly, so
//! that a module built without those facilities does not prevent the host
//! from loading at all — optional subsystems are reached via soft linkage.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_void};
use std::os::raw::c_uchar;

/// Opaque VM-heap pointer. The GC owns what it points to; we only ever
/// hold it behind a root or a stack frame.
pub type VdynamicPtr = *mut c_void;

/// Opaque type descriptor.
pub type HlTypePtr = *mut c_void;

/// Opaque executable. May be a bound closure (`vclosure`) carrying a
/// receiver, or a bare function-table entry.
pub type HlFunctionPtr = *mut c_void;

/// Opaque loaded bytecode unit.
pub type HlModulePtr = *mut c_void;

/// Per-type runtime layout: field offsets and method table, read by
/// declaration-order index rather than assumed contiguous.
#[repr(C)]
pub struct HlRuntimeLayout {
    pub nfields: c_int,
    pub nmethods: c_int,
    /// Indexed by declaration-order field index; byte offset into the
    /// object's physical layout.
    pub field_offsets: *const u32,
    /// Indexed by declaration-order method index; index into the owning
    /// module's function table.
    pub method_findex: *const u32,
}

/// A resolved field or method slot, keyed by the runtime's stable name
/// hash.
#[repr(C)]
pub struct HlSlot {
    pub hash: u32,
    pub offset_or_findex: u32,
    pub kind: HlValueKind,
}

/// The kind tag carried by a `VmType`/dynamic value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HlValueKind {
    I32,
    I64,
    F32,
    F64,
    Bool,
    Bytes,
    Str,
    Dynamic,
    Fun,
    Obj,
    Array,
    Enum,
    Abstract,
    Null,
    Void,
}

#[cfg(not(any(test, feature = "test-util")))]
unsafe extern "C" {
    // --- init / teardown ---
    pub fn hl_global_init();
    pub fn hl_global_free();
    pub fn hl_sys_init(args: *const *const c_char, nargs: c_int) -> c_int;

    // --- thread registration ---
    pub fn hl_register_thread(stack_top: *mut c_void);
    pub fn hl_unregister_thread();

    // --- GC roots ---
    pub fn hl_add_root(ptr: *mut VdynamicPtr) -> c_int;
    pub fn hl_remove_root(ptr: *mut VdynamicPtr);

    // --- allocation ---
    pub fn hl_alloc_dynamic(t: HlTypePtr) -> VdynamicPtr;
    pub fn hl_alloc_obj(t: HlTypePtr) -> VdynamicPtr;
    pub fn hl_alloc_enum(t: HlTypePtr, index: c_int) -> VdynamicPtr;
    pub fn hl_alloc_array(elem_kind: HlValueKind, size: c_int) -> *mut c_void;
    pub fn hl_alloc_bytes(size: c_int) -> *mut c_uchar;
    pub fn hl_alloc_closure(f: HlFunctionPtr, receiver: VdynamicPtr) -> HlFunctionPtr;

    // --- field resolution & accessors ---
    pub fn hl_hash_utf8(name: *const c_char) -> u32;
    pub fn hl_type_runtime_layout(t: HlTypePtr) -> *const HlRuntimeLayout;
    pub fn hl_resolve_slot(t: HlTypePtr, hash: u32) -> *const HlSlot;

    pub fn hl_dyn_geti(obj: VdynamicPtr, offset: u32) -> i64;
    pub fn hl_dyn_getf(obj: VdynamicPtr, offset: u32) -> f64;
    pub fn hl_dyn_getp(obj: VdynamicPtr, offset: u32) -> VdynamicPtr;
    pub fn hl_dyn_seti(obj: VdynamicPtr, offset: u32, v: i64);
    pub fn hl_dyn_setf(obj: VdynamicPtr, offset: u32, v: f64);
    pub fn hl_dyn_setp(obj: VdynamicPtr, offset: u32, v: VdynamicPtr);

    // --- calling ---
    pub fn hl_dyn_call_safe(
        f: HlFunctionPtr,
        args: *const VdynamicPtr,
        nargs: c_int,
        is_exc: *mut c_int,
    ) -> VdynamicPtr;
    pub fn hl_dyn_call_direct(
        f: HlFunctionPtr,
        args: *const VdynamicPtr,
        nargs: c_int,
    ) -> VdynamicPtr;

    // --- strings ---
    pub fn hl_to_utf16(s: *const u8, len: c_int, out_len: *mut c_int) -> *mut u16;
    pub fn hl_to_utf8(s: *const u16, len: c_int, out_len: *mut c_int) -> *mut u8;
    pub fn hl_utf16_length(s: *const u16) -> c_int;
    pub fn hl_free_bytes(b: *mut c_void);
    /// Rewrites `v`'s type tag in place from the byte-buffer type to the
    /// string type, without touching the underlying memory: both layouts
    /// are `[length: i32, data: uint16*]`, so this is a pointer-sized
    /// write, not a copy.
    pub fn hl_retype_as_string(v: VdynamicPtr);
    pub fn hl_tostring(v: VdynamicPtr) -> *const u16;
    pub fn hl_type_kind(t: HlTypePtr) -> HlValueKind;

    // --- type table & reflection ---
    pub fn hl_module_type_count(m: HlModulePtr) -> c_int;
    pub fn hl_module_type_at(m: HlModulePtr, index: c_int) -> HlTypePtr;
    pub fn hl_type_name(t: HlTypePtr) -> *const c_char;
    pub fn hl_type_super(t: HlTypePtr) -> HlTypePtr;
    pub fn hl_type_field_count(t: HlTypePtr) -> c_int;
    pub fn hl_type_field_name(t: HlTypePtr, index: c_int) -> *const c_char;
    pub fn hl_type_field_type(t: HlTypePtr, index: c_int) -> HlTypePtr;
    pub fn hl_type_method_count(t: HlTypePtr) -> c_int;
    pub fn hl_type_method_name(t: HlTypePtr, index: c_int) -> *const c_char;
    pub fn hl_type_method_findex(t: HlTypePtr, index: c_int) -> u32;
    pub fn hl_module_function_at(m: HlModulePtr, findex: u32) -> HlFunctionPtr;
    /// The per-class singleton holding static field storage, or null if the
    /// entry point has not yet materialized it.
    pub fn hl_type_global_value(t: HlTypePtr) -> VdynamicPtr;
    pub fn hl_primitive_type(kind: HlValueKind) -> HlTypePtr;
    pub fn hl_type_is_abstract(t: HlTypePtr) -> c_int;

    // --- enums ---
    pub fn hl_enum_construct_count(t: HlTypePtr) -> c_int;
    pub fn hl_enum_construct_name(t: HlTypePtr, index: c_int) -> *const c_char;
    pub fn hl_enum_construct_param_count(t: HlTypePtr, index: c_int) -> c_int;
    pub fn hl_enum_construct_param_offset(t: HlTypePtr, index: c_int, param: c_int) -> u32;
    pub fn hl_enum_get_index(v: VdynamicPtr) -> c_int;

    // --- arrays ---
    pub fn hl_array_size_offset() -> u32;
    pub fn hl_array_elements_offset() -> u32;

    // --- strings ---
    /// Byte offset of the `length: i32` field within the runtime's string
    /// layout.
    pub fn hl_string_length_offset() -> u32;
    /// Byte offset of the `data: uint16*` field. Not `size_of::<i32>()` —
    /// the pointer field is pointer-aligned, so there is padding after the
    /// 4-byte length on 64-bit targets; offsets here are never assumed.
    pub fn hl_string_data_offset() -> u32;

    // --- module / entry point ---
    pub fn hl_code_read(data: *const u8, size: c_int, errmsg: *mut *mut c_char) -> *mut c_void;
    pub fn hl_module_alloc(code: *mut c_void) -> HlModulePtr;
    pub fn hl_module_init(m: HlModulePtr, usehash: c_int) -> c_int;
    pub fn hl_module_entry_point(m: HlModulePtr) -> HlFunctionPtr;
    pub fn hl_module_free(m: HlModulePtr);

    // --- exceptions ---
    pub fn hl_exception_message(exc: VdynamicPtr) -> *const u16;
    pub fn hl_exception_stack() -> *const u16;
}

/// In test builds (unit tests compiled with `--cfg test`, or any build
/// with the `test-util` feature enabled — the latter is what lets the
/// `tests/*.rs` integration binaries, which link against a normal,
/// non-`--cfg test` compilation of this crate, see the fake backend too)
/// there is no real `libhl` to link against, so every symbol above is
/// backed instead by the in-process simulator in [`crate::testutil::fake`]
/// — same names, same signatures, so every other module's `sys::hl_*` call
/// sites are unaffected by which build this is.
#[cfg(any(test, feature = "test-util"))]
pub use crate::testutil::fake::*;

/// Symbols that may be entirely absent from a given HashLink build, probed
/// for once at module-load time rather than linked unconditionally —
/// optional subsystems reached via soft linkage.
///
/// A real embedding would resolve these with `dlsym`/`GetProcAddress`
/// against the loaded `libhl`/module image; this struct is the seam where
/// that happens so the rest of the crate never has to know the difference
/// between "absent" and "present but idle".
#[derive(Default, Clone, Copy)]
pub struct OptionalSymbols {
    pub async_io_run_nowait: Option<unsafe extern "C" fn() -> c_int>,
    pub haxe_event_loop_progress: Option<unsafe extern "C" fn() -> c_int>,
    pub haxe_main_loop_tick: Option<unsafe extern "C" fn() -> c_int>,
    pub hot_reload: Option<unsafe extern "C" fn(new_code: *mut c_void) -> c_int>,
}

// Safety: these are raw function pointers into position-independent code;
// they carry no thread-affine state themselves (the VM they call into does,
// which is why every call site above this layer is required to run on a
// thread registered with `hl_register_thread`).
unsafe impl Send for OptionalSymbols {}
unsafe impl Sync for OptionalSymbols {}
