//! C ABI surface over [`hl_embed`], mirroring `wasmtime-c-api`'s
//! opaque-handle-plus-status-code pattern: every operation is an
//! `extern "C" fn` taking and returning plain pointers and a
//! [`hl_embed_status_t`], with the human-readable diagnostic stashed on the
//! VM handle for `hl_embed_last_error_message` to retrieve.
//!
//! Every entry point below catches panics at the boundary — unwinding
//! across an `extern "C"` frame is undefined behavior, so a caught panic is
//! reported as `hl_embed_status_t::Unknown` rather than aborting the host
//! process.

#![allow(non_camel_case_types)]

use hl_embed::error::Error;
use hl_embed::types::TypeDescriptor;
use hl_embed::{collections, event_loop, invoke, types, value, Handle, VmConfig, VmInstance};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};

/// Opaque VM handle. Owns the underlying [`VmInstance`] plus the last error
/// message reported on this VM, the way `wasmtime_error_t` pairs a status
/// with diagnostic text.
pub struct hl_embed_vm_t {
    instance: VmInstance,
    last_error: RefCell<Option<CString>>,
}

/// Opaque value handle.
pub struct hl_embed_handle_t(Handle);

/// The closed error taxonomy, as a stable C enum mirroring [`Error`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum hl_embed_status_t {
    Ok = 0,
    NullVm,
    AlreadyInitialized,
    NotInitialized,
    InitFailed,
    DestroyFailed,
    FileNotFound,
    InvalidBytecode,
    ModuleLoadFailed,
    ModuleInitFailed,
    EntryPointMissing,
    TypeNotFound,
    MethodNotFound,
    FieldNotFound,
    CallFailed,
    ArgumentArityMismatch,
    InvalidType,
    TypeMismatch,
    NullValue,
    ExceptionThrown,
    ReloadNotSupported,
    ReloadNotEnabled,
    ReloadFailed,
    EventLoopFailed,
    OutOfMemory,
    InvalidArgument,
    NotImplemented,
    Unknown,
}

fn status_of(err: &Error) -> hl_embed_status_t {
    match err.tag() {
        "NullVm" => hl_embed_status_t::NullVm,
        "AlreadyInitialized" => hl_embed_status_t::AlreadyInitialized,
        "NotInitialized" => hl_embed_status_t::NotInitialized,
        "InitFailed" => hl_embed_status_t::InitFailed,
        "DestroyFailed" => hl_embed_status_t::DestroyFailed,
        "FileNotFound" => hl_embed_status_t::FileNotFound,
        "InvalidBytecode" => hl_embed_status_t::InvalidBytecode,
        "ModuleLoadFailed" => hl_embed_status_t::ModuleLoadFailed,
        "ModuleInitFailed" => hl_embed_status_t::ModuleInitFailed,
        "EntryPointMissing" => hl_embed_status_t::EntryPointMissing,
        "TypeNotFound" => hl_embed_status_t::TypeNotFound,
        "MethodNotFound" => hl_embed_status_t::MethodNotFound,
        "FieldNotFound" => hl_embed_status_t::FieldNotFound,
        "CallFailed" => hl_embed_status_t::CallFailed,
        "ArgumentArityMismatch" => hl_embed_status_t::ArgumentArityMismatch,
        "InvalidType" => hl_embed_status_t::InvalidType,
        "TypeMismatch" => hl_embed_status_t::TypeMismatch,
        "NullValue" => hl_embed_status_t::NullValue,
        "ExceptionThrown" => hl_embed_status_t::ExceptionThrown,
        "ReloadNotSupported" => hl_embed_status_t::ReloadNotSupported,
        "ReloadNotEnabled" => hl_embed_status_t::ReloadNotEnabled,
        "ReloadFailed" => hl_embed_status_t::ReloadFailed,
        "EventLoopFailed" => hl_embed_status_t::EventLoopFailed,
        "OutOfMemory" => hl_embed_status_t::OutOfMemory,
        "InvalidArgument" => hl_embed_status_t::InvalidArgument,
        "NotImplemented" => hl_embed_status_t::NotImplemented,
        _ => hl_embed_status_t::Unknown,
    }
}

impl hl_embed_vm_t {
    fn record_error(&self, err: &Error) -> hl_embed_status_t {
        let msg = CString::new(err.to_string()).unwrap_or_default();
        *self.last_error.borrow_mut() = Some(msg);
        status_of(err)
    }

    fn clear_error(&self) {
        *self.last_error.borrow_mut() = None;
    }
}

/// Runs `f`, catching unwinds at the `extern "C"` boundary and mapping them
/// to [`hl_embed_status_t::Unknown`] rather than letting them cross into
/// the host's call stack.
fn guard(vm: &hl_embed_vm_t, f: impl FnOnce() -> hl_embed::error::Result<()>) -> hl_embed_status_t {
    vm.clear_error();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => hl_embed_status_t::Ok,
        Ok(Err(e)) => vm.record_error(&e),
        Err(_) => {
            let msg = CString::new("panic while calling into hl-embed").unwrap();
            *vm.last_error.borrow_mut() = Some(msg);
            hl_embed_status_t::Unknown
        }
    }
}

fn str_from_c(s: *const c_char) -> Option<&'static str> {
    if s.is_null() {
        return None;
    }
    // SAFETY: caller contract is a NUL-terminated string valid for the
    // duration of the call; host-facing strings are 8-bit, never retained
    // past the call that receives them.
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

// --- lifecycle ---

/// `create(argc, argv)`. `argv`/`argc` become the `VmConfig` arguments
/// forwarded to `hl_sys_init` on the later `hl_embed_vm_init` call.
/// Returns null on allocation failure; the VM's own error state does not
/// exist yet at that point, so there is nothing to attach a message to.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_new(
    argv: *const *const c_char,
    argc: i32,
) -> *mut hl_embed_vm_t {
    let args: Vec<String> = if argv.is_null() || argc <= 0 {
        Vec::new()
    } else {
        (0..argc as isize)
            .filter_map(|i| {
                // SAFETY: caller guarantees `argv` points to `argc` valid,
                // NUL-terminated strings for the duration of this call.
                let ptr = unsafe { *argv.offset(i) };
                str_from_c(ptr).map(str::to_string)
            })
            .collect()
    };
    let config = VmConfig::new().args(args);
    match panic::catch_unwind(AssertUnwindSafe(|| VmInstance::create(config))) {
        Ok(Ok(instance)) => Box::into_raw(Box::new(hl_embed_vm_t {
            instance,
            last_error: RefCell::new(None),
        })),
        _ => std::ptr::null_mut(),
    }
}

/// `init()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_init(vm: *mut hl_embed_vm_t) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    // SAFETY: caller-supplied non-null `hl_embed_vm_t`, per this crate's
    // pointer contract.
    let vm = unsafe { &*vm };
    guard(vm, || vm.instance.init())
}

/// `load_file(path)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_load_file(
    vm: *mut hl_embed_vm_t,
    path: *const c_char,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm = unsafe { &*vm };
    let Some(path) = str_from_c(path) else {
        return hl_embed_status_t::InvalidArgument;
    };
    guard(vm, || vm.instance.load_file(path))
}

/// `load_memory(buf, len)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_load_memory(
    vm: *mut hl_embed_vm_t,
    buf: *const u8,
    len: usize,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm = unsafe { &*vm };
    if buf.is_null() {
        return hl_embed_status_t::InvalidArgument;
    }
    // SAFETY: `buf`/`len` describe a valid, initialized byte buffer for the
    // duration of this call (host-owned; not retained past it).
    let bytes = unsafe { std::slice::from_raw_parts(buf, len) };
    guard(vm, || vm.instance.load_memory(bytes))
}

/// `call_entry()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_call_entry(vm: *mut hl_embed_vm_t) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm = unsafe { &*vm };
    guard(vm, || vm.instance.call_entry())
}

/// `destroy()`. Consumes and frees the VM handle; calling any other
/// `hl_embed_vm_*` function on `vm` afterwards is undefined behavior, the
/// usual contract for a C API's `*_delete` functions.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_delete(vm: *mut hl_embed_vm_t) {
    if vm.is_null() {
        return;
    }
    // SAFETY: `vm` was produced by `hl_embed_vm_new` and is uniquely owned
    // by the caller, per this crate's pointer contract.
    let boxed = unsafe { Box::from_raw(vm) };
    let _ = boxed.instance.destroy();
}

/// The most recent error message recorded on `vm`, or null if the last
/// operation succeeded. The returned pointer is owned by `vm` and is only
/// valid until the next `hl_embed_vm_*` call on it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_last_error_message(vm: *const hl_embed_vm_t) -> *const c_char {
    if vm.is_null() {
        return std::ptr::null();
    }
    let vm = unsafe { &*vm };
    match vm.last_error.borrow().as_ref() {
        Some(msg) => msg.as_ptr(),
        None => std::ptr::null(),
    }
}

/// Installs `env_logger` as the process's `log`/`tracing` backend, the way
/// `wasmtime_c_api`'s `logging` feature exposes a one-shot init helper.
/// Safe to call at most once per process; later calls are no-ops.
#[cfg(feature = "logging")]
#[unsafe(no_mangle)]
pub extern "C" fn hl_embed_enable_env_logger() {
    let _ = env_logger::try_init();
}

/// `reload(path)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_reload(vm: *mut hl_embed_vm_t, path: *const c_char) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(path) = str_from_c(path) else {
        return hl_embed_status_t::InvalidArgument;
    };
    guard(vm_ref, || vm_ref.instance.reload(path))
}

/// Enables `reload()`, wiring in the runtime's hot-reload symbol.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_enable_reload(
    vm: *mut hl_embed_vm_t,
    hot_reload: unsafe extern "C" fn(*mut c_void) -> i32,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    unsafe { &*vm }.instance.enable_reload(hot_reload);
    hl_embed_status_t::Ok
}

/// Reload outcome signature: `Ok` or the failure status, plus `userdata`.
pub type hl_embed_reload_callback_fn =
    unsafe extern "C" fn(userdata: *mut c_void, status: hl_embed_status_t, message: *const c_char);

struct CReloadCallback {
    f: hl_embed_reload_callback_fn,
    userdata: usize,
}
unsafe impl Send for CReloadCallback {}
unsafe impl Sync for CReloadCallback {}

/// Registers `f` to be called at the end of every `reload()` that actually
/// reaches the runtime, with the outcome. Replaces any previously
/// registered reload callback on `vm`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_register_reload_callback(
    vm: *mut hl_embed_vm_t,
    f: hl_embed_reload_callback_fn,
    userdata: *mut c_void,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let cb = CReloadCallback {
        f,
        userdata: userdata as usize,
    };
    vm_ref.instance.register_reload_callback(move |result| {
        let (status, msg) = match &result {
            Ok(()) => (hl_embed_status_t::Ok, None),
            Err(e) => (status_of(e), Some(e.to_string())),
        };
        let c_msg = msg.and_then(|m| CString::new(m).ok());
        let ptr = c_msg.as_ref().map(|m| m.as_ptr()).unwrap_or(std::ptr::null());
        // SAFETY: `cb.f` is the caller-supplied trampoline; `ptr` is either
        // null or a valid NUL-terminated string for the duration of this
        // call.
        unsafe { (cb.f)(cb.userdata as *mut c_void, status, ptr) };
    });
    hl_embed_status_t::Ok
}

// --- handles ---

/// Releases a handle's root registration (if any) and frees the wrapper.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_handle_delete(handle: *mut hl_embed_handle_t) {
    if handle.is_null() {
        return;
    }
    // SAFETY: `handle` uniquely owned by the caller, produced by one of
    // this crate's handle-returning functions.
    drop(unsafe { Box::from_raw(handle) });
}

fn box_handle(h: Handle) -> *mut hl_embed_handle_t {
    Box::into_raw(Box::new(hl_embed_handle_t(h)))
}

// --- values ---

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_int_to_vm(vm: *mut hl_embed_vm_t, v: i32) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm = unsafe { &*vm }.instance.shared();
    value::int_to_vm(&vm, v).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_int_from_vm(handle: *const hl_embed_handle_t, fallback: i32) -> i32 {
    if handle.is_null() {
        return fallback;
    }
    let handle = unsafe { &*handle };
    value::int_from_vm(&handle.0, fallback)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_string_to_vm(
    vm: *mut hl_embed_vm_t,
    s: *const c_char,
) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let Some(s) = str_from_c(s) else {
        return std::ptr::null_mut();
    };
    let vm = unsafe { &*vm }.instance.shared();
    value::string_to_vm(&vm, s).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

/// Reads a VM string handle back into a host-owned, NUL-terminated C
/// string. Returns null for a true VM null. The returned pointer is
/// heap-owned by the caller and must be freed with `hl_embed_string_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_string_from_vm(handle: *const hl_embed_handle_t) -> *mut c_char {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    let handle = unsafe { &*handle };
    match value::string_from_vm(&handle.0) {
        Ok(Some(s)) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        _ => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: `s` was produced by `CString::into_raw` in
    // `hl_embed_string_from_vm`.
    drop(unsafe { CString::from_raw(s) });
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_i64_to_vm(vm: *mut hl_embed_vm_t, v: i64) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm = unsafe { &*vm }.instance.shared();
    value::i64_to_vm(&vm, v).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_i64_from_vm(handle: *const hl_embed_handle_t, fallback: i64) -> i64 {
    if handle.is_null() {
        return fallback;
    }
    value::i64_from_vm(&unsafe { &*handle }.0, fallback)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_f32_to_vm(vm: *mut hl_embed_vm_t, v: f32) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm = unsafe { &*vm }.instance.shared();
    value::f32_to_vm(&vm, v).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_f32_from_vm(handle: *const hl_embed_handle_t, fallback: f32) -> f32 {
    if handle.is_null() {
        return fallback;
    }
    value::f32_from_vm(&unsafe { &*handle }.0, fallback)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_f64_to_vm(vm: *mut hl_embed_vm_t, v: f64) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm = unsafe { &*vm }.instance.shared();
    value::f64_to_vm(&vm, v).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_f64_from_vm(handle: *const hl_embed_handle_t, fallback: f64) -> f64 {
    if handle.is_null() {
        return fallback;
    }
    value::f64_from_vm(&unsafe { &*handle }.0, fallback)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_bool_to_vm(vm: *mut hl_embed_vm_t, v: bool) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm = unsafe { &*vm }.instance.shared();
    value::bool_to_vm(&vm, v).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_bool_from_vm(handle: *const hl_embed_handle_t, fallback: bool) -> bool {
    if handle.is_null() {
        return fallback;
    }
    value::bool_from_vm(&unsafe { &*handle }.0, fallback)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_bytes_to_vm(
    vm: *mut hl_embed_vm_t,
    data: *const u8,
    len: usize,
) -> *mut hl_embed_handle_t {
    if vm.is_null() || (data.is_null() && len != 0) {
        return std::ptr::null_mut();
    }
    let vm = unsafe { &*vm }.instance.shared();
    // SAFETY: `data`/`len` describe a valid, initialized byte buffer for the
    // duration of this call; `bytes_to_vm` copies it rather than retaining
    // the pointer.
    let slice: &[u8] = if len == 0 { &[] } else { unsafe { std::slice::from_raw_parts(data, len) } };
    value::bytes_to_vm(&vm, slice).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

// --- invocation ---

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_call_static(
    vm: *mut hl_embed_vm_t,
    class_name: *const c_char,
    method_name: *const c_char,
    argv: *const *const hl_embed_handle_t,
    argc: usize,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let (Some(class_name), Some(method_name)) = (str_from_c(class_name), str_from_c(method_name))
    else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let args = collect_handles(argv, argc);
    guard(vm_ref, || {
        let result = invoke::call_static(&shared, class_name, method_name, &args)?;
        write_optional_handle(out, result);
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_new_instance(
    vm: *mut hl_embed_vm_t,
    class_name: *const c_char,
    argv: *const *const hl_embed_handle_t,
    argc: usize,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(class_name) = str_from_c(class_name) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let args = collect_handles(argv, argc);
    guard(vm_ref, || {
        let result = invoke::new_instance(&shared, class_name, &args)?;
        write_optional_handle(out, Some(result));
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_call_method(
    vm: *mut hl_embed_vm_t,
    obj: *const hl_embed_handle_t,
    method_name: *const c_char,
    argv: *const *const hl_embed_handle_t,
    argc: usize,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || obj.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(method_name) = str_from_c(method_name) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let obj = &unsafe { &*obj }.0;
    let args = collect_handles(argv, argc);
    guard(vm_ref, || {
        let result = invoke::call_method(&shared, obj, method_name, &args)?;
        write_optional_handle(out, result);
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_get_static_field(
    vm: *mut hl_embed_vm_t,
    class_name: *const c_char,
    field_name: *const c_char,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let (Some(class_name), Some(field_name)) = (str_from_c(class_name), str_from_c(field_name)) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    guard(vm_ref, || {
        let result = invoke::get_static_field(&shared, class_name, field_name)?;
        write_optional_handle(out, Some(result));
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_set_static_field(
    vm: *mut hl_embed_vm_t,
    class_name: *const c_char,
    field_name: *const c_char,
    value: *const hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || value.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let (Some(class_name), Some(field_name)) = (str_from_c(class_name), str_from_c(field_name)) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let value = &unsafe { &*value }.0;
    guard(vm_ref, || invoke::set_static_field(&shared, class_name, field_name, value))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_get_field(
    vm: *mut hl_embed_vm_t,
    obj: *const hl_embed_handle_t,
    field_name: *const c_char,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || obj.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(field_name) = str_from_c(field_name) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let obj = &unsafe { &*obj }.0;
    guard(vm_ref, || {
        let result = invoke::get_field(&shared, obj, field_name)?;
        write_optional_handle(out, Some(result));
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_set_field(
    vm: *mut hl_embed_vm_t,
    obj: *const hl_embed_handle_t,
    field_name: *const c_char,
    value: *const hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || obj.is_null() || value.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(field_name) = str_from_c(field_name) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let obj = &unsafe { &*obj }.0;
    let value = &unsafe { &*value }.0;
    guard(vm_ref, || invoke::set_field(&shared, obj, field_name, value))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_is_instance_of(
    vm: *mut hl_embed_vm_t,
    obj: *const hl_embed_handle_t,
    class_name: *const c_char,
    out: *mut bool,
) -> hl_embed_status_t {
    if vm.is_null() || obj.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(class_name) = str_from_c(class_name) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let obj = &unsafe { &*obj }.0;
    guard(vm_ref, || {
        let result = invoke::is_instance_of(&shared, obj, class_name)?;
        if !out.is_null() {
            // SAFETY: `out` is a valid, caller-owned out-param for the
            // duration of this call.
            unsafe { *out = result };
        }
        Ok(())
    })
}

/// Opaque wrapper around [`invoke::CachedCall`].
pub struct hl_embed_cached_call_t(invoke::CachedCall);

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_cache_static(
    vm: *mut hl_embed_vm_t,
    class_name: *const c_char,
    method_name: *const c_char,
) -> *mut hl_embed_cached_call_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let (Some(class_name), Some(method_name)) = (str_from_c(class_name), str_from_c(method_name)) else {
        return std::ptr::null_mut();
    };
    let shared = vm_ref.instance.shared();
    match invoke::cache_static(&shared, class_name, method_name) {
        Ok(cached) => Box::into_raw(Box::new(hl_embed_cached_call_t(cached))),
        Err(e) => {
            vm_ref.record_error(&e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_cache_instance(
    vm: *mut hl_embed_vm_t,
    obj: *const hl_embed_handle_t,
    method_name: *const c_char,
) -> *mut hl_embed_cached_call_t {
    if vm.is_null() || obj.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let Some(method_name) = str_from_c(method_name) else {
        return std::ptr::null_mut();
    };
    let shared = vm_ref.instance.shared();
    let obj = &unsafe { &*obj }.0;
    match invoke::cache_instance(&shared, obj, method_name) {
        Ok(cached) => Box::into_raw(Box::new(hl_embed_cached_call_t(cached))),
        Err(e) => {
            vm_ref.record_error(&e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_call_cached(
    vm: *mut hl_embed_vm_t,
    cached: *const hl_embed_cached_call_t,
    argv: *const *const hl_embed_handle_t,
    argc: usize,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || cached.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let cached = &unsafe { &*cached }.0;
    let args = unsafe { collect_handles(argv, argc) };
    guard(vm_ref, || {
        let result = invoke::call_cached(cached, &args)?;
        write_optional_handle(out, result);
        Ok(())
    })
}

/// Consumes and frees a `hl_embed_cached_call_t`, releasing its function and
/// (if any) receiver roots. Calling any other `hl_embed_*` function on
/// `cached` afterwards is undefined behavior.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_release_cached(cached: *mut hl_embed_cached_call_t) {
    if cached.is_null() {
        return;
    }
    // SAFETY: `cached` was produced by `hl_embed_cache_static`/
    // `hl_embed_cache_instance` and is uniquely owned by the caller.
    let boxed = unsafe { Box::from_raw(cached) };
    invoke::release_cached(boxed.0);
}

unsafe fn collect_handles(argv: *const *const hl_embed_handle_t, argc: usize) -> Vec<Handle> {
    if argv.is_null() || argc == 0 {
        return Vec::new();
    }
    (0..argc)
        .map(|i| {
            // SAFETY: caller guarantees `argv` points to `argc` valid,
            // non-null `hl_embed_handle_t*` entries for the duration of
            // this call; argument arrays are read-only to the engine.
            let ptr = unsafe { *argv.add(i) };
            let h = unsafe { &*ptr };
            Handle::wrap_borrowed(h.0.vm_for_ffi(), h.0.raw_for_ffi())
        })
        .collect()
}

fn write_optional_handle(out: *mut *mut hl_embed_handle_t, result: Option<Handle>) {
    if out.is_null() {
        return;
    }
    // SAFETY: `out` is a valid, caller-owned out-param for the duration of
    // this call.
    unsafe {
        *out = result.map(box_handle).unwrap_or(std::ptr::null_mut());
    }
}

// --- types ---

/// Mirrors `hl_embed::sys::HlValueKind` 1:1 as a stable C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum hl_embed_value_kind_t {
    I32 = 0,
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

fn value_kind_of(kind: hl_embed::sys::HlValueKind) -> hl_embed_value_kind_t {
    use hl_embed::sys::HlValueKind as K;
    match kind {
        K::I32 => hl_embed_value_kind_t::I32,
        K::I64 => hl_embed_value_kind_t::I64,
        K::F32 => hl_embed_value_kind_t::F32,
        K::F64 => hl_embed_value_kind_t::F64,
        K::Bool => hl_embed_value_kind_t::Bool,
        K::Bytes => hl_embed_value_kind_t::Bytes,
        K::Str => hl_embed_value_kind_t::Str,
        K::Dynamic => hl_embed_value_kind_t::Dynamic,
        K::Fun => hl_embed_value_kind_t::Fun,
        K::Obj => hl_embed_value_kind_t::Obj,
        K::Array => hl_embed_value_kind_t::Array,
        K::Enum => hl_embed_value_kind_t::Enum,
        K::Abstract => hl_embed_value_kind_t::Abstract,
        K::Null => hl_embed_value_kind_t::Null,
        K::Void => hl_embed_value_kind_t::Void,
    }
}

/// Opaque wrapper around a resolved [`TypeDescriptor`].
pub struct hl_embed_type_t(TypeDescriptor);

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_kind(ty: *const hl_embed_type_t) -> hl_embed_value_kind_t {
    if ty.is_null() {
        return hl_embed_value_kind_t::Void;
    }
    value_kind_of(unsafe { &*ty }.0.kind())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_find_type(
    vm: *mut hl_embed_vm_t,
    name: *const c_char,
) -> *mut hl_embed_type_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let Some(name) = str_from_c(name) else {
        return std::ptr::null_mut();
    };
    let shared = vm_ref.instance.shared();
    match types::resolve(&shared, name) {
        Ok(ty) => Box::into_raw(Box::new(hl_embed_type_t(ty))),
        Err(e) => {
            vm_ref.record_error(&e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_delete(ty: *mut hl_embed_type_t) {
    if ty.is_null() {
        return;
    }
    // SAFETY: `ty` uniquely owned by the caller, produced by
    // `hl_embed_find_type` or one of the `*_type`/`superclass` accessors
    // below.
    drop(unsafe { Box::from_raw(ty) });
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_is_abstract(ty: *const hl_embed_type_t) -> bool {
    if ty.is_null() {
        return false;
    }
    unsafe { &*ty }.0.is_abstract()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_name(ty: *const hl_embed_type_t) -> *mut c_char {
    if ty.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { &*ty }.0.name() {
        Ok(s) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_field_count(ty: *const hl_embed_type_t) -> i32 {
    if ty.is_null() {
        return 0;
    }
    unsafe { &*ty }.0.field_count()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_field_name(ty: *const hl_embed_type_t, index: i32) -> *mut c_char {
    if ty.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { &*ty }.0.field_name(index) {
        Ok(s) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_field_type(
    ty: *const hl_embed_type_t,
    index: i32,
) -> *mut hl_embed_type_t {
    if ty.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { &*ty }.0.field_type(index) {
        Ok(field_ty) => Box::into_raw(Box::new(hl_embed_type_t(field_ty))),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_field_offset(ty: *const hl_embed_type_t, index: i32) -> u32 {
    if ty.is_null() {
        return 0;
    }
    unsafe { &*ty }.0.field_offset(index).unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_method_count(ty: *const hl_embed_type_t) -> i32 {
    if ty.is_null() {
        return 0;
    }
    unsafe { &*ty }.0.method_count()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_method_name(ty: *const hl_embed_type_t, index: i32) -> *mut c_char {
    if ty.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { &*ty }.0.method_name(index) {
        Ok(s) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_method_findex(ty: *const hl_embed_type_t, index: i32) -> u32 {
    if ty.is_null() {
        return 0;
    }
    unsafe { &*ty }.0.method_findex(index).unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_find_method_findex(
    ty: *const hl_embed_type_t,
    name: *const c_char,
    out: *mut u32,
) -> bool {
    if ty.is_null() || out.is_null() {
        return false;
    }
    let Some(name) = str_from_c(name) else {
        return false;
    };
    match unsafe { &*ty }.0.find_method_findex(name) {
        Ok(findex) => {
            unsafe { *out = findex };
            true
        }
        Err(_) => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_constructor_findex(ty: *const hl_embed_type_t, out: *mut u32) -> bool {
    if ty.is_null() || out.is_null() {
        return false;
    }
    match unsafe { &*ty }.0.constructor_findex() {
        Ok(findex) => {
            unsafe { *out = findex };
            true
        }
        Err(_) => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_type_superclass(ty: *const hl_embed_type_t) -> *mut hl_embed_type_t {
    if ty.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { &*ty }
        .0
        .superclass()
        .map(|s| Box::into_raw(Box::new(hl_embed_type_t(s))))
        .unwrap_or(std::ptr::null_mut())
}

// --- collections ---

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_bytes_new(vm: *mut hl_embed_vm_t, size: usize) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let shared = unsafe { &*vm }.instance.shared();
    collections::bytes_new(&shared, size).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_bytes_length(handle: *const hl_embed_handle_t, known_len: usize) -> usize {
    if handle.is_null() {
        return 0;
    }
    collections::bytes_length(&unsafe { &*handle }.0, known_len)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_bytes_read(
    vm: *mut hl_embed_vm_t,
    handle: *const hl_embed_handle_t,
    offset: usize,
    len: usize,
    out: *mut u8,
) -> hl_embed_status_t {
    if vm.is_null() || handle.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let handle = &unsafe { &*handle }.0;
    guard(vm_ref, || {
        let data = collections::bytes_read(handle, offset, len)?;
        if !out.is_null() {
            // SAFETY: caller guarantees `out` points to at least `len`
            // writable bytes, matching `data.len()`.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len()) };
        }
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_bytes_write(
    vm: *mut hl_embed_vm_t,
    handle: *const hl_embed_handle_t,
    offset: usize,
    data: *const u8,
    len: usize,
) -> hl_embed_status_t {
    if vm.is_null() || handle.is_null() || (data.is_null() && len != 0) {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let handle = &unsafe { &*handle }.0;
    // SAFETY: `data`/`len` describe a valid, initialized byte buffer for the
    // duration of this call.
    let slice: &[u8] = if len == 0 { &[] } else { unsafe { std::slice::from_raw_parts(data, len) } };
    guard(vm_ref, || collections::bytes_write(handle, offset, slice))
}

/// Mirrors `hl_embed::collections::array::ArrayElementKind` 1:1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum hl_embed_array_element_kind_t {
    I32 = 0,
    I64,
    F32,
    F64,
    Object,
}

fn array_element_kind_of(kind: hl_embed_array_element_kind_t) -> collections::array::ArrayElementKind {
    use collections::array::ArrayElementKind as K;
    match kind {
        hl_embed_array_element_kind_t::I32 => K::I32,
        hl_embed_array_element_kind_t::I64 => K::I64,
        hl_embed_array_element_kind_t::F32 => K::F32,
        hl_embed_array_element_kind_t::F64 => K::F64,
        hl_embed_array_element_kind_t::Object => K::Object,
    }
}

/// Opaque wrapper around [`collections::array::VmArray`].
pub struct hl_embed_array_t(collections::array::VmArray);

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_array_new(
    vm: *mut hl_embed_vm_t,
    elem: hl_embed_array_element_kind_t,
    length: usize,
) -> *mut hl_embed_array_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    match collections::array_new(&shared, array_element_kind_of(elem), length) {
        Ok(arr) => Box::into_raw(Box::new(hl_embed_array_t(arr))),
        Err(e) => {
            vm_ref.record_error(&e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_array_delete(arr: *mut hl_embed_array_t) {
    if arr.is_null() {
        return;
    }
    // SAFETY: `arr` uniquely owned by the caller, produced by
    // `hl_embed_array_new`.
    drop(unsafe { Box::from_raw(arr) });
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_array_length(arr: *const hl_embed_array_t) -> i32 {
    if arr.is_null() {
        return 0;
    }
    collections::array_length(&unsafe { &*arr }.0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_array_get(
    vm: *mut hl_embed_vm_t,
    arr: *const hl_embed_array_t,
    index: i32,
) -> *mut hl_embed_handle_t {
    if vm.is_null() || arr.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    box_handle(collections::array_get(&shared, &unsafe { &*arr }.0, index))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_array_set(
    vm: *mut hl_embed_vm_t,
    arr: *const hl_embed_array_t,
    index: i32,
    value: *const hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || arr.is_null() || value.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let value = &unsafe { &*value }.0;
    guard(vm_ref, || collections::array_set(&unsafe { &*arr }.0, index, value))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_array_push(
    vm: *mut hl_embed_vm_t,
    arr: *mut hl_embed_array_t,
    value: *const hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || arr.is_null() || value.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let value = &unsafe { &*value }.0;
    guard(vm_ref, || collections::array_push(&shared, &mut unsafe { &mut *arr }.0, value))
}

/// Mirrors `hl_embed::collections::map::MapKeyKind` 1:1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum hl_embed_map_key_kind_t {
    Str = 0,
    Object,
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_map_new(
    vm: *mut hl_embed_vm_t,
    kind: hl_embed_map_key_kind_t,
) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let kind = match kind {
        hl_embed_map_key_kind_t::Str => collections::map::MapKeyKind::Str,
        hl_embed_map_key_kind_t::Object => collections::map::MapKeyKind::Object,
    };
    match collections::map_new(&shared, kind) {
        Ok(h) => box_handle(h),
        Err(e) => {
            vm_ref.record_error(&e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_map_get(
    vm: *mut hl_embed_vm_t,
    map: *const hl_embed_handle_t,
    key: *const hl_embed_handle_t,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || map.is_null() || key.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let map = &unsafe { &*map }.0;
    let key = &unsafe { &*key }.0;
    guard(vm_ref, || {
        let result = collections::map_get(&shared, map, key)?;
        write_optional_handle(out, Some(result));
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_map_set(
    vm: *mut hl_embed_vm_t,
    map: *const hl_embed_handle_t,
    key: *const hl_embed_handle_t,
    value: *const hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || map.is_null() || key.is_null() || value.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let map = &unsafe { &*map }.0;
    let key = &unsafe { &*key }.0;
    let value = &unsafe { &*value }.0;
    guard(vm_ref, || collections::map_set(&shared, map, key, value))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_map_has(
    vm: *mut hl_embed_vm_t,
    map: *const hl_embed_handle_t,
    key: *const hl_embed_handle_t,
    out: *mut bool,
) -> hl_embed_status_t {
    if vm.is_null() || map.is_null() || key.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let map = &unsafe { &*map }.0;
    let key = &unsafe { &*key }.0;
    guard(vm_ref, || {
        let result = collections::map_has(&shared, map, key)?;
        if !out.is_null() {
            unsafe { *out = result };
        }
        Ok(())
    })
}

/// Materializes `map`'s keys into a fresh, host-owned array of handle
/// pointers; `*out_count` receives its length. Free the array itself with
/// `hl_embed_handle_array_free` (each contained handle with
/// `hl_embed_handle_delete`, or let `hl_embed_handle_array_free` do both in
/// one call).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_map_keys(
    vm: *mut hl_embed_vm_t,
    map: *const hl_embed_handle_t,
    out_count: *mut usize,
) -> *mut *mut hl_embed_handle_t {
    if vm.is_null() || map.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let map = &unsafe { &*map }.0;
    vm_ref.clear_error();
    match collections::map_keys(&shared, map) {
        Ok(keys) => {
            if !out_count.is_null() {
                unsafe { *out_count = keys.len() };
            }
            let mut boxed: Vec<*mut hl_embed_handle_t> = keys.into_iter().map(box_handle).collect();
            boxed.shrink_to_fit();
            let ptr = boxed.as_mut_ptr();
            std::mem::forget(boxed);
            ptr
        }
        Err(e) => {
            vm_ref.record_error(&e);
            if !out_count.is_null() {
                unsafe { *out_count = 0 };
            }
            std::ptr::null_mut()
        }
    }
}

/// Frees an array returned by `hl_embed_map_keys`, along with every handle
/// it contains.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_handle_array_free(handles: *mut *mut hl_embed_handle_t, count: usize) {
    if handles.is_null() {
        return;
    }
    // SAFETY: `handles`/`count` describe a `Vec<*mut hl_embed_handle_t>`
    // previously leaked by `hl_embed_map_keys`.
    let boxed = unsafe { Vec::from_raw_parts(handles, count, count) };
    for h in boxed {
        unsafe { hl_embed_handle_delete(h) };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_construct_count(ty: *const hl_embed_type_t) -> i32 {
    if ty.is_null() {
        return 0;
    }
    collections::enum_construct_count(&unsafe { &*ty }.0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_construct_name(ty: *const hl_embed_type_t, index: i32) -> *mut c_char {
    if ty.is_null() {
        return std::ptr::null_mut();
    }
    match collections::enum_construct_name(&unsafe { &*ty }.0, index) {
        Ok(s) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_get_index(value: *const hl_embed_handle_t, out: *mut i32) -> bool {
    if value.is_null() || out.is_null() {
        return false;
    }
    match collections::enum_get_index(&unsafe { &*value }.0) {
        Ok(index) => {
            unsafe { *out = index };
            true
        }
        Err(_) => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_get_name(
    ty: *const hl_embed_type_t,
    value: *const hl_embed_handle_t,
) -> *mut c_char {
    if ty.is_null() || value.is_null() {
        return std::ptr::null_mut();
    }
    match collections::enum_get_name(&unsafe { &*ty }.0, &unsafe { &*value }.0) {
        Ok(s) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_get_param_count(
    ty: *const hl_embed_type_t,
    value: *const hl_embed_handle_t,
    out: *mut i32,
) -> bool {
    if ty.is_null() || value.is_null() || out.is_null() {
        return false;
    }
    match collections::enum_get_param_count(&unsafe { &*ty }.0, &unsafe { &*value }.0) {
        Ok(count) => {
            unsafe { *out = count };
            true
        }
        Err(_) => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_get_param(
    vm: *mut hl_embed_vm_t,
    ty: *const hl_embed_type_t,
    value: *const hl_embed_handle_t,
    param: i32,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || ty.is_null() || value.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let ty = &unsafe { &*ty }.0;
    let value = &unsafe { &*value }.0;
    guard(vm_ref, || {
        let result = collections::enum_get_param(&shared, ty, value, param)?;
        write_optional_handle(out, Some(result));
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_alloc(
    vm: *mut hl_embed_vm_t,
    ty: *const hl_embed_type_t,
    index: i32,
    argv: *const *const hl_embed_handle_t,
    argc: usize,
    out: *mut *mut hl_embed_handle_t,
) -> hl_embed_status_t {
    if vm.is_null() || ty.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    let ty = &unsafe { &*ty }.0;
    let params = unsafe { collect_handles(argv, argc) };
    guard(vm_ref, || {
        let result = collections::enum_alloc(&shared, ty, index, &params)?;
        write_optional_handle(out, Some(result));
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_is(value: *const hl_embed_handle_t, index: i32, out: *mut bool) -> bool {
    if value.is_null() || out.is_null() {
        return false;
    }
    match collections::enum_is(&unsafe { &*value }.0, index) {
        Ok(result) => {
            unsafe { *out = result };
            true
        }
        Err(_) => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_enum_is_named(
    ty: *const hl_embed_type_t,
    value: *const hl_embed_handle_t,
    name: *const c_char,
    out: *mut bool,
) -> bool {
    if ty.is_null() || value.is_null() || out.is_null() {
        return false;
    }
    let Some(name) = str_from_c(name) else {
        return false;
    };
    match collections::enum_is_named(&unsafe { &*ty }.0, &unsafe { &*value }.0, name) {
        Ok(result) => {
            unsafe { *out = result };
            true
        }
        Err(_) => false,
    }
}

// --- callbacks ---

/// Host callback signature exposed across the C boundary: `userdata`, the
/// argument handles, and the argument count in; a result handle (or null)
/// out.
pub type hl_embed_callback_fn = unsafe extern "C" fn(
    userdata: *mut std::ffi::c_void,
    argv: *const *const hl_embed_handle_t,
    argc: usize,
) -> *mut hl_embed_handle_t;

/// Wraps a raw C function pointer plus its `userdata` so it can be sent
/// across threads the way `hl_embed::HostFn` requires. Sound because the
/// host contract for `hl_embed_callback_fn` is that `userdata` is safe to
/// invoke from whichever thread the VM calls back on, the same assumption
/// any C callback API makes.
struct CCallback {
    f: hl_embed_callback_fn,
    userdata: usize,
}
unsafe impl Send for CCallback {}
unsafe impl Sync for CCallback {}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_register_callback(
    vm: *mut hl_embed_vm_t,
    name: *const c_char,
    arity: usize,
    f: hl_embed_callback_fn,
    userdata: *mut std::ffi::c_void,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(name) = str_from_c(name) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    let cb = CCallback {
        f,
        userdata: userdata as usize,
    };
    let host_fn: hl_embed::HostFn = Box::new(move |_vm, args| {
        let handles: Vec<*const hl_embed_handle_t> = args
            .iter()
            .map(|h| Box::into_raw(Box::new(hl_embed_handle_t(Handle::wrap_borrowed(h.vm_for_ffi(), h.raw_for_ffi())))) as *const _)
            .collect();
        // SAFETY: `cb.f` is the caller-supplied trampoline; `handles`
        // describes a valid, `args.len()`-long array for the duration of
        // this call.
        let result = unsafe { (cb.f)(cb.userdata as *mut std::ffi::c_void, handles.as_ptr(), handles.len()) };
        for h in handles {
            unsafe { drop(Box::from_raw(h as *mut hl_embed_handle_t)) };
        }
        if result.is_null() {
            Ok(None)
        } else {
            // SAFETY: `result`, if non-null, was produced by one of this
            // crate's handle-returning functions, per the callback
            // contract.
            let boxed = unsafe { Box::from_raw(result) };
            Ok(Some(boxed.0))
        }
    });
    guard(vm_ref, || register_callback_inner(&shared, name, arity, host_fn))
}

fn register_callback_inner(
    vm: &hl_embed::VmShared,
    name: &str,
    arity: usize,
    host_fn: hl_embed::HostFn,
) -> hl_embed::error::Result<()> {
    hl_embed::callback::register_callback(vm, name, arity, host_fn)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_get_callback(
    vm: *mut hl_embed_vm_t,
    name: *const c_char,
) -> *mut hl_embed_handle_t {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    let vm_ref = unsafe { &*vm };
    let Some(name) = str_from_c(name) else {
        return std::ptr::null_mut();
    };
    let shared = vm_ref.instance.shared();
    hl_embed::callback::get_callback(&shared, name).ok().map(box_handle).unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_unregister_callback(
    vm: *mut hl_embed_vm_t,
    name: *const c_char,
) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let Some(name) = str_from_c(name) else {
        return hl_embed_status_t::InvalidArgument;
    };
    let shared = vm_ref.instance.shared();
    guard(vm_ref, || hl_embed::callback::unregister_callback(&shared, name))
}

// --- exceptions ---

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_has_exception(vm: *const hl_embed_vm_t) -> bool {
    if vm.is_null() {
        return false;
    }
    unsafe { &*vm }.instance.has_exception()
}

/// Caller-owned, NUL-terminated; free with `hl_embed_string_free`. Null if
/// no exception is pending.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_exception_message(vm: *const hl_embed_vm_t) -> *mut c_char {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { &*vm }.instance.exception_message() {
        Some(s) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        None => std::ptr::null_mut(),
    }
}

/// See [`hl_embed_vm_exception_message`]. Null if no trace is available.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_exception_trace(vm: *const hl_embed_vm_t) -> *mut c_char {
    if vm.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { &*vm }.instance.exception_trace() {
        Some(s) => CString::new(s).map(CString::into_raw).unwrap_or(std::ptr::null_mut()),
        None => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_clear_exception(vm: *mut hl_embed_vm_t) {
    if vm.is_null() {
        return;
    }
    unsafe { &*vm }.instance.clear_exception();
}

// --- event loop ---

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_update(vm: *mut hl_embed_vm_t, delta_time_ms: f64) -> hl_embed_status_t {
    if vm.is_null() {
        return hl_embed_status_t::NullVm;
    }
    let vm_ref = unsafe { &*vm };
    let shared = vm_ref.instance.shared();
    guard(vm_ref, || event_loop::update(&shared, delta_time_ms))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hl_embed_vm_has_pending_events(vm: *const hl_embed_vm_t, kind: u8) -> bool {
    if vm.is_null() {
        return false;
    }
    let shared = unsafe { &*vm }.instance.shared();
    let kind = event_loop::EventKind::from_bits_truncate(kind);
    event_loop::has_pending(&shared, kind)
}

#[cfg(not(feature = "logging"))]
#[unsafe(no_mangle)]
pub extern "C" fn hl_embed_enable_env_logger() {
    // Built without the `logging` feature: a no-op so host build scripts
    // that unconditionally call this do not need a cfg of their own.
}
