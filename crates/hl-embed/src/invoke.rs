//! Invocation engine: static methods, static fields, instance members,
//! and the cached call fast path.

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::sys::{self, HlFunctionPtr, HlValueKind};
use crate::types::{self, TypeDescriptor};
use crate::vm::VmShared;
use smallvec::SmallVec;
use tracing::instrument;

/// Most calls pass a handful of arguments; `SmallVec` keeps the common case
/// off the heap without giving up on arbitrary arity.
type ArgBuf = SmallVec<[sys::VdynamicPtr; 4]>;

/// Resolves `class_name`'s `method_name` and invokes it with `argv`.
#[instrument(skip(vm, argv))]
pub fn call_static(
    vm: &VmShared,
    class_name: &str,
    method_name: &str,
    argv: &[Handle],
) -> Result<Option<Handle>> {
    let ty = types::resolve(vm, class_name)?;
    let findex = ty.find_method_findex(method_name)?;
    let func = function_at(vm, findex)?;
    call_safe(vm, func, argv)
}

/// Reads a static field's current value. The entry point must have run
/// first; static-global slots are only materialized then.
pub fn get_static_field(vm: &VmShared, class_name: &str, field_name: &str) -> Result<Handle> {
    require_entry_ran(vm)?;
    let ty = types::resolve(vm, class_name)?;
    let global = static_global_of(&ty)?;
    let (offset, kind) = field_slot(&ty, field_name)?;
    Ok(read_field(vm, global, offset, kind))
}

/// Writes a static field's value.
pub fn set_static_field(
    vm: &VmShared,
    class_name: &str,
    field_name: &str,
    value: &Handle,
) -> Result<()> {
    require_entry_ran(vm)?;
    let ty = types::resolve(vm, class_name)?;
    let global = static_global_of(&ty)?;
    let (offset, kind) = field_slot(&ty, field_name)?;
    write_field(global, offset, kind, value);
    Ok(())
}

fn require_entry_ran(vm: &VmShared) -> Result<()> {
    if !vm.entry_has_run() {
        return Err(Error::NotInitialized);
    }
    Ok(())
}

/// The per-class global instance holding static fields. In HashLink these
/// are materialized as a singleton object of the class's runtime-layout
/// type once the entry point has run; we read it back through the same
/// dynamic-get machinery as any other object field, keyed by a well-known
/// "globals" slot the loader reserves.
fn static_global_of(ty: &TypeDescriptor) -> Result<sys::VdynamicPtr> {
    // SAFETY: `ty.layout` is a runtime-layout descriptor for a loaded,
    // entry-point-invoked module; `require_entry_ran` has already checked
    // the latter for the caller.
    let global = unsafe { sys::hl_type_global_value(ty.layout) };
    if global.is_null() {
        return Err(Error::NotInitialized);
    }
    Ok(global)
}

fn field_slot(ty: &TypeDescriptor, field_name: &str) -> Result<(u32, HlValueKind)> {
    let n = ty.field_count();
    for i in 0..n {
        if ty.field_name(i)? == field_name {
            let offset = ty.field_offset(i)?;
            let field_ty = ty.field_type(i)?;
            return Ok((offset, field_ty.kind()));
        }
    }
    Err(Error::FieldNotFound {
        class: ty.name().unwrap_or_default(),
        field: field_name.to_string(),
    })
}

fn read_field(vm: &VmShared, obj: sys::VdynamicPtr, offset: u32, kind: HlValueKind) -> Handle {
    match kind {
        HlValueKind::I32 | HlValueKind::I64 | HlValueKind::Bool => {
            // SAFETY: `offset` was resolved from the type's own runtime
            // layout table, so it is a valid offset into `obj`'s physical
            // layout; integer-kind fields use the integer accessor.
            let v = unsafe { sys::hl_dyn_geti(obj, offset) };
            let raw = crate::value::int_to_vm(vm, v as i32).ok();
            raw.unwrap_or_else(|| Handle::null(vm))
        }
        HlValueKind::F32 | HlValueKind::F64 => {
            let v = unsafe { sys::hl_dyn_getf(obj, offset) };
            crate::value::f64_to_vm(vm, v).unwrap_or_else(|_| Handle::null(vm))
        }
        _ => {
            // SAFETY: pointer-kind field; `offset` as above.
            let p = unsafe { sys::hl_dyn_getp(obj, offset) };
            Handle::wrap_borrowed(vm, p)
        }
    }
}

fn write_field(obj: sys::VdynamicPtr, offset: u32, kind: HlValueKind, value: &Handle) {
    match kind {
        HlValueKind::I32 | HlValueKind::I64 | HlValueKind::Bool => {
            let v = crate::value::i64_from_vm(value, 0);
            // SAFETY: `offset` resolved from the type's runtime layout.
            unsafe { sys::hl_dyn_seti(obj, offset, v) };
        }
        HlValueKind::F32 | HlValueKind::F64 => {
            let v = crate::value::f64_from_vm(value, 0.0);
            unsafe { sys::hl_dyn_setf(obj, offset, v) };
        }
        _ => {
            // SAFETY: pointer-kind field; mixing kinds here would yield
            // garbage, which is exactly why `kind` is threaded through from
            // `field_slot` rather than guessed.
            unsafe { sys::hl_dyn_setp(obj, offset, value.raw()) };
        }
    }
}

/// Allocates an instance of `class_name` and runs its constructor with
/// `argv`.
///
/// Zero-argument constructors go through the direct function entry rather
/// than the dynamic safe-call primitive, to avoid signature-mismatch
/// rejection inside the VM.
#[instrument(skip(vm, argv))]
pub fn new_instance(vm: &VmShared, class_name: &str, argv: &[Handle]) -> Result<Handle> {
    let ty = types::resolve(vm, class_name)?;
    // SAFETY: `ty.layout` is the runtime-layout descriptor, which is what
    // the allocator needs to size the object correctly.
    let raw = unsafe { sys::hl_alloc_obj(ty.layout) };
    if raw.is_null() {
        return Err(Error::OutOfMemory);
    }
    let handle = Handle::wrap_rooted(vm, raw)?;

    let ctor_findex = ty.constructor_findex()?;
    let ctor = function_at(vm, ctor_findex)?;

    let args: ArgBuf = argv.iter().map(Handle::raw).collect();
    if argv.is_empty() {
        // SAFETY: `ctor` resolved above; zero-argument direct call avoids
        // the dynamic safe-call primitive's signature check. The receiver
        // is passed as the sole argument using the direct-call ABI's
        // implicit-self convention.
        let recv = [raw];
        unsafe { sys::hl_dyn_call_direct(ctor, recv.as_ptr(), 1) };
    } else {
        let mut full: ArgBuf = SmallVec::with_capacity(args.len() + 1);
        full.push(raw);
        full.extend_from_slice(&args);
        let mut is_exc = 0;
        // SAFETY: `ctor`/`full` as above; `is_exc` is a valid out-param.
        let _ = unsafe { sys::hl_dyn_call_safe(ctor, full.as_ptr(), full.len() as i32, &mut is_exc) };
        if is_exc != 0 {
            let msg = vm.exception().borrow_mut().capture_current();
            return Err(Error::ExceptionThrown(msg));
        }
    }
    Ok(handle)
}

/// Reads an instance field's current value.
pub fn get_field(vm: &VmShared, obj: &Handle, field_name: &str) -> Result<Handle> {
    let ty = object_type_of(vm, obj)?;
    let (offset, kind) = field_slot(&ty, field_name)?;
    Ok(read_field(vm, obj.raw(), offset, kind))
}

/// Writes an instance field's value.
pub fn set_field(vm: &VmShared, obj: &Handle, field_name: &str, value: &Handle) -> Result<()> {
    let ty = object_type_of(vm, obj)?;
    let (offset, kind) = field_slot(&ty, field_name)?;
    write_field(obj.raw(), offset, kind, value);
    Ok(())
}

/// Resolves `obj`'s `method_name` and invokes it on `obj` with `argv`.
#[instrument(skip(vm, obj, argv))]
pub fn call_method(
    vm: &VmShared,
    obj: &Handle,
    method_name: &str,
    argv: &[Handle],
) -> Result<Option<Handle>> {
    let ty = object_type_of(vm, obj)?;
    let findex = ty.find_method_findex(method_name)?;
    let func = function_at(vm, findex)?;

    let mut full: ArgBuf = SmallVec::with_capacity(argv.len() + 1);
    full.push(obj.raw());
    full.extend(argv.iter().map(Handle::raw));
    call_safe_raw(vm, func, &full)
}

/// Checks whether `obj` is an instance of `class_name`, walking the
/// superclass chain.
pub fn is_instance_of(vm: &VmShared, obj: &Handle, class_name: &str) -> Result<bool> {
    if obj.is_null() {
        return Ok(false);
    }
    let target = types::resolve(vm, class_name)?;
    let mut cur = Some(object_type_of(vm, obj)?);
    while let Some(ty) = cur {
        if ty.name()? == target.name()? {
            return Ok(true);
        }
        cur = ty.superclass();
    }
    Ok(false)
}

fn object_type_of(vm: &VmShared, obj: &Handle) -> Result<TypeDescriptor> {
    if obj.is_null() {
        return Err(Error::NullValue);
    }
    // SAFETY: non-null handle; every heap object's first pointer-sized word
    // is its runtime-layout type pointer in HashLink's object layout.
    let layout = unsafe { sys::hl_dyn_getp(obj.raw(), 0) } as sys::HlTypePtr;
    if layout.is_null() {
        return Err(Error::InvalidType("object has no type pointer".into()));
    }
    let _ = vm; // reserved for a future reflect-name reverse lookup
    Ok(TypeDescriptor {
        reflect: layout,
        layout,
    })
}

fn function_at(vm: &VmShared, findex: u32) -> Result<HlFunctionPtr> {
    let module = vm.module();
    if module.is_null() {
        return Err(Error::NotInitialized);
    }
    // SAFETY: `module` was initialized successfully; `findex` came from a
    // resolved method/constructor slot in this same module.
    let f = unsafe { sys::hl_module_function_at(module, findex) };
    if f.is_null() {
        return Err(Error::CallFailed(format!(
            "function table index {findex} not found"
        )));
    }
    Ok(f)
}

fn call_safe(vm: &VmShared, func: HlFunctionPtr, argv: &[Handle]) -> Result<Option<Handle>> {
    let raws: ArgBuf = argv.iter().map(Handle::raw).collect();
    call_safe_raw(vm, func, &raws)
}

fn call_safe_raw(
    vm: &VmShared,
    func: HlFunctionPtr,
    raws: &[sys::VdynamicPtr],
) -> Result<Option<Handle>> {
    let mut is_exc: i32 = 0;
    // SAFETY: `func` resolved through this module's function table;
    // `raws` is a read-only argument array the engine does not retain past
    // the call.
    let result = unsafe { sys::hl_dyn_call_safe(func, raws.as_ptr(), raws.len() as i32, &mut is_exc) };
    if is_exc != 0 {
        let msg = vm.exception().borrow_mut().capture_current();
        return Err(Error::ExceptionThrown(msg));
    }
    if result.is_null() {
        Ok(None)
    } else {
        Ok(Some(Handle::wrap_borrowed(vm, result)))
    }
}

/// A resolved function (plus optional bound receiver) with a rooted
/// lifetime, reusable with minimal per-call overhead.
pub struct CachedCall {
    vm: VmShared,
    func: HlFunctionPtr,
    func_handle: Handle,
    receiver: Option<Handle>,
}

/// Resolves `class_name`'s `method_name` once and returns a reusable
/// [`CachedCall`].
pub fn cache_static(vm: &VmShared, class_name: &str, method_name: &str) -> Result<CachedCall> {
    let ty = types::resolve(vm, class_name)?;
    let findex = ty.find_method_findex(method_name)?;
    let func = function_at(vm, findex)?;
    let func_handle = Handle::wrap_rooted(vm, func as sys::VdynamicPtr)?;
    Ok(CachedCall {
        vm: vm.clone(),
        func,
        func_handle,
        receiver: None,
    })
}

/// The bound-receiver sibling of `cache_static`, needed so instance calls
/// can use the cached fast path too. The returned [`CachedCall`] carries a
/// rooted receiver handle for bound calls.
pub fn cache_instance(vm: &VmShared, obj: &Handle, method_name: &str) -> Result<CachedCall> {
    let ty = object_type_of(vm, obj)?;
    let findex = ty.find_method_findex(method_name)?;
    let func = function_at(vm, findex)?;
    let func_handle = Handle::wrap_rooted(vm, func as sys::VdynamicPtr)?;
    let receiver = Handle::wrap_rooted(vm, obj.raw())?;
    Ok(CachedCall {
        vm: vm.clone(),
        func,
        func_handle,
        receiver: Some(receiver),
    })
}

/// Invokes a [`CachedCall`] with `argv`, skipping all name hashing.
#[instrument(skip(cached, argv))]
pub fn call_cached(cached: &CachedCall, argv: &[Handle]) -> Result<Option<Handle>> {
    let _ = &cached.func_handle; // keeps the root alive for the call's duration
    match &cached.receiver {
        Some(recv) => {
            let mut full: ArgBuf = SmallVec::with_capacity(argv.len() + 1);
            full.push(recv.raw());
            full.extend(argv.iter().map(Handle::raw));
            call_safe_raw(&cached.vm, cached.func, &full)
        }
        None => call_safe(&cached.vm, cached.func, argv),
    }
}

/// Releasing a `CachedCall` releases both its function root and its
/// receiver's. `Drop` on the contained `Handle`s already does this; this
/// function exists so callers get an explicit, documented release point
/// instead of relying on implicit scope-exit.
pub fn release_cached(cached: CachedCall) {
    drop(cached);
}
