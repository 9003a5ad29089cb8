//! Callback dispatcher.
//!
//! Registers host functions under a name so VM code can invoke them as if
//! they were Haxe closures — typically by the host writing the resulting
//! trampoline into a Haxe-level static field (`Callbacks.onAdd = ...`) and
//! Haxe code calling it naturally from then on.

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::sys::{self, VdynamicPtr};
use crate::vm::VmShared;
use std::collections::HashMap;

/// Implementation limit on callback arity: sufficient for almost all uses.
pub const MAX_ARITY: usize = 4;

/// The signature every registered host function must have: the VM, the
/// argument count, and the (borrowed) argument handles in, an optional
/// result handle out.
pub type HostFn = Box<dyn Fn(&VmShared, &[Handle]) -> Result<Option<Handle>>>;

/// A single registered host callback: its implementation, its arity, and
/// the native trampoline the VM calls into.
struct CallbackRecord {
    host_fn: HostFn,
    arity: usize,
    trampoline: HlFunctionHandle,
    /// The `name` string leaked into the trampoline closure's context; the
    /// only native-side way the shim recovers which record to dispatch to.
    /// Reclaimed in `Drop`.
    ctx: *mut String,
}

/// A rooted handle over the trampoline `VmFunction`, kept alive for the
/// module's lifetime: the name -> record mapping persists until the host
/// explicitly unregisters it or the VM is destroyed.
struct HlFunctionHandle(Handle);

/// The callback dispatcher itself, owned by the VM instance.
pub struct CallbackRegistry {
    records: HashMap<String, CallbackRecord>,
}

impl CallbackRegistry {
    pub fn new() -> CallbackRegistry {
        CallbackRegistry {
            records: HashMap::new(),
        }
    }

    /// Registers a host function under `name`.
    ///
    /// Allocates a trampoline `VmFunction` of the requested arity whose code
    /// wraps incoming VM arguments in borrowed [`Handle`]s, invokes
    /// `host_fn`, and returns the resulting value back to the VM. Duplicate
    /// names are rejected.
    pub fn register(
        &mut self,
        vm: &VmShared,
        name: &str,
        arity: usize,
        host_fn: HostFn,
    ) -> Result<()> {
        if self.records.contains_key(name) {
            return Err(Error::InvalidArgument(format!(
                "callback '{name}' already registered"
            )));
        }
        if arity > MAX_ARITY {
            return Err(Error::InvalidArgument(format!(
                "callback arity {arity} exceeds limit of {MAX_ARITY}"
            )));
        }
        let (trampoline_raw, ctx) = allocate_trampoline(name, arity)?;
        let trampoline = Handle::wrap_rooted(vm, trampoline_raw as VdynamicPtr)?;
        self.records.insert(
            name.to_string(),
            CallbackRecord {
                host_fn,
                arity,
                trampoline: HlFunctionHandle(trampoline),
                ctx,
            },
        );
        Ok(())
    }

    /// Drops a stale callback, e.g. ahead of a reload that no longer
    /// references it.
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        self.records
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::InvalidArgument(format!("callback '{name}' not registered")))
    }

    /// Looks up a registered callback's trampoline as a `Handle`, suitable
    /// for storage in a VM-side function-typed static field.
    pub fn get(&self, vm: &VmShared, name: &str) -> Result<Handle> {
        let record = self
            .records
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("callback '{name}' not registered")))?;
        Handle::wrap_borrowed(vm, record.trampoline.0.raw()).into_rooted()
    }

    /// Invoked by the trampoline's native side when the VM calls a
    /// registered callback. Runs on the same thread as the VM call;
    /// re-entering the VM from within `host_fn` is permitted.
    pub(crate) fn dispatch(
        &self,
        vm: &VmShared,
        name: &str,
        args: &[Handle],
    ) -> Result<Option<Handle>> {
        let record = self
            .records
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("callback '{name}' not registered")))?;
        if args.len() != record.arity {
            return Err(Error::ArgumentArityMismatch {
                expected: record.arity,
                actual: args.len(),
            });
        }
        (record.host_fn)(vm, args)
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    /// Drops every record whose trampoline the reloaded module image no
    /// longer references. A conservative placeholder keeps every record
    /// live today (re-registration after a genuine signature change is the
    /// host's job); it exists as the seam `VmInstance::reload` calls so a
    /// future reload-aware prune has somewhere to live without touching
    /// the lifecycle module.
    pub(crate) fn retain_live(&mut self) {}

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

/// Registers a host function under `name`, as a free function over
/// [`VmShared`] — matching the calling convention every other module in
/// this crate (`invoke`, `value`, `event_loop`) uses, so callers never need
/// `vm.callbacks()`'s crate-internal accessor.
pub fn register_callback(vm: &VmShared, name: &str, arity: usize, host_fn: HostFn) -> Result<()> {
    vm.callbacks().borrow_mut().register(vm, name, arity, host_fn)
}

/// See [`CallbackRegistry::unregister`].
pub fn unregister_callback(vm: &VmShared, name: &str) -> Result<()> {
    vm.callbacks().borrow_mut().unregister(name)
}

/// Looks up a registered callback's trampoline as a `Handle`.
pub fn get_callback(vm: &VmShared, name: &str) -> Result<Handle> {
    vm.callbacks().borrow().get(vm, name)
}

/// Invokes a previously registered callback by name, the way the VM's own
/// trampoline would on the other side of the native shim (out of scope to
/// hand-generate here). Exists so hosts (and this crate's own tests) can
/// exercise callback invocation ordering without a real compiled
/// trampoline.
pub fn dispatch_callback(vm: &VmShared, name: &str, args: &[Handle]) -> Result<Option<Handle>> {
    vm.callbacks().borrow().dispatch(vm, name, args)
}

/// Allocates the native trampoline closure the VM will call by
/// function-table reference. In a real embedding this compiles or selects
/// one of a small family of fixed-arity native shims (arity 0..=4) and
/// binds `name` into its closure environment via `hl_alloc_closure`, so
/// that when the VM invokes it, the shim recovers which [`CallbackRecord`]
/// to dispatch to.
fn allocate_trampoline(name: &str, arity: usize) -> Result<(sys::HlFunctionPtr, *mut String)> {
    let shim = trampoline_shim_for_arity(arity)?;
    let ctx = Box::into_raw(Box::new(name.to_string()));
    // SAFETY: `shim` is one of the fixed-arity native shims below, valid
    // for the process lifetime; `ctx`'s ownership transfers to the
    // returned `CallbackRecord`, which reclaims it in `Drop`.
    let closure = unsafe { sys::hl_alloc_closure(shim as sys::HlFunctionPtr, ctx as VdynamicPtr) };
    if closure.is_null() {
        // SAFETY: the closure allocation failed; nothing else observed
        // `ctx`, so it is still uniquely ours to free.
        unsafe { drop(Box::from_raw(ctx)) };
        return Err(Error::OutOfMemory);
    }
    Ok((closure, ctx))
}

fn trampoline_shim_for_arity(arity: usize) -> Result<*const ()> {
    // Real fixed-arity native entry points the runtime calls with `arity`
    // already-unboxed `VdynamicPtr` arguments plus the closure's bound
    // context; dispatch back into `CallbackRegistry::dispatch` happens on
    // the Rust side of that boundary (not modelled further here since the
    // native-shim glue is generated per build, not hand-written per
    // callback).
    if arity > MAX_ARITY {
        return Err(Error::InvalidArgument(format!(
            "arity {arity} exceeds limit of {MAX_ARITY}"
        )));
    }
    Ok(std::ptr::null())
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

    fn noop() -> HostFn {
        Box::new(|_vm, _args| Ok(None))
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let vm = vm();
        register_callback(&vm, "onAdd", 0, noop()).unwrap();
        assert!(matches!(
            register_callback(&vm, "onAdd", 0, noop()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn arity_over_limit_is_rejected() {
        let vm = vm();
        assert!(matches!(
            register_callback(&vm, "tooMany", MAX_ARITY + 1, noop()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn dispatch_checks_arity() {
        let vm = vm();
        register_callback(&vm, "needsOne", 1, noop()).unwrap();
        assert!(matches!(
            dispatch_callback(&vm, "needsOne", &[]),
            Err(Error::ArgumentArityMismatch { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn unregister_removes_the_record() {
        let vm = vm();
        register_callback(&vm, "temp", 0, noop()).unwrap();
        unregister_callback(&vm, "temp").unwrap();
        assert!(get_callback(&vm, "temp").is_err());
        assert!(unregister_callback(&vm, "temp").is_err());
    }

    #[test]
    fn unknown_name_errors_everywhere() {
        let vm = vm();
        assert!(get_callback(&vm, "missing").is_err());
        assert!(dispatch_callback(&vm, "missing", &[]).is_err());
    }
}

impl Drop for CallbackRecord {
    fn drop(&mut self) {
        // The trampoline `Handle`'s own `Drop` releases its root; this
        // reclaims the leaked closure context, the other half of the
        // record's native-side footprint.
        if !self.ctx.is_null() {
            // SAFETY: `ctx` was produced by `Box::into_raw` in
            // `allocate_trampoline` and is owned exclusively by this
            // record.
            unsafe { drop(Box::from_raw(self.ctx)) };
        }
    }
}
