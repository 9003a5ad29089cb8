//! Handle & root registry.
//!
//! A [`Handle`] is the one type every other component hands the host: an
//! owned wrapper around an opaque [`sys::VdynamicPtr`] that may or may not
//! carry a GC root.

use crate::error::{Error, Result};
use crate::sys;
use crate::vm::VmShared;
use std::rc::Rc;

/// An owned wrapper around a value living in the VM's heap.
///
/// Invariant: a `Handle` exclusively owns its root registration. There is
/// no `Clone` impl, so exactly one `Handle` ever holds a given root at a
/// time; dropping it unregisters the root (if any) exactly once.
pub struct Handle {
    raw: sys::VdynamicPtr,
    rooted: bool,
    vm: VmShared,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("raw", &self.raw)
            .field("rooted", &self.rooted)
            .finish()
    }
}

impl Handle {
    /// `wrap_rooted` — registers a GC root on `raw`.
    ///
    /// Required for any value stored beyond the current host stack frame,
    /// handed to asynchronous host code, or placed inside a host
    /// heap-allocated struct.
    pub fn wrap_rooted(vm: &VmShared, raw: sys::VdynamicPtr) -> Result<Handle> {
        if raw.is_null() {
            return Ok(Handle {
                raw,
                rooted: false,
                vm: vm.clone(),
            });
        }
        vm.roots().add(raw)?;
        Ok(Handle {
            raw,
            rooted: true,
            vm: vm.clone(),
        })
    }

    /// `wrap_borrowed` — no root is registered; liveness is guaranteed by an
    /// enclosing rooted value or the current stack frame.
    pub fn wrap_borrowed(vm: &VmShared, raw: sys::VdynamicPtr) -> Handle {
        Handle {
            raw,
            rooted: false,
            vm: vm.clone(),
        }
    }

    /// Null `Handle` with the "dynamic" type descriptor, per the host → VM
    /// null coercion rule.
    pub fn null(vm: &VmShared) -> Handle {
        Handle {
            raw: std::ptr::null_mut(),
            rooted: false,
            vm: vm.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    pub fn rooted(&self) -> bool {
        self.rooted
    }

    pub(crate) fn raw(&self) -> sys::VdynamicPtr {
        self.raw
    }

    pub(crate) fn vm(&self) -> &VmShared {
        &self.vm
    }

    /// Exposes the raw pointer to `hl-embed-capi`, which cannot reach
    /// `raw()`/`vm()` across the crate boundary but still needs them to
    /// rebuild a borrowed `Handle` from an opaque `hl_embed_handle_t*`.
    pub fn raw_for_ffi(&self) -> sys::VdynamicPtr {
        self.raw
    }

    /// See [`Handle::raw_for_ffi`].
    pub fn vm_for_ffi(&self) -> &VmShared {
        &self.vm
    }

    /// Promote a borrowed handle to a rooted one. Used whenever a value that
    /// started out borrowed (e.g. a field read) needs to outlive its parent
    /// frame — e.g. being stored into a [`crate::invoke::CachedCall`] or
    /// returned from `new_instance`.
    pub fn into_rooted(mut self) -> Result<Handle> {
        if self.rooted || self.raw.is_null() {
            return Ok(self);
        }
        self.vm.roots().add(self.raw)?;
        self.rooted = true;
        Ok(self)
    }

    /// Explicit release: unregisters the root (if any) and drops the
    /// wrapper. Idempotent — calling it twice, or on a null handle, is a
    /// no-op.
    pub fn release(mut self) {
        self.release_mut();
    }

    fn release_mut(&mut self) {
        if self.rooted && !self.raw.is_null() {
            self.vm.roots().remove(self.raw);
            self.rooted = false;
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release_mut();
    }
}

/// The GC root registry itself.
///
/// Roots may be added and removed in any order; the registry does not
/// assume stack discipline. Internally this mirrors `hl_add_root`/
/// `hl_remove_root` 1:1 — the registry's only job above the raw FFI calls
/// is turning "the root table could not grow" into [`Error::OutOfMemory`]
/// and keeping a live count for diagnostics (`root_count`).
pub struct RootRegistry {
    count: std::cell::Cell<usize>,
}

impl RootRegistry {
    pub fn new() -> Rc<RootRegistry> {
        Rc::new(RootRegistry {
            count: std::cell::Cell::new(0),
        })
    }

    fn add(&self, raw: sys::VdynamicPtr) -> Result<()> {
        let mut slot = raw;
        // SAFETY: `hl_add_root` takes the address of the pointer it is
        // asked to treat as a root; `slot` lives on this stack frame for the
        // duration of the call, which is all the contract requires.
        let ok = unsafe { sys::hl_add_root(&mut slot as *mut _) };
        if ok == 0 {
            return Err(Error::OutOfMemory);
        }
        self.count.set(self.count.get() + 1);
        Ok(())
    }

    fn remove(&self, raw: sys::VdynamicPtr) {
        let mut slot = raw;
        // SAFETY: see `add`; `hl_remove_root` tolerates a pointer value that
        // does not match any currently-registered root, and we only call
        // this when `rooted` was true.
        unsafe { sys::hl_remove_root(&mut slot as *mut _) };
        self.count.set(self.count.get().saturating_sub(1));
    }

    /// Diagnostic: number of roots currently registered through this
    /// registry. Used by tests and by hosts that want to assert no root
    /// leaks across a call boundary.
    pub fn root_count(&self) -> usize {
        self.count.get()
    }
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
    fn null_handle_is_never_rooted() {
        let vm = vm();
        let handle = Handle::null(&vm);
        assert!(handle.is_null());
        assert!(!handle.rooted());
    }

    #[test]
    fn wrap_rooted_registers_and_drop_releases() {
        let vm = vm();
        let raw = unsafe { sys::hl_alloc_dynamic(sys::hl_primitive_type(sys::HlValueKind::I32)) };
        {
            let handle = Handle::wrap_rooted(&vm, raw).unwrap();
            assert!(handle.rooted());
            assert_eq!(vm.roots().root_count(), 1);
        }
        assert_eq!(vm.roots().root_count(), 0);
    }

    #[test]
    fn wrap_borrowed_never_roots() {
        let vm = vm();
        let raw = unsafe { sys::hl_alloc_dynamic(sys::hl_primitive_type(sys::HlValueKind::I32)) };
        let handle = Handle::wrap_borrowed(&vm, raw);
        assert!(!handle.rooted());
        assert_eq!(vm.roots().root_count(), 0);
    }

    #[test]
    fn into_rooted_promotes_exactly_once() {
        let vm = vm();
        let raw = unsafe { sys::hl_alloc_dynamic(sys::hl_primitive_type(sys::HlValueKind::I32)) };
        let handle = Handle::wrap_borrowed(&vm, raw).into_rooted().unwrap();
        assert!(handle.rooted());
        assert_eq!(vm.roots().root_count(), 1);
        let handle = handle.into_rooted().unwrap();
        assert_eq!(vm.roots().root_count(), 1);
        drop(handle);
        assert_eq!(vm.roots().root_count(), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let vm = vm();
        let raw = unsafe { sys::hl_alloc_dynamic(sys::hl_primitive_type(sys::HlValueKind::I32)) };
        let handle = Handle::wrap_rooted(&vm, raw).unwrap();
        assert_eq!(vm.roots().root_count(), 1);
        handle.release();
        assert_eq!(vm.roots().root_count(), 0);

        let handle = Handle::null(&vm);
        handle.release();
    }
}
