//! Lifecycle: create, initialize, load, call entry point, reload, destroy.
//! This is the module the host drives first; every other component borrows
//! the [`VmShared`] it creates.

use crate::callback::CallbackRegistry;
use crate::error::{Error, Result};
use crate::event_loop::EventLoopDriver;
use crate::exception::ExceptionState;
use crate::sys;
use crate::types::TypeCache;
use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

/// Process-wide latch: the underlying HashLink runtime's `init` is not
/// idempotent. A second `init` in the same process is not safe, so the
/// crate refuses it outright rather
/// than letting the runtime misbehave.
static RUNTIME_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Builder for the handful of things `create`/`init` need. Deliberately does
/// not read files or environment variables — that is out of scope; the host
/// drives the VM from its own thread and assembles the entry point
/// arguments itself.
#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    args: Vec<String>,
}

impl VmConfig {
    pub fn new() -> VmConfig {
        VmConfig::default()
    }

    /// Program arguments forwarded to `hl_sys_init`.
    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> VmConfig {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// The state-machine positions of the VM's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Initialized,
    Loaded,
    Ready,
    Destroyed,
}

/// Shared, reference-counted VM context every other component borrows.
/// Analogous to `wasmtime::Store` in role (the thing every handle/func/
/// instance is created against) though the ownership model here is
/// simpler: there is exactly one VM per process, a hard restriction
/// rather than just a default.
pub type VmShared = Rc<VmInner>;

pub struct VmInner {
    state: Cell<State>,
    entry_called: Cell<bool>,
    config: VmConfig,
    roots: Rc<crate::handle::RootRegistry>,
    types: RefCell<TypeCache>,
    callbacks: RefCell<CallbackRegistry>,
    exception: RefCell<ExceptionState>,
    events: RefCell<EventLoopDriver>,
    module: Cell<sys::HlModulePtr>,
    reload_enabled: Cell<bool>,
    symbols: RefCell<sys::OptionalSymbols>,
    reload_callback: RefCell<Option<Box<dyn Fn(Result<()>)>>>,
}

/// The VM instance the host owns and drives.
pub struct VmInstance {
    inner: VmShared,
}

impl VmInstance {
    /// Allocates the VM instance wrapper and registers the calling thread
    /// with the runtime.
    #[instrument(skip(config))]
    pub fn create(config: VmConfig) -> Result<VmInstance> {
        let inner = Rc::new(VmInner {
            state: Cell::new(State::Created),
            entry_called: Cell::new(false),
            config,
            roots: crate::handle::RootRegistry::new(),
            types: RefCell::new(TypeCache::new()),
            callbacks: RefCell::new(CallbackRegistry::new()),
            exception: RefCell::new(ExceptionState::default()),
            events: RefCell::new(EventLoopDriver::new()),
            module: Cell::new(std::ptr::null_mut()),
            reload_enabled: Cell::new(false),
            symbols: RefCell::new(sys::OptionalSymbols::default()),
            reload_callback: RefCell::new(None),
        });
        // SAFETY: the current thread has not yet been registered with the
        // runtime's GC; this is the one call that is always safe to make
        // unconditionally at this point.
        let stack_top = &inner as *const _ as *mut std::ffi::c_void;
        unsafe { sys::hl_register_thread(stack_top) };
        tracing::debug!("VM instance created, calling thread registered");
        Ok(VmInstance { inner })
    }

    /// Sets up the runtime exactly once per process.
    #[instrument(skip(self))]
    pub fn init(&self) -> Result<()> {
        self.expect_state(State::Created)?;
        if RUNTIME_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        // SAFETY: `hl_global_init` is documented by the runtime to be called
        // at most once per process; the `RUNTIME_INITIALIZED` latch above
        // enforces that from the Rust side.
        unsafe { sys::hl_global_init() };

        let cstrings: Vec<CString> = self
            .inner
            .config
            .args
            .iter()
            .map(|a| CString::new(a.as_str()).unwrap_or_default())
            .collect();
        let ptrs: Vec<*const std::ffi::c_char> = cstrings.iter().map(|c| c.as_ptr()).collect();
        // SAFETY: `ptrs`/`cstrings` outlive this call.
        let rc = unsafe { sys::hl_sys_init(ptrs.as_ptr(), ptrs.len() as i32) };
        if rc == 0 {
            return Err(Error::InitFailed("hl_sys_init returned failure".into()));
        }
        self.inner.state.set(State::Initialized);
        tracing::info!("HashLink runtime initialized");
        Ok(())
    }

    /// Parses bytecode from disk and allocates a module.
    #[instrument(skip(self))]
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        self.load_memory(&bytes)
    }

    /// `load_memory(buf)` — parse bytecode already in host memory.
    #[instrument(skip(self, buf))]
    pub fn load_memory(&self, buf: &[u8]) -> Result<()> {
        self.expect_state(State::Initialized)?;
        let mut errmsg: *mut std::ffi::c_char = std::ptr::null_mut();
        // SAFETY: `buf` outlives the call; `errmsg` is an out-param the
        // runtime fills only on failure.
        let code = unsafe { sys::hl_code_read(buf.as_ptr(), buf.len() as i32, &mut errmsg) };
        if code.is_null() {
            let msg = read_c_string(errmsg).unwrap_or_else(|| "invalid bytecode".into());
            return Err(Error::InvalidBytecode(msg));
        }
        // SAFETY: `code` was just validated non-null above.
        let module = unsafe { sys::hl_module_alloc(code) };
        if module.is_null() {
            return Err(Error::ModuleLoadFailed("hl_module_alloc failed".into()));
        }
        // SAFETY: `module` freshly allocated, not yet shared.
        let ok = unsafe { sys::hl_module_init(module, 1) };
        if ok == 0 {
            return Err(Error::ModuleInitFailed("hl_module_init failed".into()));
        }
        self.inner.module.set(module);
        self.inner.types.borrow_mut().populate(module)?;
        self.inner.state.set(State::Loaded);
        tracing::info!("module loaded");
        Ok(())
    }

    /// Invokes the entry function; required before any static-field access.
    #[instrument(skip(self))]
    pub fn call_entry(&self) -> Result<()> {
        self.expect_state(State::Loaded)?;
        let module = self.inner.module.get();
        if module.is_null() {
            return Err(Error::EntryPointMissing);
        }
        // SAFETY: `module` was initialized by `load_memory` above.
        let entry = unsafe { sys::hl_module_entry_point(module) };
        if entry.is_null() {
            return Err(Error::EntryPointMissing);
        }
        let mut is_exc: i32 = 0;
        // SAFETY: zero-argument direct entry call; no receiver, no args.
        let _ = unsafe { sys::hl_dyn_call_safe(entry, std::ptr::null(), 0, &mut is_exc) };
        if is_exc != 0 {
            let msg = self.inner.exception.borrow_mut().capture_current();
            return Err(Error::ExceptionThrown(msg));
        }
        self.inner.entry_called.set(true);
        self.inner.state.set(State::Ready);
        tracing::info!("entry point invoked, static globals materialized");
        Ok(())
    }

    /// Loads a new module image and reconciles call sites against it. Only
    /// supported when the runtime build exposes the hot-reload symbol (soft
    /// linkage).
    ///
    /// Guard-clause failures (reload not enabled, not supported, the file
    /// itself missing or unparseable) are reported directly to the caller
    /// and never reach the registered reload callback — those mean a reload
    /// was never actually attempted against the runtime. Once the new
    /// bytecode is handed to the runtime, the outcome (success or
    /// [`Error::ReloadFailed`]) is reported both to the caller and, if one
    /// is registered, to the reload callback.
    #[instrument(skip(self))]
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<()> {
        self.expect_state(State::Ready)?;
        if !self.inner.reload_enabled.get() {
            return Err(Error::ReloadNotEnabled);
        }
        let hot_reload = self
            .inner
            .symbols
            .borrow()
            .hot_reload
            .ok_or(Error::ReloadNotSupported)?;
        let bytes = std::fs::read(path.as_ref())
            .map_err(|_| Error::FileNotFound(path.as_ref().display().to_string()))?;
        let mut errmsg: *mut std::ffi::c_char = std::ptr::null_mut();
        // SAFETY: `bytes` outlives the call.
        let code = unsafe { sys::hl_code_read(bytes.as_ptr(), bytes.len() as i32, &mut errmsg) };
        if code.is_null() {
            let msg = read_c_string(errmsg).unwrap_or_else(|| "invalid bytecode".into());
            return self.finish_reload(Err(Error::ReloadFailed(msg)));
        }
        // SAFETY: `hot_reload` is the soft-linked symbol probed for above;
        // `code` was just validated.
        let ok = unsafe { hot_reload(code) };
        if ok == 0 {
            return self.finish_reload(Err(Error::ReloadFailed("runtime rejected new image".into())));
        }
        self.inner.callbacks.borrow_mut().retain_live();
        let module = self.inner.module.get();
        let result = self.inner.types.borrow_mut().populate(module);
        if result.is_ok() {
            tracing::info!("module reloaded");
        }
        self.finish_reload(result)
    }

    /// Notifies the registered reload callback, if any, of `result`, then
    /// returns it unchanged to the caller of `reload`.
    fn finish_reload(&self, result: Result<()>) -> Result<()> {
        if let Some(cb) = self.inner.reload_callback.borrow().as_ref() {
            cb(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(Error::ReloadFailed(e.to_string())),
            });
        }
        result
    }

    /// Enables [`VmInstance::reload`] for this instance, probing for the
    /// runtime's optional hot-reload symbol. A no-op (and future `reload`
    /// calls fail with [`Error::ReloadNotSupported`]) if the symbol is
    /// absent.
    pub fn enable_reload(&self, hot_reload: unsafe extern "C" fn(*mut std::ffi::c_void) -> i32) {
        self.inner.symbols.borrow_mut().hot_reload = Some(hot_reload);
        self.inner.reload_enabled.set(true);
    }

    /// Registers a callback invoked at the end of every `reload()` call that
    /// actually reaches the runtime, with the outcome (success or
    /// [`Error::ReloadFailed`]). Replaces any previously registered
    /// callback.
    pub fn register_reload_callback(&self, callback: impl Fn(Result<()>) + 'static) {
        *self.inner.reload_callback.borrow_mut() = Some(Box::new(callback));
    }

    /// Registers the optional event-loop symbols this module's build
    /// exposes. Any field left `None` makes the corresponding
    /// `process_events(..)` kind a no-op.
    pub fn set_event_loop_symbols(&self, symbols: sys::OptionalSymbols) {
        *self.inner.symbols.borrow_mut() = symbols;
    }

    /// Releases all core-owned registries and tears down the runtime.
    /// Terminal: the runtime cannot be reinitialized afterwards in this
    /// process.
    #[instrument(skip(self))]
    pub fn destroy(mut self) -> Result<()> {
        self.destroy_mut()
    }

    fn destroy_mut(&mut self) -> Result<()> {
        if self.inner.state.get() == State::Destroyed {
            return Ok(());
        }
        self.inner.callbacks.borrow_mut().clear();
        let module = self.inner.module.get();
        if !module.is_null() {
            // SAFETY: module was allocated by this instance and is not
            // shared outside of it.
            unsafe { sys::hl_module_free(module) };
            self.inner.module.set(std::ptr::null_mut());
        }
        // SAFETY: balanced with the `hl_register_thread` call in `create`.
        unsafe { sys::hl_unregister_thread() };
        // SAFETY: balanced with `hl_global_init` in `init`, and this is the
        // only teardown call for the process (`RUNTIME_INITIALIZED` is
        // never reset, matching the "non-idempotent init" restriction).
        if RUNTIME_INITIALIZED.load(Ordering::SeqCst) {
            unsafe { sys::hl_global_free() };
        }
        self.inner.state.set(State::Destroyed);
        tracing::info!("VM instance destroyed");
        Ok(())
    }

    pub fn shared(&self) -> VmShared {
        self.inner.clone()
    }

    pub fn has_entry_run(&self) -> bool {
        self.inner.entry_called.get()
    }

    /// Whether a Haxe exception is pending, exposed on the instance itself
    /// so `hl-embed-capi` does not need crate-internal access to
    /// `VmInner::exception`.
    pub fn has_exception(&self) -> bool {
        self.inner.exception.borrow().has_exception()
    }

    pub fn exception_message(&self) -> Option<String> {
        self.inner.exception.borrow().message().map(str::to_string)
    }

    pub fn exception_trace(&self) -> Option<String> {
        self.inner.exception.borrow().trace().map(str::to_string)
    }

    pub fn clear_exception(&self) {
        self.inner.exception.borrow_mut().clear();
    }

    fn expect_state(&self, expected: State) -> Result<()> {
        if self.inner.state.get() != expected {
            return match expected {
                State::Initialized | State::Loaded => Err(Error::NotInitialized),
                State::Ready => Err(Error::EntryPointMissing),
                _ => Err(Error::NotInitialized),
            };
        }
        Ok(())
    }
}

impl VmInner {
    pub(crate) fn roots(&self) -> &crate::handle::RootRegistry {
        &self.roots
    }

    pub(crate) fn types(&self) -> &RefCell<TypeCache> {
        &self.types
    }

    pub(crate) fn callbacks(&self) -> &RefCell<CallbackRegistry> {
        &self.callbacks
    }

    pub(crate) fn exception(&self) -> &RefCell<ExceptionState> {
        &self.exception
    }

    pub(crate) fn events(&self) -> &RefCell<EventLoopDriver> {
        &self.events
    }

    pub(crate) fn symbols(&self) -> sys::OptionalSymbols {
        *self.symbols.borrow()
    }

    pub(crate) fn module(&self) -> sys::HlModulePtr {
        self.module.get()
    }

    pub(crate) fn entry_has_run(&self) -> bool {
        self.entry_called.get()
    }
}

fn read_c_string(ptr: *mut std::ffi::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees `ptr`, if non-null, is a NUL-terminated
    // string owned by the runtime for at least the duration of this call.
    let s = unsafe { std::ffi::CStr::from_ptr(ptr) };
    Some(s.to_string_lossy().into_owned())
}
