//! Exception bridge.
//!
//! Per-VM state holding the most recent Haxe exception crossing the
//! boundary, plus accessors to inspect it. Kept distinct from
//! [`crate::error::Error`]: an `Error` is the *signal* that something went
//! wrong on a particular call; `ExceptionState` is the *payload* a thrown
//! Haxe value carries, which can be inspected after the call returns.

use crate::sys;

/// The pending-exception state for a single VM.
#[derive(Debug, Default, Clone)]
pub struct ExceptionState {
    pub(crate) message: Option<String>,
    pub(crate) trace: Option<String>,
    present: bool,
}

impl ExceptionState {
    pub fn has_exception(&self) -> bool {
        self.present
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    /// Resets this local copy: the cached message, trace, and pending flag.
    /// The runtime's own thread-local exception slot is left untouched —
    /// it is overwritten wholesale the next time a call traps, never read
    /// again otherwise, so there is nothing there that needs clearing.
    pub fn clear(&mut self) {
        self.message = None;
        self.trace = None;
        self.present = false;
    }

    /// Copies the current thread's pending exception (if any) into
    /// host-owned text, mirroring what `try_call_static` does. Returns the
    /// message for convenience at call sites that also want to build an
    /// [`crate::error::Error::ExceptionThrown`].
    ///
    /// Called only right after a `hl_dyn_call_safe` reported `is_exc != 0`;
    /// at that point the runtime guarantees the thread-local exception value
    /// is set.
    pub(crate) fn capture_current(&mut self) -> String {
        // SAFETY: only called immediately after the runtime signalled an
        // exception is pending on this thread via `hl_dyn_call_safe`'s
        // out-param.
        let exc_msg_ptr = unsafe { sys::hl_exception_message(std::ptr::null_mut()) };
        let message = utf16_to_string(exc_msg_ptr).unwrap_or_else(|| "<unknown exception>".into());
        // SAFETY: same call-site guarantee as above; the trace accessor may
        // legitimately return null if the runtime was not built with
        // debug info.
        let trace_ptr = unsafe { sys::hl_exception_stack() };
        let trace = utf16_to_string(trace_ptr);

        self.message = Some(message.clone());
        self.trace = trace;
        self.present = true;
        message
    }
}

fn utf16_to_string(ptr: *const u16) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: `ptr` is a NUL-terminated UTF-16 string owned by the runtime
    // for at least the duration of this call, per the contract of
    // `hl_exception_message`/`hl_exception_stack`.
    let len = unsafe { sys::hl_utf16_length(ptr) } as usize;
    let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
    Some(String::from_utf16_lossy(slice))
}
