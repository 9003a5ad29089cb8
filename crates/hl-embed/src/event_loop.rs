//! Event-loop driver.
//!
//! Steps the two cooperative event loops that may exist *inside* a loaded
//! module — the runtime's async-I/O loop, and the Haxe-level main/event
//! loop — without ever blocking. Both are optional: absent symbols mean the
//! module did not include those facilities and the corresponding kind
//! becomes a no-op.

use crate::error::Result;
use crate::vm::VmShared;
use bitflags::bitflags;

bitflags! {
    /// Which loop(s) to step in a call to `process_events`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventKind: u8 {
        const IO    = 0b01;
        const HAXE  = 0b10;
        const BOTH  = Self::IO.bits() | Self::HAXE.bits();
    }
}

/// Per-VM driver state. Holds nothing but a little bookkeeping for
/// `has_pending`; the actual loops live inside the VM/module.
#[derive(Default)]
pub struct EventLoopDriver {
    last_io_had_work: bool,
    last_haxe_had_work: bool,
}

impl EventLoopDriver {
    pub fn new() -> EventLoopDriver {
        EventLoopDriver::default()
    }
}

/// Makes one non-blocking pass over the loop(s) selected by `kind`.
pub fn process_events(vm: &VmShared, kind: EventKind) -> Result<()> {
    let symbols = vm.symbols();
    let mut driver = vm.events().borrow_mut();

    if kind.contains(EventKind::IO) {
        driver.last_io_had_work = match symbols.async_io_run_nowait {
            // SAFETY: the symbol was probed for and stored by
            // `VmInstance::set_event_loop_symbols`; calling it here is a
            // single non-blocking pass over the async-I/O loop, matching
            // its documented contract.
            Some(run) => unsafe { run() } != 0,
            None => false,
        };
    }

    if kind.contains(EventKind::HAXE) {
        // Both entries must be called, in this order: `progress` fires due
        // timers, `tick` fires `MainLoop.add` callbacks. Calling only the
        // second misses Haxe timers.
        let progress_fired = match symbols.haxe_event_loop_progress {
            // SAFETY: probed-for symbol; non-blocking by contract.
            Some(progress) => unsafe { progress() } != 0,
            None => false,
        };
        let tick_fired = match symbols.haxe_main_loop_tick {
            // SAFETY: as above.
            Some(tick) => unsafe { tick() } != 0,
            None => false,
        };
        driver.last_haxe_had_work = progress_fired || tick_fired;
    }

    Ok(())
}

/// Steps both loops once per host frame. `delta_time` is accepted for API
/// symmetry with a host's own per-frame tick but is not threaded into the
/// runtime — HashLink's timer wheel tracks wall-clock time itself.
pub fn update(vm: &VmShared, _delta_time_ms: f64) -> Result<()> {
    process_events(vm, EventKind::BOTH)
}

/// Whether either loop had outstanding work, based on the most recent pass.
pub fn has_pending(vm: &VmShared, kind: EventKind) -> bool {
    let driver = vm.events().borrow();
    (kind.contains(EventKind::IO) && driver.last_io_had_work)
        || (kind.contains(EventKind::HAXE) && driver.last_haxe_had_work)
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
    fn both_is_the_union_of_io_and_haxe() {
        assert_eq!(EventKind::BOTH, EventKind::IO | EventKind::HAXE);
        assert!(EventKind::BOTH.contains(EventKind::IO));
        assert!(EventKind::BOTH.contains(EventKind::HAXE));
    }

    #[test]
    fn io_only_pass_never_errors_without_haxe_symbols() {
        let vm = vm();
        process_events(&vm, EventKind::IO).expect("IO-only pass never requires Haxe symbols");
        assert!(!has_pending(&vm, EventKind::IO));
    }

    #[test]
    fn update_absorbs_missing_event_loop_as_a_no_op() {
        let vm = vm();
        update(&vm, 16.6).expect("update never fails on a module without timers");
        assert!(!has_pending(&vm, EventKind::BOTH));
    }
}
