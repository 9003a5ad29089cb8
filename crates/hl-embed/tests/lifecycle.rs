//! Exercises the lifecycle state machine end to end, including the two
//! restrictions that only show up once per process: a
//! second successful `init()` anywhere in this binary returning
//! `AlreadyInitialized`, and `reload` without `enable_reload` returning
//! `ReloadNotEnabled`. Both only make sense written as a single `#[test]`
//! function (see `hl_embed::testutil`'s module doc comment).

use hl_embed::error::Error;
use hl_embed::testutil::fake;
use hl_embed::{VmConfig, VmInstance};

#[test]
fn lifecycle_state_machine_errors() {
    fake::reset();

    let vm_a = VmInstance::create(VmConfig::new()).expect("create always succeeds");

    // Operations requiring a later state fail cleanly before init.
    assert!(matches!(
        vm_a.load_memory(&[]),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(vm_a.call_entry(), Err(Error::NotInitialized)));

    vm_a.init().expect("first init in this process succeeds");

    // A second instance created in the same process cannot also init the
    // (non-idempotent) runtime.
    let vm_b = VmInstance::create(VmConfig::new()).expect("create always succeeds");
    assert!(matches!(vm_b.init(), Err(Error::AlreadyInitialized)));

    // Calling the entry point before a module is loaded still fails.
    assert!(matches!(vm_a.call_entry(), Err(Error::NotInitialized)));

    // Stage a module with an entry point that does nothing, then load it.
    let entry = fake::define_function(|_args| Ok(std::ptr::null_mut()));
    fake::install_module(vec![], vec![(0, entry)], Some(0));
    vm_a.load_memory(&[]).expect("load_memory picks up the staged module");

    assert!(!vm_a.has_entry_run());
    vm_a.call_entry().expect("entry point runs");
    assert!(vm_a.has_entry_run());

    // Reload is opt-in per instance; without enabling it, it's rejected
    // outright rather than probed for runtime support.
    assert!(matches!(vm_a.reload("/nonexistent.hl"), Err(Error::ReloadNotEnabled)));

    assert!(!vm_a.has_exception());

    vm_a.destroy().expect("destroy is infallible once reached");
    // `vm_b` was never initialized; destroying it is still safe and a no-op
    // beyond unregistering its thread.
    vm_b.destroy().expect("destroy on an uninitialized instance is a no-op");
}
