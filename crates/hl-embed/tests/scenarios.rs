//! End-to-end coverage of the crate's main usage walkthrough scenarios,
//! driven against a small fixture module built with
//! [`hl_embed::testutil::fake`]:
//! `Game` (a static-field class plus two static methods, one of which
//! throws) and `Player` (an instance class with a constructor and a
//! mutating method). Array and callback coverage need no bytecode-level
//! type at all beyond the one array wrapper class the runtime always
//! resolves by name.
//!
//! Written as a single `#[test]` function for the same reason
//! `tests/lifecycle.rs` is: at most one successful `VmInstance::init()` per
//! process.

use hl_embed::collections::{array_get, array_length, array_new, array_push, array_set, ArrayElementKind};
use hl_embed::error::Error;
use hl_embed::event_loop::{self, EventKind};
use hl_embed::invoke;
use hl_embed::sys::{self, HlValueKind, VdynamicPtr};
use hl_embed::testutil::fake::{self, ClassSpec};
use hl_embed::value;
use hl_embed::{callback, FromVm, Handle, IntoVm, VmConfig, VmInstance};

const FINDEX_ENTRY: u32 = 0;
const FINDEX_ECHO: u32 = 1;
const FINDEX_EXPLODE: u32 = 2;
const FINDEX_PLAYER_CTOR: u32 = 3;
const FINDEX_PLAYER_TAKE_DAMAGE: u32 = 4;

const SCORE_OFFSET: u32 = 8;
const PLAYER_NAME_OFFSET: u32 = 8;
const PLAYER_HEALTH_OFFSET: u32 = 16;

fn box_i32(v: i64) -> VdynamicPtr {
    // SAFETY: `hl_primitive_type`/`hl_alloc_dynamic` are the fake's
    // process-lifetime primitive allocator, valid to call at any point.
    unsafe {
        let ty = sys::hl_primitive_type(HlValueKind::I32);
        let raw = sys::hl_alloc_dynamic(ty);
        sys::hl_dyn_seti(raw, 0, v);
        raw
    }
}

fn read_i32_field(obj: VdynamicPtr, offset: u32) -> i64 {
    // SAFETY: `obj` is a live fake object; `offset` is one of the fixed
    // field offsets this fixture assigns below.
    unsafe {
        let boxed = sys::hl_dyn_getp(obj, offset);
        sys::hl_dyn_geti(boxed, 0)
    }
}

#[test]
fn scenarios() {
    fake::reset();

    let game_ty = fake::define_class(ClassSpec {
        name: "Game",
        kind: HlValueKind::Obj,
        fields: vec!["score"],
        methods: vec![("echo".to_string(), FINDEX_ECHO), ("explode".to_string(), FINDEX_EXPLODE)],
        with_global: true,
        ..ClassSpec::default()
    });
    let game_global = unsafe { sys::hl_type_global_value(game_ty) };

    let player_ty = fake::define_class(ClassSpec {
        name: "Player",
        kind: HlValueKind::Obj,
        fields: vec!["name", "health"],
        methods: vec![
            ("$Player.__constructor__".to_string(), FINDEX_PLAYER_CTOR),
            ("takeDamage".to_string(), FINDEX_PLAYER_TAKE_DAMAGE),
        ],
        ..ClassSpec::default()
    });

    let array_wrapper_ty = fake::define_class(ClassSpec {
        name: "hl.types.ArrayBytes_Int",
        kind: HlValueKind::Obj,
        fields: vec!["size", "elements"],
        ..ClassSpec::default()
    });

    let entry_fn = fake::define_function(move |_args| {
        // SAFETY: `game_global` was materialized by `define_class` above
        // and is valid for the process's lifetime.
        unsafe { sys::hl_dyn_setp(game_global, SCORE_OFFSET, box_i32(0)) };
        Ok(std::ptr::null_mut())
    });
    let echo_fn = fake::define_function(|args: &[VdynamicPtr]| Ok(args[0]));
    let explode_fn = fake::define_function(|_args| Err("the engine caught fire".to_string()));
    let player_ctor_fn = fake::define_function(|args: &[VdynamicPtr]| {
        let receiver = args[0];
        // SAFETY: `receiver` was just allocated by `new_instance` with room
        // for this class's declared fields.
        unsafe {
            sys::hl_dyn_setp(receiver, PLAYER_NAME_OFFSET, args[1]);
            sys::hl_dyn_setp(receiver, PLAYER_HEALTH_OFFSET, args[2]);
        }
        Ok(std::ptr::null_mut())
    });
    let player_take_damage_fn = fake::define_function(|args: &[VdynamicPtr]| {
        let receiver = args[0];
        let amount = unsafe { sys::hl_dyn_geti(args[1], 0) };
        let current = read_i32_field(receiver, PLAYER_HEALTH_OFFSET);
        let updated = box_i32(current - amount);
        unsafe { sys::hl_dyn_setp(receiver, PLAYER_HEALTH_OFFSET, updated) };
        Ok(std::ptr::null_mut())
    });

    fake::install_module(
        vec![game_ty, player_ty, array_wrapper_ty],
        vec![
            (FINDEX_ENTRY, entry_fn),
            (FINDEX_ECHO, echo_fn),
            (FINDEX_EXPLODE, explode_fn),
            (FINDEX_PLAYER_CTOR, player_ctor_fn),
            (FINDEX_PLAYER_TAKE_DAMAGE, player_take_damage_fn),
        ],
        Some(FINDEX_ENTRY),
    );

    let instance = VmInstance::create(VmConfig::new()).expect("create always succeeds");
    instance.init().expect("first and only init in this process");
    instance.load_memory(&[]).expect("fixture module loads");
    instance.call_entry().expect("entry point runs and materializes Game's global");

    let vm = instance.shared();

    // --- Hello score: static field round trip ---
    invoke::set_static_field(&vm, "Game", "score", &42i32.into_vm(&vm).unwrap()).unwrap();
    let score = invoke::get_static_field(&vm, "Game", "score").unwrap();
    assert_eq!(i32::from_vm(&score), 42);

    // --- String echo ---
    let greeting = value::string_to_vm(&vm, "hello, haxe").unwrap();
    let echoed = invoke::call_static(&vm, "Game", "echo", std::slice::from_ref(&greeting))
        .unwrap()
        .expect("echo returns a value");
    assert_eq!(value::string_from_vm(&echoed).unwrap(), Some("hello, haxe".to_string()));

    // --- Player lifecycle: construct, mutate, read back ---
    let name = value::string_to_vm(&vm, "Arthas").unwrap();
    let health = 100i32.into_vm(&vm).unwrap();
    let player = invoke::new_instance(&vm, "Player", &[name, health]).unwrap();
    assert!(invoke::is_instance_of(&vm, &player, "Player").unwrap());

    let amount = 30i32.into_vm(&vm).unwrap();
    invoke::call_method(&vm, &player, "takeDamage", std::slice::from_ref(&amount)).unwrap();
    let remaining = invoke::get_field(&vm, &player, "health").unwrap();
    assert_eq!(i32::from_vm(&remaining), 70);

    let player_name = invoke::get_field(&vm, &player, "name").unwrap();
    assert_eq!(value::string_from_vm(&player_name).unwrap(), Some("Arthas".to_string()));

    // --- Array round-trip ---
    let mut numbers = array_new(&vm, ArrayElementKind::I32, 2).unwrap();
    array_set(&numbers, 0, &10i32.into_vm(&vm).unwrap()).unwrap();
    array_set(&numbers, 1, &20i32.into_vm(&vm).unwrap()).unwrap();
    assert_eq!(array_length(&numbers), 2);
    assert_eq!(i64::from_vm(&array_get(&vm, &numbers, 0)), 10);
    array_push(&vm, &mut numbers, &30i32.into_vm(&vm).unwrap()).unwrap();
    assert_eq!(array_length(&numbers), 3);
    assert_eq!(i64::from_vm(&array_get(&vm, &numbers, 2)), 30);
    assert!(array_set(&numbers, 99, &0i32.into_vm(&vm).unwrap()).is_err());

    // --- Callback chain: host function registered and dispatched by name ---
    let host_fn: callback::HostFn = Box::new(|vm: &hl_embed::VmShared, args: &[Handle]| {
        let n = i32::from_vm(&args[0]);
        Ok(Some((n * 2).into_vm(vm)?))
    });
    callback::register_callback(&vm, "double", 1, host_fn).unwrap();
    let trampoline = callback::get_callback(&vm, "double").unwrap();
    assert!(!trampoline.is_null());
    let result = callback::dispatch_callback(&vm, "double", &[21i32.into_vm(&vm).unwrap()])
        .unwrap()
        .expect("double returns a value");
    assert_eq!(i32::from_vm(&result), 42);
    assert!(callback::dispatch_callback(&vm, "missing", &[]).is_err());

    // --- Timer precision / event loop: soft-linked, no-op without symbols ---
    event_loop::update(&vm, 16.6).expect("update is a soft-linked no-op without symbols");
    assert!(!event_loop::has_pending(&vm, EventKind::BOTH));
    assert!(event_loop::process_events(&vm, EventKind::HAXE).is_ok());

    // --- Exception capture ---
    assert!(!instance.has_exception());
    let err = invoke::call_static(&vm, "Game", "explode", &[]).unwrap_err();
    assert!(matches!(err, Error::ExceptionThrown(_)));
    assert!(instance.has_exception());
    assert_eq!(instance.exception_message().as_deref(), Some("the engine caught fire"));
    instance.clear_exception();
    assert!(!instance.has_exception());

    instance.destroy().expect("destroy is infallible once reached");
}
