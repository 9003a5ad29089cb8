//! Maps. Haxe's `Map<K,V>` has no dedicated native representation the way
//! arrays and enums do — it is an ordinary object instantiated through its
//! constructor and driven entirely through ordinary method dispatch,
//! exactly as a host embedder would use it from Haxe code.

use crate::error::Result;
use crate::handle::Handle;
use crate::invoke;
use crate::vm::VmShared;

/// Fully-qualified names of the concrete `Map` implementation selected by
/// key kind. `StringMap`/`ObjectMap` cover the cases this crate's typed
/// convenience layer needs; a host wanting `IntMap`/`EnumValueMap` can
/// construct those directly via [`crate::invoke::new_instance`] using the
/// same dispatch this module builds on.
const STRING_MAP_CLASS: &str = "haxe.ds.StringMap";
const OBJECT_MAP_CLASS: &str = "haxe.ds.ObjectMap";

/// Which concrete `Map` implementation backs a [`map_new`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKeyKind {
    Str,
    Object,
}

impl MapKeyKind {
    fn class_name(self) -> &'static str {
        match self {
            MapKeyKind::Str => STRING_MAP_CLASS,
            MapKeyKind::Object => OBJECT_MAP_CLASS,
        }
    }
}

/// Allocates the concrete map implementation matching `kind` via its
/// ordinary zero-argument constructor.
pub fn map_new(vm: &VmShared, kind: MapKeyKind) -> Result<Handle> {
    invoke::new_instance(vm, kind.class_name(), &[])
}

/// Returns `null` if the key is absent, matching Haxe's own `Map.get`
/// contract — not distinguished from a genuinely-stored null value, per
/// that same contract.
pub fn map_get(vm: &VmShared, map: &Handle, key: &Handle) -> Result<Handle> {
    let result = invoke::call_method(vm, map, "get", std::slice::from_ref(key))?;
    Ok(result.unwrap_or_else(|| Handle::null(vm)))
}

/// Sets `key` to `value` in `map`.
pub fn map_set(vm: &VmShared, map: &Handle, key: &Handle, value: &Handle) -> Result<()> {
    let key_arg = Handle::wrap_borrowed(vm, key.raw());
    let value_arg = Handle::wrap_borrowed(vm, value.raw());
    invoke::call_method(vm, map, "set", &[key_arg, value_arg])?;
    Ok(())
}

/// Checks whether `key` exists in `map`.
pub fn map_has(vm: &VmShared, map: &Handle, key: &Handle) -> Result<bool> {
    let result = invoke::call_method(vm, map, "exists", std::slice::from_ref(key))?;
    Ok(result.map(|h| crate::value::bool_from_vm(&h, false)).unwrap_or(false))
}

/// Drains `map`'s key iterator eagerly into a `Vec` — the iterator
/// protocol itself (`hasNext`/`next`) is not part of this engine's
/// surface, only whole-collection snapshots are.
pub fn map_keys(vm: &VmShared, map: &Handle) -> Result<Vec<Handle>> {
    let iter = invoke::call_method(vm, map, "keys", &[])?
        .ok_or(crate::error::Error::NullValue)?;
    let mut keys = Vec::new();
    loop {
        let has_next = invoke::call_method(vm, &iter, "hasNext", &[])?
            .map(|h| crate::value::bool_from_vm(&h, false))
            .unwrap_or(false);
        if !has_next {
            break;
        }
        if let Some(next) = invoke::call_method(vm, &iter, "next", &[])? {
            keys.push(next);
        } else {
            break;
        }
    }
    Ok(keys)
}
