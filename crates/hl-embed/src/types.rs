//! Type & member resolver.
//!
//! The two non-obvious invariants this module exists to hide from the rest
//! of the crate:
//!
//! - every Haxe class has *two* type-table entries: a reflection descriptor
//!   (plain name) and a runtime-layout descriptor (`$`-prefixed name);
//!   field/method slots only exist on the latter.
//! - field physical offsets are not sequential in declaration order; they
//!   must be read from the per-type runtime layout table.

use crate::error::{Error, Result};
use crate::sys::{self, HlTypePtr, HlValueKind};
use crate::vm::VmShared;
use std::collections::HashMap;
use std::ffi::CStr;

/// A resolved reference to a `VmType` plus the metadata the resolver has
/// already extracted. Cached per module; lifetime = module lifetime.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    /// The plain-named reflection descriptor.
    pub(crate) reflect: HlTypePtr,
    /// The `$`-prefixed runtime-layout descriptor; field/method slots live
    /// here.
    pub(crate) layout: HlTypePtr,
}

impl TypeDescriptor {
    pub fn kind(&self) -> HlValueKind {
        // SAFETY: `reflect` is a type descriptor resolved from a loaded
        // module's type table; it outlives the module.
        unsafe { sys::hl_type_kind(self.reflect) }
    }

    pub fn name(&self) -> Result<String> {
        read_name(self.reflect)
    }

    pub fn is_abstract(&self) -> bool {
        // SAFETY: see `kind`.
        unsafe { sys::hl_type_is_abstract(self.reflect) != 0 }
    }

    fn layout_table(&self) -> Result<&'static sys::HlRuntimeLayout> {
        // SAFETY: `layout` is a runtime-layout descriptor resolved from a
        // loaded module; the returned table's lifetime matches the
        // module's.
        let ptr = unsafe { sys::hl_type_runtime_layout(self.layout) };
        if ptr.is_null() {
            return Err(Error::InvalidType(
                "type has no runtime layout (is it a primitive or Dynamic?)".into(),
            ));
        }
        // SAFETY: non-null, produced by the runtime for a valid object
        // type.
        Ok(unsafe { &*ptr })
    }

    pub fn field_count(&self) -> i32 {
        // SAFETY: `reflect` valid for module lifetime.
        unsafe { sys::hl_type_field_count(self.reflect) }
    }

    pub fn field_name(&self, i: i32) -> Result<String> {
        // SAFETY: caller-supplied index bounded by `field_count` is on the
        // caller; the runtime itself bounds-checks and returns null outside
        // range.
        let ptr = unsafe { sys::hl_type_field_name(self.reflect, i) };
        read_cstr(ptr).ok_or_else(|| Error::InvalidArgument("field index out of range".into()))
    }

    pub fn field_type(&self, i: i32) -> Result<TypeDescriptor> {
        // SAFETY: see `field_name`.
        let t = unsafe { sys::hl_type_field_type(self.reflect, i) };
        if t.is_null() {
            return Err(Error::InvalidArgument("field index out of range".into()));
        }
        Ok(TypeDescriptor {
            reflect: t,
            layout: t,
        })
    }

    /// Byte offset of declaration-order field `i`, read from the runtime
    /// layout table. Physical field offsets are not sequential in
    /// declaration order.
    pub fn field_offset(&self, i: i32) -> Result<u32> {
        let table = self.layout_table()?;
        if i < 0 || i >= table.nfields {
            return Err(Error::FieldNotFound {
                class: self.name().unwrap_or_default(),
                field: format!("#{i}"),
            });
        }
        // SAFETY: `i` just bounds-checked against `table.nfields`, and
        // `field_offsets` is guaranteed by the runtime to have exactly
        // `nfields` entries.
        Ok(unsafe { *table.field_offsets.add(i as usize) })
    }

    pub fn method_count(&self) -> i32 {
        unsafe { sys::hl_type_method_count(self.reflect) }
    }

    pub fn method_name(&self, i: i32) -> Result<String> {
        let ptr = unsafe { sys::hl_type_method_name(self.reflect, i) };
        read_cstr(ptr).ok_or_else(|| Error::InvalidArgument("method index out of range".into()))
    }

    /// The function-table index for declaration-order method `i`, read from
    /// the runtime layout table — *not* the method's position in the
    /// reflection method array.
    pub fn method_findex(&self, i: i32) -> Result<u32> {
        let table = self.layout_table()?;
        if i < 0 || i >= table.nmethods {
            return Err(Error::MethodNotFound {
                class: self.name().unwrap_or_default(),
                method: format!("#{i}"),
            });
        }
        // SAFETY: bounds-checked above.
        Ok(unsafe { *table.method_findex.add(i as usize) })
    }

    /// Looks up a method by name among this type's declared methods,
    /// returning its function-table index. Linear over the (small) method
    /// list of a single class; name → type resolution is the hashed path,
    /// this is a secondary lookup within one type.
    pub fn find_method_findex(&self, name: &str) -> Result<u32> {
        let n = self.method_count();
        for i in 0..n {
            if self.method_name(i)? == name {
                return self.method_findex(i);
            }
        }
        Err(Error::MethodNotFound {
            class: self.name().unwrap_or_default(),
            method: name.to_string(),
        })
    }

    /// Constructor lookup: the constructor is the method named
    /// `$<ClassName>.__constructor__`, not `"new"`.
    pub fn constructor_findex(&self) -> Result<u32> {
        let class_name = self.name()?;
        let ctor_name = format!("${class_name}.__constructor__");
        self.find_method_findex(&ctor_name)
    }

    pub fn superclass(&self) -> Option<TypeDescriptor> {
        // SAFETY: `reflect` valid for module lifetime.
        let s = unsafe { sys::hl_type_super(self.reflect) };
        if s.is_null() {
            None
        } else {
            Some(TypeDescriptor {
                reflect: s,
                layout: s,
            })
        }
    }
}

/// Per-module cache of name → [`TypeDescriptor`]. Names are matched by a
/// precomputed hash at the runtime level, not a linear scan.
pub struct TypeCache {
    by_name: HashMap<String, TypeDescriptor>,
}

impl TypeCache {
    pub fn new() -> TypeCache {
        TypeCache {
            by_name: HashMap::new(),
        }
    }

    /// Called whenever a new module image is loaded or reloaded; the
    /// previous module's descriptors are no longer valid.
    pub fn reset_for_module(&mut self) {
        self.by_name.clear();
    }

    /// Populates the cache by walking `module`'s type table once, pairing
    /// each plain-named reflection descriptor with its `$`-prefixed
    /// runtime-layout counterpart.
    pub fn populate(&mut self, module: sys::HlModulePtr) -> Result<()> {
        self.by_name.clear();
        // SAFETY: `module` was returned by a successful `hl_module_init`.
        let count = unsafe { sys::hl_module_type_count(module) };
        let mut raw_by_name: HashMap<String, HlTypePtr> = HashMap::new();
        for i in 0..count {
            // SAFETY: `i` bounded by `count` above.
            let t = unsafe { sys::hl_module_type_at(module, i) };
            if t.is_null() {
                continue;
            }
            let name = match read_name(t) {
                Ok(n) => n,
                Err(_) => continue,
            };
            raw_by_name.insert(name, t);
        }
        for (name, reflect) in raw_by_name.iter() {
            if let Some(stripped) = name.strip_prefix('$') {
                continue_if_reflect_missing(stripped, &raw_by_name);
                continue;
            }
            let layout_name = format!("${name}");
            let layout = *raw_by_name.get(&layout_name).unwrap_or(reflect);
            self.by_name.insert(
                name.clone(),
                TypeDescriptor {
                    reflect: *reflect,
                    layout,
                },
            );
        }
        Ok(())
    }

    /// Looks up a type by its case-sensitive, fully-qualified dotted name.
    pub fn find_type(&self, name: &str) -> Result<TypeDescriptor> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::TypeNotFound(name.to_string()))
    }

    /// Visits every cached type by name.
    pub fn list_types(&self, mut visitor: impl FnMut(&str, &TypeDescriptor)) {
        for (name, desc) in self.by_name.iter() {
            visitor(name, desc);
        }
    }
}

fn continue_if_reflect_missing(_stripped: &str, _raw: &HashMap<String, HlTypePtr>) {
    // `$`-prefixed entries are only ever consumed as the `layout` half of a
    // pair discovered via their plain-named counterpart above; nothing to
    // do when encountered directly during the scan.
}

fn read_name(t: HlTypePtr) -> Result<String> {
    // SAFETY: `t` is a type descriptor resolved from a loaded module; the
    // name pointer it returns is static for the descriptor's lifetime.
    let ptr = unsafe { sys::hl_type_name(t) };
    read_cstr(ptr).ok_or_else(|| Error::InvalidType("type has no name".into()))
}

fn read_cstr(ptr: *const std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null, NUL-terminated, owned by the runtime for the
    // descriptor's lifetime.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Process-lifetime primitive type descriptors used by [`crate::value`]'s
/// host → VM scalar boxing.
pub(crate) fn primitive_type(kind: HlValueKind) -> Result<HlTypePtr> {
    // SAFETY: primitive type descriptors are process-lifetime singletons
    // owned by the runtime, available even before a module is loaded.
    let t = unsafe { sys::hl_primitive_type(kind) };
    if t.is_null() {
        Err(Error::InvalidType(format!("no primitive type for {kind:?}")))
    } else {
        Ok(t)
    }
}

pub(crate) fn string_type() -> Result<HlTypePtr> {
    primitive_type(HlValueKind::Str)
}

/// Shared accessor used by callers that only have a [`VmShared`] and a
/// type name, saving the `vm.types().borrow()` boilerplate at call sites in
/// `crate::invoke`.
pub(crate) fn resolve(vm: &VmShared, name: &str) -> Result<TypeDescriptor> {
    vm.types().borrow().find_type(name)
}
