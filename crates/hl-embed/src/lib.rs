//! Safe Rust embedding layer over the HashLink bytecode VM's native
//! embedding API.
//!
//! The crate is organized the way the engine's embedding surface breaks
//! down: a thin [`sys`] binding layer at the bottom, a lifecycle module ([`vm`])
//! every other component borrows a [`vm::VmShared`] from, and one module per
//! functional area above that — handles and roots ([`handle`]), value
//! marshalling ([`value`], with [`convert`] as its typed convenience layer),
//! type/member resolution ([`types`]), invocation ([`invoke`]), collections
//! ([`collections`]), host callbacks ([`callback`]), the exception bridge
//! ([`exception`]), and the event-loop driver ([`event_loop`]).
//!
//! Every fallible operation returns [`error::Result`]; `hl-embed-capi` maps
//! [`error::Error`] onto a stable C status code for callers on the other
//! side of the FFI boundary.

pub mod callback;
pub mod collections;
pub mod convert;
pub mod error;
pub mod event_loop;
pub mod exception;
pub mod handle;
pub mod invoke;
pub mod sys;
/// In-process fake VM backend used by this crate's own unit tests and by
/// the `tests/*.rs` integration binaries (via the `test-util` feature —
/// see its doc comment in `sys.rs` for why a feature is needed in addition
/// to `cfg(test)`). Not meant for use outside this workspace.
#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod testutil;
pub mod types;
pub mod value;
pub mod vm;

pub use callback::{CallbackRegistry, HostFn};
pub use convert::{FromVm, IntoVm};
pub use error::{Error, Result};
pub use event_loop::EventKind;
pub use handle::Handle;
pub use types::TypeDescriptor;
pub use vm::{VmConfig, VmInstance, VmShared};
