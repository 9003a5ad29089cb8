//! The closed error taxonomy every other component reports through.
//!
//! Every fallible operation in this crate returns [`Result<T>`], whose error
//! side is this single enum. Keeping the set closed (rather than boxing
//! arbitrary errors, `anyhow`-style) matters here specifically because
//! `hl-embed-capi` maps each variant onto a stable integer status code that
//! crosses the FFI boundary: callers on the other side of that boundary
//! match on a C enum, so the Rust side must not grow new error shapes
//! without a matching ABI bump.

/// Crate-wide result alias; every public, fallible `hl-embed` operation
/// returns this.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed error taxonomy reported across the whole crate.
///
/// Each variant carries a short, human-readable diagnostic attached to every
/// failure; for [`Error::ExceptionThrown`] the Haxe-thrown message and
/// optional stack trace are carried separately in
/// [`crate::exception::ExceptionState`] rather than duplicated here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- Lifecycle ---
    #[error("vm handle is null")]
    NullVm,
    #[error("the HashLink runtime was already initialized in this process")]
    AlreadyInitialized,
    #[error("operation requires the VM to be initialized first")]
    NotInitialized,
    #[error("runtime initialization failed: {0}")]
    InitFailed(String),
    #[error("runtime teardown failed: {0}")]
    DestroyFailed(String),

    // --- Loading ---
    #[error("bytecode file not found: {0}")]
    FileNotFound(String),
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("module load failed: {0}")]
    ModuleLoadFailed(String),
    #[error("module global initialization failed: {0}")]
    ModuleInitFailed(String),

    // --- Dispatch ---
    #[error("module has no entry point, or it has not been invoked")]
    EntryPointMissing,
    #[error("type not found: {0}")]
    TypeNotFound(String),
    #[error("method not found: {class}.{method}")]
    MethodNotFound { class: String, method: String },
    #[error("field not found: {class}.{field}")]
    FieldNotFound { class: String, field: String },
    #[error("call failed: {0}")]
    CallFailed(String),
    #[error("argument arity mismatch: expected {expected}, got {actual}")]
    ArgumentArityMismatch { expected: usize, actual: usize },

    // --- Values ---
    #[error("invalid type: {0}")]
    InvalidType(String),
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("unexpected null value")]
    NullValue,

    // --- Exceptions ---
    /// A Haxe exception crossed the boundary. The message is duplicated here
    /// (as plain text) so `Display`/`Error::source` are useful even before a
    /// caller reaches for [`crate::exception::ExceptionState`].
    #[error("Haxe exception: {0}")]
    ExceptionThrown(String),

    // --- Reload ---
    #[error("this runtime build does not support hot reload")]
    ReloadNotSupported,
    #[error("hot reload was not enabled for this VM instance")]
    ReloadNotEnabled,
    #[error("reload failed: {0}")]
    ReloadFailed(String),

    // --- Events ---
    #[error("event loop step failed: {0}")]
    EventLoopFailed(String),

    // --- Generic ---
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// The stable tag name used by `hl-embed-capi` to pick a status code.
    /// Kept separate from `Display` (which is meant for humans, not
    /// `match`).
    pub fn tag(&self) -> &'static str {
        match self {
            Error::NullVm => "NullVm",
            Error::AlreadyInitialized => "AlreadyInitialized",
            Error::NotInitialized => "NotInitialized",
            Error::InitFailed(_) => "InitFailed",
            Error::DestroyFailed(_) => "DestroyFailed",
            Error::FileNotFound(_) => "FileNotFound",
            Error::InvalidBytecode(_) => "InvalidBytecode",
            Error::ModuleLoadFailed(_) => "ModuleLoadFailed",
            Error::ModuleInitFailed(_) => "ModuleInitFailed",
            Error::EntryPointMissing => "EntryPointMissing",
            Error::TypeNotFound(_) => "TypeNotFound",
            Error::MethodNotFound { .. } => "MethodNotFound",
            Error::FieldNotFound { .. } => "FieldNotFound",
            Error::CallFailed(_) => "CallFailed",
            Error::ArgumentArityMismatch { .. } => "ArgumentArityMismatch",
            Error::InvalidType(_) => "InvalidType",
            Error::TypeMismatch { .. } => "TypeMismatch",
            Error::NullValue => "NullValue",
            Error::ExceptionThrown(_) => "ExceptionThrown",
            Error::ReloadNotSupported => "ReloadNotSupported",
            Error::ReloadNotEnabled => "ReloadNotEnabled",
            Error::ReloadFailed(_) => "ReloadFailed",
            Error::EventLoopFailed(_) => "EventLoopFailed",
            Error::OutOfMemory => "OutOfMemory",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::NotImplemented(_) => "NotImplemented",
            Error::Unknown(_) => "Unknown",
        }
    }
}

/// Distinguishes a Haxe-thrown exception from every other kind of failure.
pub fn is_exception(err: &Error) -> bool {
    matches!(err, Error::ExceptionThrown(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_stable_and_distinct_per_variant() {
        let errs = [
            Error::NullVm,
            Error::AlreadyInitialized,
            Error::NotInitialized,
            Error::EntryPointMissing,
            Error::TypeNotFound("Foo".into()),
            Error::MethodNotFound { class: "Foo".into(), method: "bar".into() },
            Error::ExceptionThrown("boom".into()),
            Error::ReloadNotEnabled,
            Error::EventLoopFailed("boom".into()),
            Error::OutOfMemory,
        ];
        let tags: Vec<&str> = errs.iter().map(Error::tag).collect();
        let mut sorted = tags.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(tags.len(), sorted.len(), "tags must be unique per variant");
    }

    #[test]
    fn only_exception_thrown_is_an_exception() {
        assert!(is_exception(&Error::ExceptionThrown("boom".into())));
        assert!(!is_exception(&Error::NotInitialized));
        assert!(!is_exception(&Error::OutOfMemory));
    }

    #[test]
    fn display_carries_embedded_context() {
        let err = Error::MethodNotFound { class: "Game".into(), method: "explode".into() };
        assert_eq!(err.to_string(), "method not found: Game.explode");
    }
}
