//! Error types for the diff crate.

/// Errors that can occur while applying a patch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// The pointer is not a valid JSON Pointer (RFC 6901).
    #[error("invalid JSON pointer: {0:?}")]
    InvalidPointer(String),

    /// The pointer does not resolve to an existing location.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// A `test` operation found a different value.
    #[error("test failed at {path}: expected {expected}, found {actual}")]
    TestFailed {
        path: String,
        expected: String,
        actual: String,
    },

    /// The operation would replace or remove the whole payload.
    #[error("operation {op} may not target the payload root")]
    RootReplacement { op: &'static str },
}

/// Convenience alias for patch results.
pub type PatchResult<T> = Result<T, PatchError>;
