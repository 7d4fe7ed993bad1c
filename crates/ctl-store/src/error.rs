use ctl_types::{BranchId, Timestamp, VersionId};

use crate::records::VersionKey;

/// Errors from version store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// `effective_from` does not fall strictly after the open version's start.
    #[error("invalid time order on {key}: effective from {effective_from} is not after current version start {current_from}")]
    InvalidTimeOrder {
        key: VersionKey,
        effective_from: Timestamp,
        current_from: Timestamp,
    },

    /// A guarded head moved between read and write.
    #[error("concurrent modification of {key}: expected head {expected:?}, found {actual:?}")]
    ConcurrentModification {
        key: VersionKey,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// The branch was deleted; nothing more may be written to it.
    #[error("branch not found: {0}")]
    BranchNotFound(BranchId),

    /// The requested version does not exist.
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    /// Loaded data violates the bitemporal invariants.
    #[error("corrupt history for {key}: {reason}")]
    CorruptHistory { key: VersionKey, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock guarding the store was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
