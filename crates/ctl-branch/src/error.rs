//! Error types for branch operations.

use ctl_store::StoreError;
use ctl_types::{BranchId, Timestamp};
use thiserror::Error;

/// Errors that can occur during branch operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BranchError {
    /// The branch does not exist.
    #[error("branch not found: {0}")]
    BranchNotFound(BranchId),

    /// A sibling under the same parent already uses this name.
    #[error("branch name already used under parent {parent}: {name}")]
    DuplicateName { parent: BranchId, name: String },

    /// Only leaf branches may be deleted.
    #[error("branch {branch} has {children} child branch(es)")]
    HasChildren { branch: BranchId, children: usize },

    /// Pinned branches are protected from deletion.
    #[error("branch is pinned: {0}")]
    BranchPinned(BranchId),

    /// The root branch cannot be deleted.
    #[error("cannot delete the root branch: {0}")]
    RootProtected(BranchId),

    /// A root branch already exists.
    #[error("root branch already exists: {0}")]
    RootExists(BranchId),

    /// No root branch has been created yet.
    #[error("branch tree has no root")]
    NoRoot,

    /// The branch name is invalid.
    #[error("invalid branch name: {name}: {reason}")]
    InvalidBranchName { name: String, reason: String },

    /// The tag is invalid.
    #[error("invalid tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    /// A fork cannot diverge before its parent did.
    #[error("branch {parent} diverged at {parent_diverged_at}; cannot fork it at {diverged_at}")]
    InvalidForkTime {
        parent: BranchId,
        diverged_at: Timestamp,
        parent_diverged_at: Timestamp,
    },

    /// Loaded branch records do not form a single-rooted tree.
    #[error("corrupt branch tree: {0}")]
    CorruptTree(String),

    /// The version store failed while removing a branch's versions.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A lock guarding the branch store was poisoned.
    #[error("branch store lock poisoned")]
    LockPoisoned,
}

/// Convenience type alias for branch operations.
pub type BranchResult<T> = std::result::Result<T, BranchError>;
