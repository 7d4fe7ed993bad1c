use ctl_branch::BranchError;
use ctl_resolve::ResolveError;
use ctl_store::StoreError;
use ctl_types::{BranchId, EntityKey};
use thiserror::Error;

/// Errors from merge operations. Conflicts are not errors; see
/// [`MergeResult`](crate::MergeResult).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// Source and target are the same branch.
    #[error("cannot merge branch {0} into itself")]
    SameBranch(BranchId),

    /// Neither the base nor either side has the entity.
    #[error("entity {entity} exists on neither {source_branch} nor {target_branch}")]
    EntityNeverExisted {
        entity: EntityKey,
        source_branch: BranchId,
        target_branch: BranchId,
    },

    /// Conflicting paths for which no resolution was supplied.
    #[error("unresolved conflicts: {}", .0.join(", "))]
    UnresolvedConflicts(Vec<String>),

    /// One of the branches kept moving while the merge was being computed.
    #[error("merge into {target} lost {attempts} compare-and-swap attempt(s)")]
    ConcurrentModification { target: BranchId, attempts: u32 },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
