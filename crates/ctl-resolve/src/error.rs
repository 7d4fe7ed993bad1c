use ctl_branch::BranchError;
use ctl_store::StoreError;
use ctl_types::{BranchId, EntityKey, Timestamp};
use thiserror::Error;

/// Errors from state resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No branch in the ancestry chain has a version covering the instant.
    #[error("entity {entity} does not exist on branch {branch} as of {as_of}")]
    EntityNeverExisted {
        entity: EntityKey,
        branch: BranchId,
        as_of: Timestamp,
    },

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ResolveResult<T> = Result<T, ResolveError>;
