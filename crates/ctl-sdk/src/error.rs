use ctl_types::{BranchId, EntityKey, TypeError, VersionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtlError {
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    /// The version lives on a branch outside the target's ancestry chain.
    #[error("version {version} is not in the ancestry of branch {branch}")]
    VersionNotInAncestry { version: VersionId, branch: BranchId },

    /// The version belongs to a different entity than the one addressed.
    #[error("version {version} belongs to {found}, not {expected}")]
    EntityMismatch {
        version: VersionId,
        expected: EntityKey,
        found: EntityKey,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] TypeError),

    #[error("patch error: {0}")]
    Patch(#[from] ctl_diff::PatchError),

    #[error("store error: {0}")]
    Store(#[from] ctl_store::StoreError),

    #[error("branch error: {0}")]
    Branch(#[from] ctl_branch::BranchError),

    #[error("resolve error: {0}")]
    Resolve(#[from] ctl_resolve::ResolveError),

    #[error("merge error: {0}")]
    Merge(#[from] ctl_merge::MergeError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CtlResult<T> = Result<T, CtlError>;

impl From<serde_json::Error> for CtlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
