//! The [`BranchStore`] trait defining the branch storage interface.

use ctl_types::BranchId;

use crate::error::BranchResult;
use crate::types::Branch;

/// Storage backend for branch records.
///
/// The store owns the tree's structural invariants, and checks them in the
/// same critical section as the mutation:
///
/// - exactly one root (`parent_id == None`)
/// - every parent referenced by a branch exists
/// - names are unique among siblings
/// - only unpinned leaves are removed
pub trait BranchStore: Send + Sync {
    /// Read a branch by ID. Returns `Ok(None)` if it does not exist.
    fn get(&self, id: &BranchId) -> BranchResult<Option<Branch>>;

    /// Insert a new branch.
    ///
    /// Fails with `RootExists` for a second root, `BranchNotFound` for an
    /// unknown parent and `DuplicateName` for a sibling name collision.
    fn insert(&self, branch: &Branch) -> BranchResult<()>;

    /// Apply `edit` to a branch under the store's write lock and return the
    /// result. Only the description, pin and tags are kept from the edit;
    /// structural fields (name, parent, divergence) never change.
    fn update(&self, id: &BranchId, edit: &mut dyn FnMut(&mut Branch)) -> BranchResult<Branch>;

    /// Remove an unpinned leaf. Fails with `HasChildren` or `BranchPinned`.
    fn remove(&self, id: &BranchId) -> BranchResult<Branch>;

    /// Direct children of `id`, oldest first.
    fn children(&self, id: &BranchId) -> BranchResult<Vec<Branch>>;

    /// The root branch, if the tree has been initialised.
    fn root(&self) -> BranchResult<Option<Branch>>;

    /// All branches, oldest first.
    fn list(&self) -> BranchResult<Vec<Branch>>;

    /// Every branch named `name`, oldest first.
    fn find_by_name(&self, name: &str) -> BranchResult<Vec<Branch>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|b| b.name == name)
            .collect())
    }
}
