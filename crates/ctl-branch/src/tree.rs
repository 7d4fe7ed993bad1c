//! Fork, ancestry and deletion over a [`BranchStore`].

use std::collections::HashSet;
use std::sync::Arc;

use ctl_store::VersionStore;
use ctl_types::{BranchId, Clock, Timestamp};
use tracing::{debug, info};

use crate::error::{BranchError, BranchResult};
use crate::memory::InMemoryBranchStore;
use crate::names::{validate_branch_name, validate_tag};
use crate::traits::BranchStore;
use crate::types::Branch;

/// The branch tree: a parent-pointer arena of [`Branch`] records plus the
/// version store that holds each branch's own writes.
///
/// The version store is only touched on [`BranchTree::delete`]; forking
/// never copies entity state.
#[derive(Clone)]
pub struct BranchTree {
    branches: Arc<dyn BranchStore>,
    versions: Arc<dyn VersionStore>,
    clock: Arc<dyn Clock>,
}

impl BranchTree {
    pub fn new(
        branches: Arc<dyn BranchStore>,
        versions: Arc<dyn VersionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            branches,
            versions,
            clock,
        }
    }

    /// A tree backed by a fresh [`InMemoryBranchStore`].
    pub fn in_memory(versions: Arc<dyn VersionStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(InMemoryBranchStore::new()), versions, clock)
    }

    /// Create the single root branch.
    pub fn init_root(&self, name: &str) -> BranchResult<Branch> {
        validate_branch_name(name)?;
        let root = Branch::root(name, self.clock.now());
        self.branches.insert(&root)?;
        debug!(branch = %root.id, name, "created root branch");
        Ok(root)
    }

    /// The root branch. Fails with [`BranchError::NoRoot`] before
    /// [`init_root`](Self::init_root).
    pub fn root(&self) -> BranchResult<Branch> {
        self.branches.root()?.ok_or(BranchError::NoRoot)
    }

    pub fn get(&self, id: &BranchId) -> BranchResult<Branch> {
        self.branches
            .get(id)?
            .ok_or(BranchError::BranchNotFound(*id))
    }

    /// Every branch named `name`; names are only unique among siblings.
    pub fn find_by_name(&self, name: &str) -> BranchResult<Vec<Branch>> {
        self.branches.find_by_name(name)
    }

    pub fn children(&self, id: &BranchId) -> BranchResult<Vec<Branch>> {
        self.branches.children(id)
    }

    pub fn list(&self) -> BranchResult<Vec<Branch>> {
        self.branches.list()
    }

    /// Fork `parent`, diverging now.
    pub fn fork(
        &self,
        parent: &BranchId,
        name: &str,
        description: Option<String>,
    ) -> BranchResult<Branch> {
        self.fork_at(parent, name, description, self.clock.now())
    }

    /// Fork `parent`, diverging at an explicit world time.
    ///
    /// `diverged_at` may not precede the parent's own divergence point:
    /// the child could never see history its parent cannot see.
    pub fn fork_at(
        &self,
        parent: &BranchId,
        name: &str,
        description: Option<String>,
        diverged_at: Timestamp,
    ) -> BranchResult<Branch> {
        validate_branch_name(name)?;
        let parent_branch = self.get(parent)?;
        if let Some(parent_diverged_at) = parent_branch.diverged_at {
            if diverged_at < parent_diverged_at {
                return Err(BranchError::InvalidForkTime {
                    parent: *parent,
                    diverged_at,
                    parent_diverged_at,
                });
            }
        }

        let child = Branch::child(*parent, name, description, diverged_at, self.clock.now());
        self.branches.insert(&child)?;
        debug!(
            branch = %child.id,
            parent = %parent,
            name,
            diverged_at = %diverged_at,
            "forked branch"
        );
        Ok(child)
    }

    /// `id` followed by its parent, grandparent, ... up to the root.
    pub fn ancestor_chain(&self, id: &BranchId) -> BranchResult<Vec<Branch>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(*id);
        while let Some(current) = next {
            if !seen.insert(current) {
                return Err(BranchError::CorruptTree(format!(
                    "cycle through branch {current}"
                )));
            }
            let branch = self.get(&current)?;
            next = branch.parent_id;
            chain.push(branch);
        }
        Ok(chain)
    }

    /// Lowest common ancestor of `a` and `b` (either may be the answer).
    pub fn common_ancestor(&self, a: &BranchId, b: &BranchId) -> BranchResult<Branch> {
        let ancestors_a: HashSet<BranchId> = self
            .ancestor_chain(a)?
            .into_iter()
            .map(|branch| branch.id)
            .collect();

        // The first of b's ancestors that a also has is the lowest one.
        self.ancestor_chain(b)?
            .into_iter()
            .find(|branch| ancestors_a.contains(&branch.id))
            .ok_or_else(|| {
                BranchError::CorruptTree(format!("branches {a} and {b} share no root"))
            })
    }

    /// Delete an unpinned leaf branch and every version written on it.
    ///
    /// Ancestor and sibling data are untouched.
    pub fn delete(&self, id: &BranchId) -> BranchResult<Branch> {
        let branch = self.get(id)?;
        if branch.is_root() {
            return Err(BranchError::RootProtected(*id));
        }
        let removed = self.branches.remove(id)?;
        let versions = self.versions.remove_branch(id)?;
        info!(branch = %id, name = %removed.name, versions, "deleted branch");
        Ok(removed)
    }

    pub fn set_pinned(&self, id: &BranchId, pinned: bool) -> BranchResult<Branch> {
        self.branches.update(id, &mut |branch| branch.is_pinned = pinned)
    }

    pub fn set_description(&self, id: &BranchId, description: Option<String>) -> BranchResult<Branch> {
        self.branches
            .update(id, &mut |branch| branch.description = description.clone())
    }

    pub fn add_tag(&self, id: &BranchId, tag: &str) -> BranchResult<Branch> {
        validate_tag(tag)?;
        self.branches.update(id, &mut |branch| {
            branch.tags.insert(tag.to_string());
        })
    }

    /// Remove `tag`; absent tags are ignored.
    pub fn remove_tag(&self, id: &BranchId, tag: &str) -> BranchResult<Branch> {
        self.branches.update(id, &mut |branch| {
            branch.tags.remove(tag);
        })
    }
}

impl std::fmt::Debug for BranchTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchTree").finish_non_exhaustive()
    }
}
