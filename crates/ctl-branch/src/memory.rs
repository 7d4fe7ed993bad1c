//! In-memory branch store for tests, the CLI and embedding.
//!
//! [`InMemoryBranchStore`] keeps branches in a `HashMap` keyed by ID plus a
//! parent-to-children index, both behind one `RwLock`, so every structural
//! check runs in the same critical section as the mutation it guards.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ctl_types::BranchId;
use serde::{Deserialize, Serialize};

use crate::error::{BranchError, BranchResult};
use crate::traits::BranchStore;
use crate::types::Branch;

#[derive(Debug, Default)]
struct TreeState {
    branches: HashMap<BranchId, Branch>,
    children: HashMap<BranchId, BTreeSet<BranchId>>,
    root: Option<BranchId>,
}

impl TreeState {
    fn sorted(&self, ids: impl Iterator<Item = BranchId>) -> Vec<Branch> {
        let mut out: Vec<Branch> = ids.filter_map(|id| self.branches.get(&id).cloned()).collect();
        out.sort_by_key(|b| (b.created_at, b.id));
        out
    }

    fn insert(&mut self, branch: &Branch) -> BranchResult<()> {
        match branch.parent_id {
            None => {
                if let Some(existing) = self.root {
                    return Err(BranchError::RootExists(existing));
                }
                self.root = Some(branch.id);
            }
            Some(parent) => {
                if !self.branches.contains_key(&parent) {
                    return Err(BranchError::BranchNotFound(parent));
                }
                let siblings = self.children.entry(parent).or_default();
                let collides = siblings
                    .iter()
                    .filter_map(|id| self.branches.get(id))
                    .any(|b| b.name == branch.name);
                if collides {
                    return Err(BranchError::DuplicateName {
                        parent,
                        name: branch.name.clone(),
                    });
                }
                siblings.insert(branch.id);
            }
        }
        self.branches.insert(branch.id, branch.clone());
        Ok(())
    }
}

/// Serializable dump of every branch record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSnapshot {
    pub branches: Vec<Branch>,
}

/// An in-memory implementation of [`BranchStore`].
#[derive(Debug, Default)]
pub struct InMemoryBranchStore {
    inner: RwLock<TreeState>,
}

impl InMemoryBranchStore {
    /// Create a new empty branch store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot.
    ///
    /// Parents are inserted before children; records that would leave the
    /// tree with no root, two roots, a dangling parent or a cycle are
    /// rejected as [`BranchError::CorruptTree`].
    pub fn from_snapshot(snapshot: BranchSnapshot) -> BranchResult<Self> {
        let mut pending: HashMap<BranchId, Branch> =
            snapshot.branches.into_iter().map(|b| (b.id, b)).collect();
        let mut state = TreeState::default();

        let roots: Vec<BranchId> = pending
            .values()
            .filter(|b| b.is_root())
            .map(|b| b.id)
            .collect();
        match roots.as_slice() {
            [] if pending.is_empty() => return Ok(Self::default()),
            [root] => {
                if let Some(branch) = pending.remove(root) {
                    state.insert(&branch)?;
                }
            }
            [] => return Err(BranchError::CorruptTree("no root branch".into())),
            _ => {
                return Err(BranchError::CorruptTree(format!(
                    "{} root branches",
                    roots.len()
                )))
            }
        }

        // Breadth-first from the root: anything never reached is dangling or
        // part of a cycle.
        let mut frontier = roots;
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for parent in frontier {
                let ready: Vec<BranchId> = pending
                    .values()
                    .filter(|b| b.parent_id == Some(parent))
                    .map(|b| b.id)
                    .collect();
                for id in ready {
                    if let Some(branch) = pending.remove(&id) {
                        state
                            .insert(&branch)
                            .map_err(|e| BranchError::CorruptTree(e.to_string()))?;
                        next.push(id);
                    }
                }
            }
            frontier = next;
        }

        if let Some(orphan) = pending.values().next() {
            return Err(BranchError::CorruptTree(format!(
                "branch {} ({}) is not reachable from the root",
                orphan.name, orphan.id
            )));
        }
        Ok(Self {
            inner: RwLock::new(state),
        })
    }

    /// Dump every branch, oldest first.
    pub fn snapshot(&self) -> BranchResult<BranchSnapshot> {
        Ok(BranchSnapshot {
            branches: self.list()?,
        })
    }

    fn read(&self) -> BranchResult<RwLockReadGuard<'_, TreeState>> {
        self.inner.read().map_err(|_| BranchError::LockPoisoned)
    }

    fn write(&self) -> BranchResult<RwLockWriteGuard<'_, TreeState>> {
        self.inner.write().map_err(|_| BranchError::LockPoisoned)
    }
}

impl BranchStore for InMemoryBranchStore {
    fn get(&self, id: &BranchId) -> BranchResult<Option<Branch>> {
        Ok(self.read()?.branches.get(id).cloned())
    }

    fn insert(&self, branch: &Branch) -> BranchResult<()> {
        self.write()?.insert(branch)
    }

    fn update(&self, id: &BranchId, edit: &mut dyn FnMut(&mut Branch)) -> BranchResult<Branch> {
        let mut state = self.write()?;
        let existing = state
            .branches
            .get_mut(id)
            .ok_or(BranchError::BranchNotFound(*id))?;
        let mut edited = existing.clone();
        edit(&mut edited);
        existing.description = edited.description;
        existing.is_pinned = edited.is_pinned;
        existing.tags = edited.tags;
        Ok(existing.clone())
    }

    fn remove(&self, id: &BranchId) -> BranchResult<Branch> {
        let mut state = self.write()?;
        let branch = state
            .branches
            .get(id)
            .ok_or(BranchError::BranchNotFound(*id))?;
        let children = state.children.get(id).map_or(0, BTreeSet::len);
        if children > 0 {
            return Err(BranchError::HasChildren {
                branch: *id,
                children,
            });
        }
        if branch.is_pinned {
            return Err(BranchError::BranchPinned(*id));
        }
        let parent = branch.parent_id;

        if let Some(parent) = parent {
            if let Some(siblings) = state.children.get_mut(&parent) {
                siblings.remove(id);
            }
        }
        if state.root == Some(*id) {
            state.root = None;
        }
        state.children.remove(id);
        state
            .branches
            .remove(id)
            .ok_or(BranchError::BranchNotFound(*id))
    }

    fn children(&self, id: &BranchId) -> BranchResult<Vec<Branch>> {
        let state = self.read()?;
        if !state.branches.contains_key(id) {
            return Err(BranchError::BranchNotFound(*id));
        }
        let ids = state.children.get(id).into_iter().flatten().copied();
        Ok(state.sorted(ids))
    }

    fn root(&self) -> BranchResult<Option<Branch>> {
        let state = self.read()?;
        Ok(state.root.and_then(|id| state.branches.get(&id).cloned()))
    }

    fn list(&self) -> BranchResult<Vec<Branch>> {
        let state = self.read()?;
        Ok(state.sorted(state.branches.keys().copied()))
    }
}
