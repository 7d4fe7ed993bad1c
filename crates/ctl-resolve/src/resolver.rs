use std::sync::Arc;

use ctl_branch::BranchTree;
use ctl_store::{Version, VersionKey, VersionStore};
use ctl_types::{BranchId, Clock, EntityKey, Payload, Timestamp, VersionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ResolveError, ResolveResult};

/// Read-only projection of an entity on a branch at an instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedState {
    #[serde(flatten)]
    pub entity: EntityKey,
    pub branch_id: BranchId,
    pub as_of: Timestamp,
    pub payload: Payload,
    /// The branch in the ancestry chain that actually supplied the data.
    pub source_branch_id: BranchId,
    pub source_version_id: VersionId,
    pub source_version_number: u64,
}

impl ResolvedState {
    /// Returns `true` if the data came from an ancestor, not the branch itself.
    pub fn is_inherited(&self) -> bool {
        self.source_branch_id != self.branch_id
    }
}

/// One step of an ancestry walk: ask `branch` for the version covering `at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupPoint {
    pub branch: BranchId,
    pub at: Timestamp,
}

/// Resolves effective entity state by walking branch ancestry.
#[derive(Clone)]
pub struct VersionResolver {
    tree: BranchTree,
    versions: Arc<dyn VersionStore>,
    clock: Arc<dyn Clock>,
}

impl VersionResolver {
    pub fn new(tree: BranchTree, versions: Arc<dyn VersionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tree,
            versions,
            clock,
        }
    }

    pub fn tree(&self) -> &BranchTree {
        &self.tree
    }

    /// The branches consulted for `branch` at `as_of`, closest first, each
    /// with the instant it is queried at.
    ///
    /// Branches that had not yet diverged at their query instant are left
    /// out; the root is always included.
    pub fn lookup_points(&self, branch: &BranchId, as_of: Timestamp) -> ResolveResult<Vec<LookupPoint>> {
        let chain = self.tree.ancestor_chain(branch)?;
        let mut points = Vec::with_capacity(chain.len());
        let mut at = as_of;
        for ancestor in chain {
            if ancestor.visible_at(at) {
                points.push(LookupPoint {
                    branch: ancestor.id,
                    at,
                });
            }
            // The parent is only visible up to the moment this branch forked.
            if let Some(diverged_at) = ancestor.diverged_at {
                at = at.min(diverged_at);
            }
        }
        Ok(points)
    }

    /// The version of `entity` effective on `branch` at `as_of`, or `None`
    /// if no branch in the chain has one.
    pub fn find_version(
        &self,
        entity: &EntityKey,
        branch: &BranchId,
        as_of: Timestamp,
    ) -> ResolveResult<Option<Version>> {
        for point in self.lookup_points(branch, as_of)? {
            let key = VersionKey::new(entity.clone(), point.branch);
            if let Some(version) = self.versions.version_at(&key, point.at)? {
                return Ok(Some(version));
            }
        }
        Ok(None)
    }

    /// Like [`find_version`](Self::find_version), but a miss is an error.
    pub fn resolve_version(
        &self,
        entity: &EntityKey,
        branch: &BranchId,
        as_of: Timestamp,
    ) -> ResolveResult<Version> {
        self.find_version(entity, branch, as_of)?
            .ok_or_else(|| ResolveError::EntityNeverExisted {
                entity: entity.clone(),
                branch: *branch,
                as_of,
            })
    }

    /// Effective state of `entity` on `branch` at `as_of` (default: now).
    pub fn resolve(
        &self,
        entity: &EntityKey,
        branch: &BranchId,
        as_of: Option<Timestamp>,
    ) -> ResolveResult<ResolvedState> {
        let as_of = as_of.unwrap_or_else(|| self.clock.now());
        let version = self.resolve_version(entity, branch, as_of)?;
        debug!(
            entity = %entity,
            branch = %branch,
            as_of = %as_of,
            source = %version.branch_id,
            version = version.version_number,
            "resolved entity"
        );
        Ok(ResolvedState {
            entity: entity.clone(),
            branch_id: *branch,
            as_of,
            source_branch_id: version.branch_id,
            source_version_id: version.id,
            source_version_number: version.version_number,
            payload: version.payload,
        })
    }
}

impl std::fmt::Debug for VersionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionResolver")
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}
