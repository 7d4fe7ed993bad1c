use std::collections::BTreeSet;

use ctl_types::{BranchId, Timestamp};
use serde::{Deserialize, Serialize};

/// An isolated timeline forked from a parent at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` only for the root.
    pub parent_id: Option<BranchId>,
    /// Instant this branch's history starts to diverge from its parent.
    /// `None` only for the root.
    pub diverged_at: Option<Timestamp>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: Timestamp,
}

impl Branch {
    /// A root branch: no parent, no divergence point.
    pub fn root(name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: BranchId::new(),
            name: name.into(),
            description: None,
            parent_id: None,
            diverged_at: None,
            is_pinned: false,
            tags: BTreeSet::new(),
            created_at,
        }
    }

    /// A child of `parent` diverging at `diverged_at`.
    pub fn child(
        parent: BranchId,
        name: impl Into<String>,
        description: Option<String>,
        diverged_at: Timestamp,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: BranchId::new(),
            name: name.into(),
            description,
            parent_id: Some(parent),
            diverged_at: Some(diverged_at),
            is_pinned: false,
            tags: BTreeSet::new(),
            created_at,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Returns `true` if this branch can see its own writes at `time`.
    ///
    /// The root sees everything; a child only from its divergence point on.
    pub fn visible_at(&self, time: Timestamp) -> bool {
        self.diverged_at.map_or(true, |d| d <= time)
    }
}
