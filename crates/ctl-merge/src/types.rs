use ctl_diff::Diff;
use ctl_store::Version;
use ctl_types::{BranchId, EntityKey, Payload, Timestamp, VersionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which fork point of the common ancestor supplies the merge base.
///
/// When source and target sit on different subtrees of their lowest common
/// ancestor, each side left it at its own fork time. The base is the
/// ancestor's state at one of those instants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeBasePolicy {
    /// The later of the two fork points.
    #[default]
    LatestFork,
    /// The earlier of the two fork points.
    EarliestFork,
}

impl MergeBasePolicy {
    pub(crate) fn pick(self, a: Timestamp, b: Timestamp) -> Timestamp {
        match self {
            Self::LatestFork => a.max(b),
            Self::EarliestFork => a.min(b),
        }
    }
}

/// One entity merged from `source` into `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeRequest {
    pub source: BranchId,
    pub target: BranchId,
    pub entity: EntityKey,
    /// Instant at which both sides are read; defaults to now.
    pub as_of: Option<Timestamp>,
    /// Defaults to `"Merged from branch <source name>"`.
    pub comment: Option<String>,
    pub created_by: String,
    /// Start of validity of the merged version; defaults to now.
    pub effective_from: Option<Timestamp>,
}

impl MergeRequest {
    pub fn new(
        source: BranchId,
        target: BranchId,
        entity: EntityKey,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            entity,
            as_of: None,
            comment: None,
            created_by: created_by.into(),
            effective_from: None,
        }
    }

    pub fn as_of(mut self, at: Timestamp) -> Self {
        self.as_of = Some(at);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn effective_from(mut self, at: Timestamp) -> Self {
        self.effective_from = Some(at);
        self
    }
}

/// A field both sides changed, to different values.
///
/// `None` means the field is absent on that side (never set, or removed).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictField {
    pub path: String,
    pub base_value: Option<Value>,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
}

/// Outcome of a merge attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MergeResult {
    /// The merged version appended on the target branch.
    Merged(Version),
    /// Nothing was written.
    Conflicted(Vec<ConflictField>),
}

impl MergeResult {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }

    pub fn conflicts(&self) -> &[ConflictField] {
        match self {
            Self::Merged(_) => &[],
            Self::Conflicted(conflicts) => conflicts,
        }
    }
}

/// One of the three states taking part in a merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSide {
    pub branch_id: BranchId,
    pub as_of: Timestamp,
    /// The version supplying `payload`, `None` when the entity is absent.
    pub version_id: Option<VersionId>,
    pub version_number: Option<u64>,
    pub payload: Payload,
}

impl MergeSide {
    pub fn exists(&self) -> bool {
        self.version_id.is_some()
    }
}

/// Everything a merge would do, computed without side effects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePreview {
    pub entity: EntityKey,
    pub base: MergeSide,
    pub source: MergeSide,
    pub target: MergeSide,
    pub source_changes: Diff,
    pub target_changes: Diff,
    /// The payload that would be appended, `None` when there are conflicts.
    pub merged: Option<Payload>,
    pub conflicts: Vec<ConflictField>,
}

impl MergePreview {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Paths a caller must supply resolutions for.
    pub fn conflict_paths(&self) -> Vec<&str> {
        self.conflicts.iter().map(|c| c.path.as_str()).collect()
    }
}
