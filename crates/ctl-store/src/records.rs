use std::fmt;

use ctl_types::{BranchId, EntityKey, Payload, Timestamp, VersionId};
use serde::{Deserialize, Serialize};

/// The unit of history and of write serialization: one entity on one branch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub entity: EntityKey,
    pub branch: BranchId,
}

impl VersionKey {
    pub fn new(entity: EntityKey, branch: BranchId) -> Self {
        Self { entity, branch }
    }

    /// The same entity on another branch.
    pub fn on_branch(&self, branch: BranchId) -> Self {
        Self {
            entity: self.entity.clone(),
            branch,
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity, self.branch.short_id())
    }
}

/// An immutable, time-bounded snapshot of one entity's state on one branch.
///
/// Valid over the half-open interval `[valid_from, valid_to)`; `valid_to`
/// is `None` for the current version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    #[serde(flatten)]
    pub entity: EntityKey,
    pub branch_id: BranchId,
    pub valid_from: Timestamp,
    pub valid_to: Option<Timestamp>,
    pub payload: Payload,
    pub version_number: u64,
    pub comment: Option<String>,
    pub created_by: String,
    pub created_at: Timestamp,
}

impl Version {
    pub fn key(&self) -> VersionKey {
        VersionKey::new(self.entity.clone(), self.branch_id)
    }

    /// Returns `true` if this is the open (current) version.
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Returns `true` if `time` falls inside `[valid_from, valid_to)`.
    pub fn covers(&self, time: Timestamp) -> bool {
        self.valid_from <= time && self.valid_to.map_or(true, |to| time < to)
    }
}

/// A request to append a new version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewVersion {
    pub key: VersionKey,
    pub payload: Payload,
    pub comment: Option<String>,
    pub created_by: String,
    /// Start of validity; the store's clock is used when `None`.
    pub effective_from: Option<Timestamp>,
}

impl NewVersion {
    pub fn new(key: VersionKey, payload: Payload, created_by: impl Into<String>) -> Self {
        Self {
            key,
            payload,
            comment: None,
            created_by: created_by.into(),
            effective_from: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_optional_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn effective_from(mut self, at: Timestamp) -> Self {
        self.effective_from = Some(at);
        self
    }

    pub fn with_effective_from(mut self, at: Option<Timestamp>) -> Self {
        self.effective_from = at;
        self
    }
}

/// A precondition on another key's head, checked atomically with an append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadGuard {
    pub key: VersionKey,
    /// Expected head version number (`None` means "no versions yet").
    pub expected: Option<u64>,
}

/// Restart point for paging through history (newest first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCursor {
    /// Only versions with a number strictly below this are returned.
    pub before: u64,
}

/// One page of history, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub versions: Vec<Version>,
    /// Cursor for the next (older) page, `None` when exhausted.
    pub next: Option<HistoryCursor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(from: i64, to: Option<i64>) -> Version {
        Version {
            id: VersionId::new(),
            entity: EntityKey::new("settlement", "s1"),
            branch_id: BranchId::new(),
            valid_from: Timestamp::from_millis(from),
            valid_to: to.map(Timestamp::from_millis),
            payload: Payload::new(),
            version_number: 1,
            comment: None,
            created_by: "gm".into(),
            created_at: Timestamp::from_millis(from),
        }
    }

    #[test]
    fn covers_is_half_open() {
        let v = version(10, Some(20));
        assert!(!v.covers(Timestamp::from_millis(9)));
        assert!(v.covers(Timestamp::from_millis(10)));
        assert!(v.covers(Timestamp::from_millis(19)));
        assert!(!v.covers(Timestamp::from_millis(20)));
    }

    #[test]
    fn open_version_covers_the_future() {
        let v = version(10, None);
        assert!(v.is_current());
        assert!(v.covers(Timestamp::from_millis(i64::from(i32::MAX))));
    }

    #[test]
    fn persisted_shape_is_flat() {
        let v = version(10, None);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["entity_type"], "settlement");
        assert_eq!(json["entity_id"], "s1");
        assert!(json["valid_to"].is_null());
        let back: Version = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }
}
