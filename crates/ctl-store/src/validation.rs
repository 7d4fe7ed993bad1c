//! Bitemporal invariant checks for a single key's history.

use crate::records::{Version, VersionKey};

/// Result of validating one key's history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub key: Option<VersionKey>,
    pub version_count: u64,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns `true` if all checks passed.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific invariant violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub version_number: u64,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// The version belongs to a different entity or branch.
    KeyMismatch,
    /// Version numbers do not run 1, 2, 3, ...
    NumberingGap,
    /// A closed interval ends at or before its start.
    EmptyInterval,
    /// A gap or overlap between consecutive intervals.
    Discontinuity,
    /// Not exactly one open interval, or the open one is not the newest.
    OpenInterval,
}

/// Check that `versions` (any order) form a contiguous, non-overlapping
/// partition of time with exactly one open interval at the end.
pub fn validate_history(versions: &[Version]) -> ValidationReport {
    let mut sorted: Vec<&Version> = versions.iter().collect();
    sorted.sort_by_key(|v| v.version_number);

    let key = sorted.first().map(|v| v.key());
    let mut violations = Vec::new();

    for (index, version) in sorted.iter().enumerate() {
        let n = version.version_number;

        if let Some(key) = &key {
            if &version.key() != key {
                violations.push(Violation {
                    version_number: n,
                    kind: ViolationKind::KeyMismatch,
                    description: format!("belongs to {}, expected {key}", version.key()),
                });
            }
        }

        let expected = (index + 1) as u64;
        if n != expected {
            violations.push(Violation {
                version_number: n,
                kind: ViolationKind::NumberingGap,
                description: format!("expected version {expected}, found {n}"),
            });
        }

        if let Some(to) = version.valid_to {
            if to <= version.valid_from {
                violations.push(Violation {
                    version_number: n,
                    kind: ViolationKind::EmptyInterval,
                    description: format!("valid_to {to} is not after valid_from {}", version.valid_from),
                });
            }
        }

        match sorted.get(index + 1) {
            Some(successor) => match version.valid_to {
                Some(to) if to == successor.valid_from => {}
                Some(to) => violations.push(Violation {
                    version_number: n,
                    kind: ViolationKind::Discontinuity,
                    description: format!(
                        "valid_to {to} does not meet successor start {}",
                        successor.valid_from
                    ),
                }),
                None => violations.push(Violation {
                    version_number: n,
                    kind: ViolationKind::OpenInterval,
                    description: "open interval is not the newest version".into(),
                }),
            },
            None => {
                if version.valid_to.is_some() {
                    violations.push(Violation {
                        version_number: n,
                        kind: ViolationKind::OpenInterval,
                        description: "newest version is closed".into(),
                    });
                }
            }
        }
    }

    ValidationReport {
        key,
        version_count: sorted.len() as u64,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctl_types::{BranchId, EntityKey, Payload, Timestamp, VersionId};

    fn chain(bounds: &[(i64, Option<i64>)]) -> Vec<Version> {
        let branch = BranchId::new();
        bounds
            .iter()
            .enumerate()
            .map(|(i, (from, to))| Version {
                id: VersionId::new(),
                entity: EntityKey::new("event", "e1"),
                branch_id: branch,
                valid_from: Timestamp::from_millis(*from),
                valid_to: to.map(Timestamp::from_millis),
                payload: Payload::new(),
                version_number: (i + 1) as u64,
                comment: None,
                created_by: "gm".into(),
                created_at: Timestamp::from_millis(*from),
            })
            .collect()
    }

    #[test]
    fn empty_history_is_valid() {
        let report = validate_history(&[]);
        assert!(report.is_valid());
        assert_eq!(report.version_count, 0);
        assert!(report.key.is_none());
    }

    #[test]
    fn contiguous_chain_is_valid() {
        let versions = chain(&[(0, Some(10)), (10, Some(20)), (20, None)]);
        assert!(validate_history(&versions).is_valid());
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut versions = chain(&[(0, Some(10)), (10, None)]);
        versions.reverse();
        assert!(validate_history(&versions).is_valid());
    }

    #[test]
    fn gap_is_reported() {
        let versions = chain(&[(0, Some(10)), (12, None)]);
        let report = validate_history(&versions);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::Discontinuity);
        assert_eq!(report.violations[0].version_number, 1);
    }

    #[test]
    fn two_open_intervals_are_reported() {
        let versions = chain(&[(0, None), (10, None)]);
        let report = validate_history(&versions);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::OpenInterval));
    }

    #[test]
    fn closed_head_is_reported() {
        let versions = chain(&[(0, Some(10))]);
        let report = validate_history(&versions);
        assert_eq!(report.violations[0].kind, ViolationKind::OpenInterval);
    }

    #[test]
    fn empty_interval_is_reported() {
        let versions = chain(&[(10, Some(10)), (10, None)]);
        let report = validate_history(&versions);
        assert_eq!(report.violations[0].kind, ViolationKind::EmptyInterval);
    }

    #[test]
    fn numbering_gap_is_reported() {
        let mut versions = chain(&[(0, Some(10)), (10, None)]);
        versions[1].version_number = 3;
        let report = validate_history(&versions);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::NumberingGap));
    }

    #[test]
    fn mixed_keys_are_reported() {
        let mut versions = chain(&[(0, Some(10)), (10, None)]);
        versions[1].branch_id = BranchId::new();
        let report = validate_history(&versions);
        assert_eq!(report.violations[0].kind, ViolationKind::KeyMismatch);
    }
}
