//! Field-level three-way merge of payloads.

use ctl_diff::{diff, structurally_equal, Diff, FieldOutcome};
use ctl_types::Payload;

use crate::types::ConflictField;

/// Result of merging two descendants of a common base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreeWay {
    /// Base with every non-conflicting change of both sides applied.
    pub merged: Payload,
    pub conflicts: Vec<ConflictField>,
    pub source_changes: Diff,
    pub target_changes: Diff,
}

/// Merge `source` and `target`, both derived from `base`.
///
/// For every top-level field touched by either side: a change made on one
/// side only is taken; the same change on both sides is taken once;
/// different changes (including modify versus remove) are a conflict.
/// Equality is structural, so `2` and `2.0` agree.
pub fn three_way(base: &Payload, source: &Payload, target: &Payload) -> ThreeWay {
    let source_changes = diff(base, source);
    let target_changes = diff(base, target);

    let mut merged = base.clone();
    let mut conflicts = Vec::new();

    let paths = source_changes.paths().union(&target_changes.paths()).copied().collect::<Vec<_>>();
    for path in paths {
        let outcome = match (source_changes.outcome(path), target_changes.outcome(path)) {
            (Some(one), None) | (None, Some(one)) => one,
            (Some(s), Some(t)) if same_outcome(s, t) => s,
            (Some(s), Some(t)) => {
                conflicts.push(ConflictField {
                    path: path.to_string(),
                    base_value: base.get(path).cloned(),
                    source_value: set_value(s),
                    target_value: set_value(t),
                });
                continue;
            }
            (None, None) => continue,
        };
        match outcome {
            FieldOutcome::Set(value) => {
                merged.insert(path, value.clone());
            }
            FieldOutcome::Removed => {
                merged.remove(path);
            }
        }
    }

    ThreeWay {
        merged,
        conflicts,
        source_changes,
        target_changes,
    }
}

fn same_outcome(a: FieldOutcome<'_>, b: FieldOutcome<'_>) -> bool {
    match (a, b) {
        (FieldOutcome::Set(x), FieldOutcome::Set(y)) => structurally_equal(x, y),
        (FieldOutcome::Removed, FieldOutcome::Removed) => true,
        _ => false,
    }
}

fn set_value(outcome: FieldOutcome<'_>) -> Option<serde_json::Value> {
    match outcome {
        FieldOutcome::Set(value) => Some(value.clone()),
        FieldOutcome::Removed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(value: serde_json::Value) -> Payload {
        Payload::try_from(value).unwrap()
    }

    #[test]
    fn disjoint_changes_union() {
        let base = p(json!({"level": 2, "name": "Riverford"}));
        let source = p(json!({"level": 3, "name": "Riverford"}));
        let target = p(json!({"level": 2, "name": "Riverford", "population": 1500}));

        let out = three_way(&base, &source, &target);
        assert!(out.conflicts.is_empty());
        assert_eq!(
            out.merged,
            p(json!({"level": 3, "name": "Riverford", "population": 1500}))
        );
    }

    #[test]
    fn identical_changes_apply_once() {
        let base = p(json!({"level": 2}));
        let side = p(json!({"level": 3, "ruler": "Ysolde"}));
        let out = three_way(&base, &side, &side);
        assert!(out.conflicts.is_empty());
        assert_eq!(out.merged, side);
    }

    #[test]
    fn numerically_equal_changes_agree() {
        let base = p(json!({"level": 1}));
        let out = three_way(&base, &p(json!({"level": 2})), &p(json!({"level": 2.0})));
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn divergent_changes_conflict() {
        let base = p(json!({"level": 2, "walls": "wood"}));
        let source = p(json!({"level": 3, "walls": "stone"}));
        let target = p(json!({"level": 4, "walls": "wood"}));

        let out = three_way(&base, &source, &target);
        assert_eq!(
            out.conflicts,
            vec![ConflictField {
                path: "level".into(),
                base_value: Some(json!(2)),
                source_value: Some(json!(3)),
                target_value: Some(json!(4)),
            }]
        );
        // The non-conflicting change is still reflected in the partial merge.
        assert_eq!(out.merged.get("walls"), Some(&json!("stone")));
    }

    #[test]
    fn removal_on_one_side_applies() {
        let base = p(json!({"level": 2, "curse": true}));
        let source = p(json!({"level": 2}));
        let out = three_way(&base, &source, &base);
        assert!(out.conflicts.is_empty());
        assert_eq!(out.merged, p(json!({"level": 2})));
    }

    #[test]
    fn modify_versus_remove_conflicts() {
        let base = p(json!({"curse": true}));
        let source = p(json!({}));
        let target = p(json!({"curse": false}));
        let out = three_way(&base, &source, &target);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].source_value, None);
        assert_eq!(out.conflicts[0].target_value, Some(json!(false)));
    }

    #[test]
    fn both_add_different_values_conflict_with_absent_base() {
        let base = Payload::new();
        let out = three_way(&base, &p(json!({"ruler": "A"})), &p(json!({"ruler": "B"})));
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].base_value, None);
    }

    #[test]
    fn nested_objects_compare_whole() {
        let base = p(json!({"stats": {"str": 10, "dex": 12}}));
        let source = p(json!({"stats": {"str": 11, "dex": 12}}));
        let target = p(json!({"stats": {"str": 10, "dex": 13}}));
        let out = three_way(&base, &source, &target);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].path, "stats");
    }
}
