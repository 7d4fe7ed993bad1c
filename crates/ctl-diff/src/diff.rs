//! Field-level diff between two entity payloads.
//!
//! Top-level keys are compared with deep structural equality. Whole values
//! are reported for every change; when a modified field holds an object on
//! both sides, a one-level nested [`Diff`] of that object is attached so the
//! UI can render structure without re-diffing.

use std::collections::{BTreeMap, BTreeSet};

use ctl_types::Payload;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The result of comparing two payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// Fields present only in the second payload.
    pub added: BTreeMap<String, Value>,
    /// Fields present in both payloads with structurally different values.
    pub modified: BTreeMap<String, FieldChange>,
    /// Fields present only in the first payload.
    pub removed: BTreeMap<String, Value>,
}

/// Old and new value of a modified field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
    /// Structure-preserving detail when both values are objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<Diff>>,
}

/// What one side of a comparison did to a single field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOutcome<'a> {
    /// The field now holds this value (added or modified).
    Set(&'a Value),
    /// The field was removed.
    Removed,
}

impl Diff {
    /// Create an empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the two payloads were structurally equal.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total number of changed fields.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Every field touched by this diff, in sorted order.
    pub fn paths(&self) -> BTreeSet<&str> {
        self.added
            .keys()
            .chain(self.modified.keys())
            .chain(self.removed.keys())
            .map(String::as_str)
            .collect()
    }

    /// What happened to `path`, or `None` if it is untouched.
    pub fn outcome(&self, path: &str) -> Option<FieldOutcome<'_>> {
        if let Some(value) = self.added.get(path) {
            return Some(FieldOutcome::Set(value));
        }
        if let Some(change) = self.modified.get(path) {
            return Some(FieldOutcome::Set(&change.new));
        }
        if self.removed.contains_key(path) {
            return Some(FieldOutcome::Removed);
        }
        None
    }
}

/// Compute the diff from `old` to `new`.
///
/// Keys present only in `new` are added, keys present only in `old` are
/// removed, and keys present in both with structurally unequal values are
/// modified. A key explicitly set to `null` is present.
pub fn diff(old: &Payload, new: &Payload) -> Diff {
    diff_maps(old.as_map(), new.as_map(), true)
}

fn diff_maps(old: &Map<String, Value>, new: &Map<String, Value>, nest: bool) -> Diff {
    let mut result = Diff::new();

    for (key, old_val) in old {
        match new.get(key) {
            Some(new_val) => {
                if !structurally_equal(old_val, new_val) {
                    let nested = match (old_val, new_val) {
                        (Value::Object(a), Value::Object(b)) if nest => {
                            Some(Box::new(diff_maps(a, b, false)))
                        }
                        _ => None,
                    };
                    result.modified.insert(
                        key.clone(),
                        FieldChange {
                            old: old_val.clone(),
                            new: new_val.clone(),
                            nested,
                        },
                    );
                }
            }
            None => {
                result.removed.insert(key.clone(), old_val.clone());
            }
        }
    }

    for (key, new_val) in new {
        if !old.contains_key(key) {
            result.added.insert(key.clone(), new_val.clone());
        }
    }

    result
}

/// Deep structural equality.
///
/// Numbers compare by numeric value, so `2` and `2.0` are equal; arrays
/// compare element-wise and objects key-by-key.
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x == y
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| structurally_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| structurally_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Apply `diff` on top of `base`, producing the resulting payload.
///
/// Removals of absent fields are ignored, so a diff computed against one
/// payload can be replayed onto another that shares its untouched fields.
pub fn apply_diff(base: &Payload, diff: &Diff) -> Payload {
    let mut out = base.clone();
    for key in diff.removed.keys() {
        out.remove(key);
    }
    for (key, change) in &diff.modified {
        out.insert(key.clone(), change.new.clone());
    }
    for (key, value) in &diff.added {
        out.insert(key.clone(), value.clone());
    }
    out
}
