//! JSON Patch (RFC 6902) application for rule-engine output.
//!
//! Only the operations the effect engine emits are supported: `add`,
//! `remove`, `replace` and `test`. Paths are JSON Pointers (RFC 6901).
//! A patch is applied all-or-nothing: the input payload is never modified
//! and any failing step discards the whole result.

use ctl_types::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::structurally_equal;
use crate::error::{PatchError, PatchResult};

/// A single JSON Patch step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Test { path: String, value: Value },
}

impl PatchOperation {
    /// The operation name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PatchOperation::Add { .. } => "add",
            PatchOperation::Remove { .. } => "remove",
            PatchOperation::Replace { .. } => "replace",
            PatchOperation::Test { .. } => "test",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Test { path, .. } => path,
        }
    }
}

/// Apply `ops` in order to a copy of `payload`.
pub fn apply_patch(payload: &Payload, ops: &[PatchOperation]) -> PatchResult<Payload> {
    let mut doc = payload.to_value();
    for op in ops {
        apply_one(&mut doc, op)?;
    }
    Payload::try_from(doc).map_err(|_| PatchError::RootReplacement { op: "patch" })
}

fn apply_one(doc: &mut Value, op: &PatchOperation) -> PatchResult<()> {
    let path = op.path();
    let tokens = parse_pointer(path)?;

    let Some((last, parents)) = tokens.split_last() else {
        return match op {
            PatchOperation::Test { value, .. } => check_equal(doc, value, path),
            _ => Err(PatchError::RootReplacement { op: op.name() }),
        };
    };

    match op {
        PatchOperation::Add { value, .. } => {
            match resolve_mut(doc, parents, path)? {
                Value::Object(map) => {
                    map.insert(last.clone(), value.clone());
                }
                Value::Array(items) => {
                    if last == "-" {
                        items.push(value.clone());
                    } else {
                        let index = parse_index(last)
                            .filter(|i| *i <= items.len())
                            .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;
                        items.insert(index, value.clone());
                    }
                }
                _ => return Err(PatchError::PathNotFound(path.to_string())),
            }
            Ok(())
        }
        PatchOperation::Remove { .. } => {
            let removed = match resolve_mut(doc, parents, path)? {
                Value::Object(map) => map.remove(last),
                Value::Array(items) => parse_index(last)
                    .filter(|i| *i < items.len())
                    .map(|i| items.remove(i)),
                _ => None,
            };
            removed
                .map(|_| ())
                .ok_or_else(|| PatchError::PathNotFound(path.to_string()))
        }
        PatchOperation::Replace { value, .. } => {
            let target = resolve_mut(doc, &tokens, path)?;
            *target = value.clone();
            Ok(())
        }
        PatchOperation::Test { value, .. } => {
            let target = resolve_mut(doc, &tokens, path)?;
            check_equal(target, value, path)
        }
    }
}

fn check_equal(actual: &Value, expected: &Value, path: &str) -> PatchResult<()> {
    if structurally_equal(actual, expected) {
        Ok(())
    } else {
        Err(PatchError::TestFailed {
            path: path.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn resolve_mut<'a>(doc: &'a mut Value, tokens: &[String], path: &str) -> PatchResult<&'a mut Value> {
    tokens
        .iter()
        .try_fold(doc, |target, token| match target {
            Value::Object(map) => map.get_mut(token),
            Value::Array(items) => parse_index(token).and_then(move |i| items.get_mut(i)),
            _ => None,
        })
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))
}

/// Split a JSON Pointer into unescaped reference tokens.
fn parse_pointer(pointer: &str) -> PatchResult<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(pointer.to_string()));
    };
    rest.split('/')
        .map(|raw| unescape_token(raw).ok_or_else(|| PatchError::InvalidPointer(pointer.to_string())))
        .collect()
}

fn unescape_token(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Array indices are decimal without leading zeros.
fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        Payload::try_from(value).unwrap()
    }

    fn ops(value: Value) -> Vec<PatchOperation> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn add_replace_remove_fields() {
        let base = payload(json!({"level": 2, "ruler": "Aldric"}));
        let patched = apply_patch(
            &base,
            &ops(json!([
                {"op": "add", "path": "/population", "value": 1500},
                {"op": "replace", "path": "/level", "value": 3},
                {"op": "remove", "path": "/ruler"}
            ])),
        )
        .unwrap();
        assert_eq!(patched, payload(json!({"level": 3, "population": 1500})));
    }

    #[test]
    fn nested_paths_and_array_append() {
        let base = payload(json!({"defenses": {"towers": ["north"]}}));
        let patched = apply_patch(
            &base,
            &ops(json!([
                {"op": "add", "path": "/defenses/towers/-", "value": "south"},
                {"op": "add", "path": "/defenses/towers/0", "value": "gate"},
                {"op": "replace", "path": "/defenses/towers/2", "value": "east"}
            ])),
        )
        .unwrap();
        assert_eq!(
            patched,
            payload(json!({"defenses": {"towers": ["gate", "north", "east"]}}))
        );
    }

    #[test]
    fn pointer_escapes_are_decoded() {
        let base = payload(json!({"a/b": 1, "m~n": 2}));
        let patched = apply_patch(
            &base,
            &ops(json!([
                {"op": "replace", "path": "/a~1b", "value": 10},
                {"op": "remove", "path": "/m~0n"}
            ])),
        )
        .unwrap();
        assert_eq!(patched, payload(json!({"a/b": 10})));
    }

    #[test]
    fn replace_missing_field_fails() {
        let err = apply_patch(
            &Payload::new(),
            &ops(json!([{"op": "replace", "path": "/level", "value": 1}])),
        )
        .unwrap_err();
        assert_eq!(err, PatchError::PathNotFound("/level".into()));
    }

    #[test]
    fn failed_test_discards_whole_patch() {
        let base = payload(json!({"level": 2}));
        let err = apply_patch(
            &base,
            &ops(json!([
                {"op": "replace", "path": "/level", "value": 3},
                {"op": "test", "path": "/level", "value": 4}
            ])),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::TestFailed { .. }));
        assert_eq!(base, payload(json!({"level": 2})));
    }

    #[test]
    fn test_uses_structural_equality() {
        let base = payload(json!({"level": 2}));
        let result = apply_patch(
            &base,
            &ops(json!([{"op": "test", "path": "/level", "value": 2.0}])),
        );
        assert_eq!(result.unwrap(), base);
    }

    #[test]
    fn root_replacement_is_rejected() {
        let err = apply_patch(
            &Payload::new(),
            &ops(json!([{"op": "replace", "path": "", "value": {}}])),
        )
        .unwrap_err();
        assert_eq!(err, PatchError::RootReplacement { op: "replace" });
    }

    #[test]
    fn invalid_pointers_are_rejected() {
        let err = apply_patch(
            &Payload::new(),
            &ops(json!([{"op": "add", "path": "level", "value": 1}])),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::InvalidPointer(_)));

        let err = apply_patch(
            &Payload::new(),
            &ops(json!([{"op": "add", "path": "/bad~2escape", "value": 1}])),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::InvalidPointer(_)));
    }

    #[test]
    fn array_index_bounds_are_checked() {
        let base = payload(json!({"list": [1]}));
        assert!(apply_patch(&base, &ops(json!([{"op": "add", "path": "/list/2", "value": 0}]))).is_err());
        assert!(apply_patch(&base, &ops(json!([{"op": "remove", "path": "/list/01"}]))).is_err());
        assert!(apply_patch(&base, &ops(json!([{"op": "add", "path": "/list/1", "value": 0}]))).is_ok());
    }

    #[test]
    fn operations_serialize_with_op_tag() {
        let op = PatchOperation::Remove { path: "/x".into() };
        assert_eq!(serde_json::to_value(&op).unwrap(), json!({"op": "remove", "path": "/x"}));
        assert_eq!(op.name(), "remove");
    }
}
