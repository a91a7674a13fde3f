//! Deep merge over loose YAML trees
//!
//! Two merge flavors are used by the crate. Configuration layers use
//! [`deep_merge`], where arrays replace wholesale unless the overlay opts
//! into concatenation with a `$merge` marker, and `$unset` deletes a key.
//! Target default layering uses [`deep_merge_concat`], where arrays always
//! concatenate and explicit nulls win over inherited defaults.

use serde_yaml::{Mapping, Value};

/// Overlay string value that removes the key from the merged result
pub const UNSET_MARKER: &str = "$unset";

/// First array element that switches array replacement to concatenation
pub const MERGE_MARKER: &str = "$merge";

/// Merge `overlay` onto `base`, overlay winning on scalar conflict.
///
/// Nested mappings merge key-by-key. Arrays replace the base array unless
/// the overlay array's first element is the literal `"$merge"`, in which
/// case the remaining elements are appended to the base array. An overlay
/// value equal to the literal string `"$unset"` removes the key entirely.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                if is_unset(value) {
                    merged.remove(key);
                    continue;
                }
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => strip_markers(value),
                };
                merged.insert(key.clone(), next);
            }
            Value::Mapping(merged)
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            if has_merge_marker(overlay_seq) {
                let mut merged = base_seq.clone();
                merged.extend(overlay_seq.iter().skip(1).cloned());
                Value::Sequence(merged)
            } else {
                overlay.clone()
            }
        }
        _ => strip_markers(overlay),
    }
}

/// Merge `overlay` onto `base` with array concatenation.
///
/// Used for target config layering: nested mappings merge key-by-key,
/// arrays concatenate (base first), and any overlay value, including an
/// explicit null, wins over the base.
pub fn deep_merge_concat(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge_concat(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Mapping(merged)
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            let mut merged = base_seq.clone();
            merged.extend(overlay_seq.iter().cloned());
            Value::Sequence(merged)
        }
        // Explicit overlay null is a value, not an absence
        _ => overlay.clone(),
    }
}

/// Merge `overlay` onto `base` without interpreting markers.
///
/// For subtrees that are stored now and applied later, such as profile
/// bodies: `$unset` and `$merge` survive verbatim so they take effect when
/// the stored layer is finally applied.
pub fn deep_merge_verbatim(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge_verbatim(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Mapping(merged)
        }
        _ => overlay.clone(),
    }
}

fn is_unset(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == UNSET_MARKER)
}

fn has_merge_marker(seq: &[Value]) -> bool {
    matches!(seq.first(), Some(Value::String(s)) if s == MERGE_MARKER)
}

/// Drop merge markers from an overlay subtree that has no base counterpart
fn strip_markers(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut out = Mapping::new();
            for (key, val) in map {
                if is_unset(val) {
                    continue;
                }
                out.insert(key.clone(), strip_markers(val));
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) if has_merge_marker(seq) => {
            Value::Sequence(seq.iter().skip(1).cloned().collect())
        }
        _ => value.clone(),
    }
}
