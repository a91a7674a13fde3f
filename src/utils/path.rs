//! Dotted-path access into loose YAML trees
//!
//! `get_path(value, "targets.hosts.web-1.port")` walks nested mappings one
//! segment at a time. Setters create intermediate mappings as needed.

use serde_yaml::{Mapping, Value};

/// Look up a dotted path, returning `None` when any segment is missing
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_mapping()?.get(Value::from(segment))?;
    }
    Some(current)
}

/// Set a value at a dotted path, creating intermediate mappings.
///
/// Returns false when an intermediate segment exists but is not a mapping.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = root;
    for segment in parents {
        if !current.is_mapping() {
            return false;
        }
        let map = current.as_mapping_mut().expect("checked is_mapping");
        let key = Value::from(*segment);
        if !map.contains_key(&key) {
            map.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        current = map.get_mut(&key).expect("just inserted");
    }

    match current.as_mapping_mut() {
        Some(map) => {
            map.insert(Value::from(*last), value);
            true
        }
        None => false,
    }
}

/// Remove the value at a dotted path, returning the removed value
pub fn remove_path(root: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments.split_last()?;

    let mut current = root;
    for segment in parents {
        current = current.as_mapping_mut()?.get_mut(Value::from(*segment))?;
    }
    current.as_mapping_mut()?.remove(Value::from(*last))
}
