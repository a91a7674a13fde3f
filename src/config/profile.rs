//! Profile inheritance resolution
//!
//! Profiles are partial configurations that may extend one another. The
//! chain is walked with an explicit visited set; a revisit is the cycle
//! signal. A cycle is never fatal: the layers accumulated before it was
//! detected still apply.

use serde_yaml::Value;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::utils::get_path;

/// Resolve the overlay layers for a profile, ordered base first.
///
/// Each returned layer is the profile body with its `extends` key removed,
/// ready to be deep-merged onto the configuration in order (derived layers
/// override base layers).
pub fn resolve_profile_chain(profiles: &Value, name: &str) -> ConfigResult<Vec<Value>> {
    let Some(profiles_map) = profiles.as_mapping() else {
        return Err(ConfigError::ProfileNotFound(name.to_string()));
    };
    if !profiles_map.contains_key(Value::from(name)) {
        return Err(ConfigError::ProfileNotFound(name.to_string()));
    }

    let mut chain: Vec<Value> = Vec::new();
    let mut visited: Vec<String> = Vec::new();
    let mut current = name.to_string();

    loop {
        if visited.iter().any(|seen| seen == &current) {
            visited.push(current);
            warn!(
                chain = %visited.join(" -> "),
                "Circular profile inheritance; applying layers gathered so far"
            );
            break;
        }
        visited.push(current.clone());

        let Some(body) = get_path(profiles, &current) else {
            // A dangling extends target ends the chain
            warn!(profile = %current, "Profile extends an undefined profile");
            break;
        };

        // Derived layers are collected first and reversed at the end
        chain.push(strip_extends(body));

        match extends_of(body) {
            Some(parent) => current = parent,
            None => break,
        }
    }

    chain.reverse();
    Ok(chain)
}

fn extends_of(body: &Value) -> Option<String> {
    body.as_mapping()?
        .get(Value::from("extends"))?
        .as_str()
        .map(str::to_string)
}

fn strip_extends(body: &Value) -> Value {
    match body {
        Value::Mapping(map) => {
            let mut out = map.clone();
            out.remove(Value::from("extends"));
            Value::Mapping(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_single_profile() {
        let profiles = yaml("{prod: {vars: {env: production}}}");
        let chain = resolve_profile_chain(&profiles, "prod").unwrap();
        assert_eq!(chain, vec![yaml("{vars: {env: production}}")]);
    }

    #[test]
    fn test_extends_orders_base_first() {
        let profiles = yaml(
            "{base: {vars: {debug: true}}, prod: {extends: base, vars: {env: production}}}",
        );
        let chain = resolve_profile_chain(&profiles, "prod").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0], yaml("{vars: {debug: true}}"));
        assert_eq!(chain[1], yaml("{vars: {env: production}}"));
    }

    #[test]
    fn test_three_level_chain() {
        let profiles = yaml(
            "{a: {vars: {x: 1}}, b: {extends: a, vars: {y: 2}}, c: {extends: b, vars: {z: 3}}}",
        );
        let chain = resolve_profile_chain(&profiles, "c").unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], yaml("{vars: {x: 1}}"));
        assert_eq!(chain[2], yaml("{vars: {z: 3}}"));
    }

    #[test]
    fn test_unknown_profile_is_an_error() {
        let profiles = yaml("{prod: {}}");
        let result = resolve_profile_chain(&profiles, "staging");
        assert!(matches!(result, Err(ConfigError::ProfileNotFound(_))));
    }

    #[test]
    fn test_cycle_keeps_accumulated_layers() {
        let profiles = yaml(
            "{a: {extends: b, vars: {from: a}}, b: {extends: a, vars: {from: b}}}",
        );
        let chain = resolve_profile_chain(&profiles, "a").unwrap();
        // a then b were gathered before the revisit of a stopped the walk
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0], yaml("{vars: {from: b}}"));
        assert_eq!(chain[1], yaml("{vars: {from: a}}"));
    }

    #[test]
    fn test_dangling_extends_ends_chain() {
        let profiles = yaml("{prod: {extends: missing, vars: {env: production}}}");
        let chain = resolve_profile_chain(&profiles, "prod").unwrap();
        assert_eq!(chain, vec![yaml("{vars: {env: production}}")]);
    }
}
