//! Typed views over the merged configuration tree
//!
//! The merged tree itself stays a loose `serde_yaml::Value`; typed entities
//! are reconstructed from it at well-defined boundaries (targets here,
//! tasks in the task parser) and the loose tree never leaks past them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Reserved top-level keys, in the canonical order used by `save`
pub const CANONICAL_KEYS: &[&str] = &[
    "version",
    "name",
    "description",
    "vars",
    "targets",
    "profiles",
    "tasks",
    "commands",
    "secrets",
];

/// Built-in defaults, the bottom layer of every merge.
///
/// Guarantees the post-load invariant: `version` and `targets.local`
/// always have a value.
pub fn builtin_defaults() -> Value {
    serde_yaml::from_str(DEFAULTS_YAML).expect("built-in defaults must parse")
}

const DEFAULTS_YAML: &str = r#"
version: "1.0"
targets:
  local:
    type: local
  defaults:
    timeout: 30s
    shell: /bin/sh
    encoding: utf8
    maxBuffer: 10mb
    throwOnNonZeroExit: true
    env: {}
    ssh:
      port: 22
      keepAlive: true
      keepAliveInterval: 15s
    docker:
      tty: false
      execFlags: []
    kubernetes:
      namespace: default
      container: null
"#;

/// The `targets` section, reconstructed from the merged tree
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetsConfig {
    /// Common defaults plus per-type blocks (`ssh`, `docker`, `kubernetes`)
    #[serde(default)]
    pub defaults: Value,

    /// SSH hosts by name
    #[serde(default)]
    pub hosts: BTreeMap<String, Value>,

    /// Docker containers by name
    #[serde(default)]
    pub containers: BTreeMap<String, Value>,

    /// Kubernetes pods by name
    #[serde(default)]
    pub pods: BTreeMap<String, Value>,

    /// The implicit local target
    #[serde(default)]
    pub local: Value,

    /// Whether bare names may be resolved by probing live backends
    #[serde(default = "default_true", rename = "autoDetect")]
    pub auto_detect: bool,

    /// Expiry for cached resolutions; absent means indefinite
    #[serde(default, rename = "cacheTtl", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        TargetsConfig {
            defaults: Value::Null,
            hosts: BTreeMap::new(),
            containers: BTreeMap::new(),
            pods: BTreeMap::new(),
            local: Value::Null,
            auto_detect: true,
            cache_ttl: None,
        }
    }
}

impl TargetsConfig {
    /// Declared names within one group
    pub fn group_names(&self, group: &str) -> Vec<String> {
        match group {
            "hosts" => self.hosts.keys().cloned().collect(),
            "containers" => self.containers.keys().cloned().collect(),
            "pods" => self.pods.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Declared config for a name within one group
    pub fn group_entry(&self, group: &str, name: &str) -> Option<&Value> {
        match group {
            "hosts" => self.hosts.get(name),
            "containers" => self.containers.get(name),
            "pods" => self.pods.get(name),
            _ => None,
        }
    }
}

/// The `secrets` provider descriptor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecretsConfig {
    /// Provider kind: `local` (on-disk store) or `env` (fallback)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Store location for the local provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        SecretsConfig {
            provider: default_provider(),
            path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "env".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::get_path;

    #[test]
    fn test_builtin_defaults_invariants() {
        let defaults = builtin_defaults();
        assert!(get_path(&defaults, "version").is_some());
        assert_eq!(
            get_path(&defaults, "targets.local.type"),
            Some(&Value::from("local"))
        );
        assert_eq!(
            get_path(&defaults, "targets.defaults.ssh.port"),
            Some(&Value::from(22))
        );
    }

    #[test]
    fn test_targets_config_from_value() {
        let value: Value = serde_yaml::from_str(
            r#"
defaults:
  timeout: 10s
hosts:
  web-1: {host: 10.0.0.1}
  web-2: {host: 10.0.0.2}
autoDetect: false
"#,
        )
        .unwrap();

        let targets: TargetsConfig = serde_yaml::from_value(value).unwrap();
        assert!(!targets.auto_detect);
        assert_eq!(targets.group_names("hosts"), vec!["web-1", "web-2"]);
        assert!(targets.group_entry("hosts", "web-1").is_some());
        assert!(targets.group_entry("pods", "web-1").is_none());
    }

    #[test]
    fn test_auto_detect_defaults_on() {
        let targets: TargetsConfig = serde_yaml::from_str("hosts: {}").unwrap();
        assert!(targets.auto_detect);
    }
}
