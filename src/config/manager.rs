//! Configuration loading and merging
//!
//! Merge order, each layer overriding the previous: built-in defaults,
//! global file, project file, active profile chain, `XEC_*` environment
//! overlay, then a final interpolation pass over the merged tree.
//!
//! Loading is deliberately forgiving by default: an orchestration tool must
//! keep running against partially-bad configuration mid-incident. `strict`
//! turns parse and validation problems into hard errors.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::config::profile::resolve_profile_chain;
use crate::config::types::{builtin_defaults, SecretsConfig, TargetsConfig, CANONICAL_KEYS};
use crate::error::{ConfigError, ConfigResult, Result};
use crate::utils::{deep_merge, deep_merge_verbatim, get_path, remove_path, set_path};
use crate::vars::{Interpolator, VariableContext};

/// Project configuration file names, tried in order at each directory level
const CONFIG_FILE_NAMES: &[&str] = &[
    ".xec/config.yaml",
    ".xec/config.yml",
    "xec.yaml",
    "xec.yml",
];

/// Environment overlay prefix: `XEC_TARGETS_DEFAULTS_TIMEOUT` overrides
/// `targets.defaults.timeout`
const ENV_OVERLAY_PREFIX: &str = "XEC_";

/// Variable names that collide with interpolation sources
const RESERVED_VAR_NAMES: &[&str] = &["env", "params", "cmd", "secret"];

/// Find the project configuration file by searching upward from a directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Loads, merges and persists the configuration tree
pub struct ConfigManager {
    project_dir: PathBuf,
    config_file: Option<PathBuf>,
    global_file: Option<PathBuf>,
    use_global: bool,
    strict: bool,
    active_profile: Option<String>,
    /// Environment snapshot taken at construction (or injected by tests)
    env_base: HashMap<String, String>,
    /// Effective snapshot after the `.env` merge, fixed per load
    env: HashMap<String, String>,
    merged: Value,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        ConfigManager {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            global_file: None,
            use_global: true,
            strict: false,
            active_profile: None,
            env_base: env::vars().collect(),
            env: HashMap::new(),
            merged: builtin_defaults(),
            source_path: None,
        }
    }

    pub fn with_project_dir(mut self, dir: PathBuf) -> Self {
        self.project_dir = dir;
        self
    }

    /// Use a specific project config file instead of searching
    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn with_global_file(mut self, path: PathBuf) -> Self {
        self.global_file = Some(path);
        self
    }

    /// Skip the global layer entirely (deterministic tests)
    pub fn without_global(mut self) -> Self {
        self.use_global = false;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.active_profile = Some(profile.into());
        self
    }

    /// Replace the environment snapshot (deterministic tests)
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env_base = env;
        self
    }

    /// Load (or reload) the merged configuration tree
    pub fn load(&mut self) -> Result<()> {
        let mut merged = builtin_defaults();
        // Profile bodies are layers applied later; they merge verbatim so
        // their markers survive until application
        let mut profiles = Value::Null;
        let env = self.effective_env();

        if self.use_global {
            if let Some(path) = self.global_path() {
                if path.is_file() {
                    self.merge_file(&mut merged, &mut profiles, &path)?;
                }
            }
        }

        let project_file = match &self.config_file {
            Some(path) => Some(path.clone()),
            None => find_config_file_from(self.project_dir.clone()).ok(),
        };
        if let Some(path) = &project_file {
            self.merge_file(&mut merged, &mut profiles, path)?;
        }
        self.source_path = project_file;

        if let Some(name) = self.active_profile.clone() {
            match resolve_profile_chain(&profiles, &name) {
                Ok(layers) => {
                    for layer in layers {
                        merged = deep_merge(&merged, &layer);
                    }
                }
                Err(e) if self.strict => return Err(e.into()),
                Err(e) => warn!(profile = %name, error = %e, "Skipping unknown profile"),
            }
        }

        self.apply_env_overlay(&mut merged, &env);
        self.validate(&merged, &profiles)?;

        // Post-load invariants survive even a hostile overlay
        if get_path(&merged, "version").is_none() {
            set_path(&mut merged, "version", Value::from("1.0"));
        }
        if get_path(&merged, "targets.local").is_none() {
            let mut local = Mapping::new();
            local.insert(Value::from("type"), Value::from("local"));
            set_path(&mut merged, "targets.local", Value::Mapping(local));
        }

        // Circular references stay non-fatal even in strict mode; only a
        // depth overrun aborts the load
        let ctx = VariableContext::new()
            .with_vars(get_path(&merged, "vars").cloned().unwrap_or(Value::Null))
            .with_env(env.clone());
        let interpolator = Interpolator::new();
        merged = interpolator.resolve_config(&merged, &ctx)?;

        // Stored profile bodies stay raw: placeholders and markers in them
        // only resolve when the profile is actually applied
        if !profiles.is_null() {
            set_path(&mut merged, "profiles", profiles);
        }

        self.merged = merged;
        self.env = env;
        Ok(())
    }

    /// Switch the active profile and reload
    pub fn use_profile(&mut self, name: impl Into<String>) -> Result<()> {
        self.active_profile = Some(name.into());
        self.load()
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.active_profile.as_deref()
    }

    /// Dotted-path lookup into the live merged tree
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.merged, path)
    }

    /// Dotted-path assignment into the live merged tree
    pub fn set(&mut self, path: &str, value: Value) -> ConfigResult<()> {
        if set_path(&mut self.merged, path, value) {
            Ok(())
        } else {
            Err(ConfigError::InvalidPath {
                path: path.to_string(),
                message: "an intermediate segment is not a mapping".to_string(),
            })
        }
    }

    /// Remove a value from the live merged tree, returning it
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        remove_path(&mut self.merged, path)
    }

    /// Serialize the current tree with canonical top-level key order
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => self
                .source_path
                .clone()
                .unwrap_or_else(|| self.project_dir.join("xec.yaml")),
        };

        let canonical = canonicalize(&self.merged);
        let text = serde_yaml::to_string(&canonical)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, text)?;
        Ok(target)
    }

    /// The full merged tree
    pub fn config(&self) -> &Value {
        &self.merged
    }

    /// Environment snapshot fixed at the last load
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// The `vars` section
    pub fn vars(&self) -> Value {
        self.get("vars").cloned().unwrap_or(Value::Null)
    }

    /// The raw `tasks` section; the task parser turns this into typed
    /// definitions
    pub fn tasks(&self) -> Value {
        self.get("tasks").cloned().unwrap_or(Value::Null)
    }

    /// Default options for a named subcommand from the `commands` section
    pub fn command_defaults(&self, command: &str) -> Option<&Value> {
        self.get(&format!("commands.{}", command))
    }

    /// Typed view of the `targets` section
    pub fn targets(&self) -> TargetsConfig {
        match self.get("targets") {
            Some(section) => serde_yaml::from_value(section.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "Malformed targets section, using defaults");
                TargetsConfig::default()
            }),
            None => TargetsConfig::default(),
        }
    }

    /// Typed view of the `secrets` section
    pub fn secrets(&self) -> SecretsConfig {
        match self.get("secrets") {
            Some(section) => serde_yaml::from_value(section.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "Malformed secrets section, using defaults");
                SecretsConfig::default()
            }),
            None => SecretsConfig::default(),
        }
    }

    /// Interpolation context bound to the current tree and snapshot
    pub fn variable_context(&self) -> VariableContext {
        let mut ctx = VariableContext::new()
            .with_vars(self.vars())
            .with_env(self.env.clone());
        if let Some(profile) = &self.active_profile {
            ctx = ctx.with_profile(profile.clone());
        }
        ctx
    }

    fn global_path(&self) -> Option<PathBuf> {
        if let Some(explicit) = &self.global_file {
            return Some(explicit.clone());
        }
        directories::ProjectDirs::from("", "", "xec")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    fn effective_env(&self) -> HashMap<String, String> {
        let mut env = self.env_base.clone();
        let dotenv_path = self.project_dir.join(".env");
        if dotenv_path.is_file() {
            if let Ok(iter) = dotenvy::from_path_iter(&dotenv_path) {
                for item in iter.flatten() {
                    // Real environment wins over .env entries
                    env.entry(item.0).or_insert(item.1);
                }
            }
        }
        env
    }

    fn merge_file(&self, merged: &mut Value, profiles: &mut Value, path: &Path) -> Result<()> {
        match parse_config_file(path) {
            Ok(mut doc) => {
                if let Some(section) = remove_path(&mut doc, "profiles") {
                    *profiles = deep_merge_verbatim(profiles, &section);
                }
                *merged = deep_merge(merged, &doc);
                Ok(())
            }
            Err(e) if self.strict => Err(e.into()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable config file");
                Ok(())
            }
        }
    }

    fn apply_env_overlay(&self, merged: &mut Value, env: &HashMap<String, String>) {
        for (key, value) in env {
            let Some(rest) = key.strip_prefix(ENV_OVERLAY_PREFIX) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let path = rest.to_lowercase().replace('_', ".");
            if !set_path(merged, &path, Value::String(value.clone())) {
                warn!(variable = %key, "Environment overlay path is not assignable");
            }
        }
    }

    fn validate(&self, merged: &Value, profiles: &Value) -> Result<()> {
        for section in ["vars", "targets", "tasks", "commands"] {
            if let Some(value) = get_path(merged, section) {
                self.check_mapping(section, value)?;
            }
        }
        self.check_mapping("profiles", profiles)?;

        if let Some(vars) = get_path(merged, "vars").and_then(Value::as_mapping) {
            for key in vars.keys() {
                if let Some(name) = key.as_str() {
                    if RESERVED_VAR_NAMES.contains(&name) {
                        warn!(name = %name, "Variable shadows a reserved interpolation source");
                    }
                }
            }
        }
        Ok(())
    }

    fn check_mapping(&self, section: &str, value: &Value) -> Result<()> {
        if !value.is_mapping() && !value.is_null() {
            let message = format!("'{}' must be a mapping", section);
            if self.strict {
                return Err(ConfigError::Invalid(message).into());
            }
            warn!("{}", message);
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one configuration file into a loose tree
fn parse_config_file(path: &Path) -> ConfigResult<Value> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let doc: Value = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    match doc {
        Value::Mapping(_) => Ok(doc),
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        _ => Err(ConfigError::Parse {
            path: path.to_path_buf(),
            message: "document root must be a mapping".to_string(),
        }),
    }
}

/// Rebuild the tree with reserved keys first, custom keys after
fn canonicalize(merged: &Value) -> Value {
    let Some(map) = merged.as_mapping() else {
        return merged.clone();
    };

    let mut out = Mapping::new();
    for key in CANONICAL_KEYS {
        if let Some(value) = map.get(Value::from(*key)) {
            out.insert(Value::from(*key), value.clone());
        }
    }
    for (key, value) in map {
        if !out.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Mapping(out)
}
