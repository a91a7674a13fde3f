//! Variable context and parsed placeholder references

use std::collections::HashMap;

use serde_yaml::Value;

/// Source a placeholder reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    /// Configuration variables (the default when no type is given)
    Vars,
    /// Environment snapshot
    Env,
    /// Task parameters
    Params,
    /// Command substitution
    Cmd,
    /// Secret lookup
    Secret,
}

impl RefType {
    pub fn parse(s: &str) -> Option<RefType> {
        match s {
            "vars" => Some(RefType::Vars),
            "env" => Some(RefType::Env),
            "params" => Some(RefType::Params),
            "cmd" => Some(RefType::Cmd),
            "secret" => Some(RefType::Secret),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::Vars => "vars",
            RefType::Env => "env",
            RefType::Params => "params",
            RefType::Cmd => "cmd",
            RefType::Secret => "secret",
        }
    }
}

/// A parsed `${...}` placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableReference {
    /// Which source the reference reads from
    pub ref_type: RefType,

    /// Path within the source (a shell command for `cmd`, a key for
    /// `secret` and `env`, a dotted path otherwise)
    pub path: String,

    /// Fallback used when the path does not resolve
    pub default_value: Option<String>,

    /// The placeholder exactly as written, including `${` and `}`
    pub raw: String,
}

impl VariableReference {
    /// Parse the inside of a `${...}` placeholder.
    ///
    /// Returns `None` for an empty body or an unrecognized shape, which
    /// callers treat as literal passthrough.
    pub fn parse(body: &str, raw: &str) -> Option<VariableReference> {
        if body.is_empty() {
            return None;
        }

        // Colon forms: the remainder is the whole command for cmd, and a
        // key with an optional default for secret
        if let Some(command) = body.strip_prefix("cmd:") {
            return Some(VariableReference {
                ref_type: RefType::Cmd,
                path: command.to_string(),
                default_value: None,
                raw: raw.to_string(),
            });
        }
        if let Some(rest) = body.strip_prefix("secret:") {
            let (key, default) = split_default(rest);
            return Some(VariableReference {
                ref_type: RefType::Secret,
                path: key.to_string(),
                default_value: default,
                raw: raw.to_string(),
            });
        }

        let (path, default_value) = split_default(body);

        // Dotted type prefix; an unknown first segment is just part of a
        // vars path
        let (ref_type, path) = match path.split_once('.') {
            Some((prefix, rest)) if !rest.is_empty() => match RefType::parse(prefix) {
                Some(t) => (t, rest.to_string()),
                None => (RefType::Vars, path.to_string()),
            },
            _ => (RefType::Vars, path.to_string()),
        };

        Some(VariableReference {
            ref_type,
            path,
            default_value,
            raw: raw.to_string(),
        })
    }

    /// Key used for cycle tracking
    pub fn cycle_key(&self) -> String {
        format!("{}.{}", self.ref_type.as_str(), self.path)
    }
}

fn split_default(s: &str) -> (&str, Option<String>) {
    match s.split_once(':') {
        Some((path, default)) => (path, Some(default.to_string())),
        None => (s, None),
    }
}

/// Everything interpolation resolves against.
///
/// The environment is an explicit snapshot taken at load time; the
/// interpolator never reads ambient process state, so the same context
/// resolves reproducibly in tests.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Configuration variables (arbitrary nesting)
    pub vars: Value,

    /// Environment snapshot
    pub env: HashMap<String, String>,

    /// Task parameters
    pub params: Value,

    /// Active profile name, if any
    pub profile: Option<String>,
}

impl VariableContext {
    pub fn new() -> Self {
        VariableContext::default()
    }

    /// Capture the current process environment as the snapshot
    pub fn with_process_env(mut self) -> Self {
        self.env = std::env::vars().collect();
        self
    }

    pub fn with_vars(mut self, vars: Value) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}
