//! Placeholder resolution over loose YAML trees
//!
//! Two entry points with identical semantics: [`Interpolator::interpolate`]
//! is synchronous and cannot touch external collaborators (command
//! substitution and secret lookup degrade to documented fallbacks), while
//! [`Interpolator::interpolate_async`] resolves `cmd:` and `secret:`
//! references for real.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::error::{InterpolationError, InterpolationResult};
use crate::exec::{secret_env_key, CommandRunner, Invocation, SecretProvider};
use crate::utils::merge::UNSET_MARKER;
use crate::utils::path::get_path;

use super::types::{RefType, VariableContext, VariableReference};

/// Nested re-resolution bound; exceeding it is fatal because it signals an
/// authoring bug, not legitimate deep nesting
pub const MAX_INTERPOLATION_DEPTH: usize = 10;

/// A placeholder occurrence within a string
struct Placeholder {
    start: usize,
    end: usize,
    body: String,
}

fn placeholder_regex() -> Regex {
    Regex::new(r"\$\{([^}]*)\}").unwrap()
}

/// Find all unescaped `${...}` occurrences
fn find_placeholders(s: &str) -> Vec<Placeholder> {
    let re = placeholder_regex();
    let bytes = s.as_bytes();
    re.captures_iter(s)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            // A backslash escapes the placeholder; it stays literal
            if whole.start() > 0 && bytes[whole.start() - 1] == b'\\' {
                return None;
            }
            Some(Placeholder {
                start: whole.start(),
                end: whole.end(),
                body: caps.get(1).map(|m| m.as_str().to_string())?,
            })
        })
        .collect()
}

/// Extract every placeholder in a string without resolving anything.
///
/// Used for static analysis and validation; no command runs, no secret is
/// read.
pub fn parse_variables(s: &str) -> Vec<VariableReference> {
    find_placeholders(s)
        .into_iter()
        .filter_map(|p| VariableReference::parse(&p.body, &s[p.start..p.end]))
        .collect()
}

/// Outcome of resolving one reference
enum RefOutcome {
    /// Resolved to a value
    Value(Value),
    /// Not resolvable; the raw placeholder stays in place
    Unresolved,
}

/// Resolves `${...}` placeholders against a [`VariableContext`]
pub struct Interpolator {
    strict: bool,
    runner: Option<Arc<dyn CommandRunner>>,
    secrets: Option<Arc<dyn SecretProvider>>,
    secret_cache: Mutex<HashMap<String, String>>,
}

impl Interpolator {
    pub fn new() -> Self {
        Interpolator {
            strict: false,
            runner: None,
            secrets: None,
            secret_cache: Mutex::new(HashMap::new()),
        }
    }

    /// In strict mode circular references become errors instead of
    /// warnings
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Drop cached secret values so rotated secrets are re-read
    pub fn clear_secret_cache(&self) {
        self.cache_lock().clear();
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.secret_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve placeholders synchronously.
    ///
    /// Non-string values pass through unchanged; mappings and sequences
    /// recurse. `cmd:` references cannot run here and resolve to
    /// `[cmd:<command>]` with a warning; `secret:` references fall back to
    /// the cache, then the `SECRET_<KEY>` environment snapshot.
    pub fn interpolate(&self, value: &Value, ctx: &VariableContext) -> InterpolationResult<Value> {
        self.resolve_value(value, ctx, 0)
    }

    /// Resolve placeholders, running command substitution and secret
    /// lookup through the injected collaborators
    pub async fn interpolate_async(
        &self,
        value: &Value,
        ctx: &VariableContext,
    ) -> InterpolationResult<Value> {
        self.resolve_value_async(value, ctx, 0).await
    }

    /// Walk an entire configuration tree, interpolating every string leaf
    /// and removing keys whose value is the literal `$unset`
    pub fn resolve_config(
        &self,
        config: &Value,
        ctx: &VariableContext,
    ) -> InterpolationResult<Value> {
        let resolved = self.resolve_value(config, ctx, 0)?;
        Ok(drop_unset(resolved))
    }

    fn resolve_value(
        &self,
        value: &Value,
        ctx: &VariableContext,
        depth: usize,
    ) -> InterpolationResult<Value> {
        match value {
            Value::String(s) => {
                let mut visiting = HashSet::new();
                let mut cycled = false;
                self.resolve_string(s, ctx, depth, &mut visiting, &mut cycled)
            }
            Value::Mapping(map) => {
                let mut out = Mapping::new();
                for (key, val) in map {
                    out.insert(key.clone(), self.resolve_value(val, ctx, depth)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for item in seq {
                    out.push(self.resolve_value(item, ctx, depth)?);
                }
                Ok(Value::Sequence(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(
        &self,
        s: &str,
        ctx: &VariableContext,
        depth: usize,
        visiting: &mut HashSet<String>,
        cycled: &mut bool,
    ) -> InterpolationResult<Value> {
        let found = find_placeholders(s);
        if found.is_empty() {
            return Ok(Value::String(s.to_string()));
        }
        if depth >= MAX_INTERPOLATION_DEPTH {
            return Err(InterpolationError::DepthExceeded(MAX_INTERPOLATION_DEPTH));
        }

        // A string that is exactly one placeholder keeps the resolved
        // value's type
        if found.len() == 1 && found[0].start == 0 && found[0].end == s.len() {
            let Some(reference) = VariableReference::parse(&found[0].body, s) else {
                return Ok(Value::String(s.to_string()));
            };
            return match self.resolve_reference(&reference, ctx, depth, visiting, cycled)? {
                RefOutcome::Value(v) => Ok(v),
                RefOutcome::Unresolved => Ok(Value::String(s.to_string())),
            };
        }

        let mut out = String::with_capacity(s.len());
        let mut last_end = 0;
        for p in found {
            out.push_str(&s[last_end..p.start]);
            let raw = &s[p.start..p.end];
            match VariableReference::parse(&p.body, raw) {
                Some(reference) => {
                    match self.resolve_reference(&reference, ctx, depth, visiting, cycled)? {
                        RefOutcome::Value(v) => out.push_str(&stringify(&v)),
                        RefOutcome::Unresolved => out.push_str(raw),
                    }
                }
                None => out.push_str(raw),
            }
            last_end = p.end;
        }
        out.push_str(&s[last_end..]);
        Ok(Value::String(out))
    }

    fn resolve_reference(
        &self,
        reference: &VariableReference,
        ctx: &VariableContext,
        depth: usize,
        visiting: &mut HashSet<String>,
        cycled: &mut bool,
    ) -> InterpolationResult<RefOutcome> {
        let key = reference.cycle_key();
        if visiting.contains(&key) {
            if self.strict {
                return Err(InterpolationError::CircularReference(key));
            }
            warn!(reference = %key, "Circular variable reference");
            *cycled = true;
            return Ok(RefOutcome::Unresolved);
        }

        let base = match reference.ref_type {
            RefType::Vars => get_path(&ctx.vars, &reference.path).cloned(),
            RefType::Params => get_path(&ctx.params, &reference.path).cloned(),
            RefType::Env => ctx.env.get(&reference.path).cloned().map(Value::String),
            RefType::Cmd => {
                warn!(
                    command = %reference.path,
                    "Command substitution is not available during synchronous interpolation"
                );
                return Ok(RefOutcome::Value(Value::String(format!(
                    "[cmd:{}]",
                    reference.path
                ))));
            }
            RefType::Secret => return Ok(self.resolve_secret_sync(reference, ctx)),
        };

        self.finish_reference(reference, base, ctx, depth, visiting, cycled)
    }

    /// Tail of synchronous reference resolution: apply defaults and
    /// re-resolve nested placeholders in the resolved value
    fn finish_reference(
        &self,
        reference: &VariableReference,
        base: Option<Value>,
        ctx: &VariableContext,
        depth: usize,
        visiting: &mut HashSet<String>,
        cycled: &mut bool,
    ) -> InterpolationResult<RefOutcome> {
        let Some(value) = base else {
            // A present-but-empty value never reaches this branch; only a
            // truly absent path falls back to the default
            return Ok(match &reference.default_value {
                Some(default) => RefOutcome::Value(Value::String(default.clone())),
                None => RefOutcome::Unresolved,
            });
        };

        if let Value::String(s) = &value {
            if !find_placeholders(s).is_empty() {
                let key = reference.cycle_key();
                visiting.insert(key.clone());
                let mut inner_cycled = false;
                let resolved = self.resolve_string(s, ctx, depth + 1, visiting, &mut inner_cycled)?;
                visiting.remove(&key);
                if inner_cycled {
                    *cycled = true;
                    return Ok(RefOutcome::Unresolved);
                }
                return Ok(RefOutcome::Value(resolved));
            }
        }

        Ok(RefOutcome::Value(value))
    }

    fn resolve_secret_sync(&self, reference: &VariableReference, ctx: &VariableContext) -> RefOutcome {
        if let Some(cached) = self.cache_lock().get(&reference.path).cloned() {
            return RefOutcome::Value(Value::String(cached));
        }
        if let Some(value) = ctx.env.get(&secret_env_key(&reference.path)) {
            return RefOutcome::Value(Value::String(value.clone()));
        }
        if let Some(default) = &reference.default_value {
            return RefOutcome::Value(Value::String(default.clone()));
        }
        warn!(
            key = %reference.path,
            "Secret lookup is not available during synchronous interpolation"
        );
        RefOutcome::Value(Value::String(format!("[secret:{}]", reference.path)))
    }

    fn resolve_value_async<'a>(
        &'a self,
        value: &'a Value,
        ctx: &'a VariableContext,
        depth: usize,
    ) -> BoxFuture<'a, InterpolationResult<Value>> {
        Box::pin(async move {
            match value {
                Value::String(s) => {
                    let mut visiting = HashSet::new();
                    let mut cycled = false;
                    self.resolve_string_async(s, ctx, depth, &mut visiting, &mut cycled)
                        .await
                }
                Value::Mapping(map) => {
                    let mut out = Mapping::new();
                    for (key, val) in map {
                        out.insert(key.clone(), self.resolve_value_async(val, ctx, depth).await?);
                    }
                    Ok(Value::Mapping(out))
                }
                Value::Sequence(seq) => {
                    let mut out = Vec::with_capacity(seq.len());
                    for item in seq {
                        out.push(self.resolve_value_async(item, ctx, depth).await?);
                    }
                    Ok(Value::Sequence(out))
                }
                other => Ok(other.clone()),
            }
        })
    }

    fn resolve_string_async<'a>(
        &'a self,
        s: &'a str,
        ctx: &'a VariableContext,
        depth: usize,
        visiting: &'a mut HashSet<String>,
        cycled: &'a mut bool,
    ) -> BoxFuture<'a, InterpolationResult<Value>> {
        Box::pin(async move {
            let found = find_placeholders(s);
            if found.is_empty() {
                return Ok(Value::String(s.to_string()));
            }
            if depth >= MAX_INTERPOLATION_DEPTH {
                return Err(InterpolationError::DepthExceeded(MAX_INTERPOLATION_DEPTH));
            }

            if found.len() == 1 && found[0].start == 0 && found[0].end == s.len() {
                let Some(reference) = VariableReference::parse(&found[0].body, s) else {
                    return Ok(Value::String(s.to_string()));
                };
                return match self
                    .resolve_reference_async(&reference, ctx, depth, visiting, cycled)
                    .await?
                {
                    RefOutcome::Value(v) => Ok(v),
                    RefOutcome::Unresolved => Ok(Value::String(s.to_string())),
                };
            }

            let mut out = String::with_capacity(s.len());
            let mut last_end = 0;
            for p in found {
                out.push_str(&s[last_end..p.start]);
                let raw = &s[p.start..p.end];
                match VariableReference::parse(&p.body, raw) {
                    Some(reference) => {
                        match self
                            .resolve_reference_async(&reference, ctx, depth, visiting, cycled)
                            .await?
                        {
                            RefOutcome::Value(v) => out.push_str(&stringify(&v)),
                            RefOutcome::Unresolved => out.push_str(raw),
                        }
                    }
                    None => out.push_str(raw),
                }
                last_end = p.end;
            }
            out.push_str(&s[last_end..]);
            Ok(Value::String(out))
        })
    }

    async fn resolve_reference_async(
        &self,
        reference: &VariableReference,
        ctx: &VariableContext,
        depth: usize,
        visiting: &mut HashSet<String>,
        cycled: &mut bool,
    ) -> InterpolationResult<RefOutcome> {
        let key = reference.cycle_key();
        if visiting.contains(&key) {
            if self.strict {
                return Err(InterpolationError::CircularReference(key));
            }
            warn!(reference = %key, "Circular variable reference");
            *cycled = true;
            return Ok(RefOutcome::Unresolved);
        }

        let base = match reference.ref_type {
            RefType::Vars => get_path(&ctx.vars, &reference.path).cloned(),
            RefType::Params => get_path(&ctx.params, &reference.path).cloned(),
            RefType::Env => ctx.env.get(&reference.path).cloned().map(Value::String),
            RefType::Cmd => {
                return Ok(RefOutcome::Value(Value::String(
                    self.run_substitution(&reference.path).await,
                )))
            }
            RefType::Secret => return Ok(self.resolve_secret_async(reference, ctx).await),
        };

        self.finish_reference_async(reference, base, ctx, depth, visiting, cycled)
            .await
    }

    /// Async tail of reference resolution. Nested placeholders re-resolve
    /// through the async path so a `cmd:` or `secret:` reference reached
    /// through `vars` indirection still runs for real.
    async fn finish_reference_async(
        &self,
        reference: &VariableReference,
        base: Option<Value>,
        ctx: &VariableContext,
        depth: usize,
        visiting: &mut HashSet<String>,
        cycled: &mut bool,
    ) -> InterpolationResult<RefOutcome> {
        let Some(value) = base else {
            return Ok(match &reference.default_value {
                Some(default) => RefOutcome::Value(Value::String(default.clone())),
                None => RefOutcome::Unresolved,
            });
        };

        if let Value::String(s) = &value {
            if !find_placeholders(s).is_empty() {
                let key = reference.cycle_key();
                visiting.insert(key.clone());
                let mut inner_cycled = false;
                let resolved = self
                    .resolve_string_async(s, ctx, depth + 1, visiting, &mut inner_cycled)
                    .await?;
                visiting.remove(&key);
                if inner_cycled {
                    *cycled = true;
                    return Ok(RefOutcome::Unresolved);
                }
                return Ok(RefOutcome::Value(resolved));
            }
        }

        Ok(RefOutcome::Value(value))
    }

    /// Run a `cmd:` substitution, returning trimmed stdout or an empty
    /// string with a warning on failure
    async fn run_substitution(&self, command: &str) -> String {
        let Some(runner) = &self.runner else {
            warn!(command = %command, "No command runner configured for substitution");
            return format!("[cmd:{}]", command);
        };

        match runner.run(&Invocation::new(command)).await {
            Ok(output) if output.success() => output.stdout.trim().to_string(),
            Ok(output) => {
                warn!(
                    command = %command,
                    exit_code = ?output.exit_code,
                    "Command substitution exited non-zero"
                );
                String::new()
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Command substitution failed");
                String::new()
            }
        }
    }

    async fn resolve_secret_async(
        &self,
        reference: &VariableReference,
        ctx: &VariableContext,
    ) -> RefOutcome {
        if let Some(cached) = self.cache_lock().get(&reference.path).cloned() {
            return RefOutcome::Value(Value::String(cached));
        }

        if let Some(provider) = &self.secrets {
            if let Some(value) = provider.get(&reference.path).await {
                self.cache_lock()
                    .insert(reference.path.clone(), value.clone());
                return RefOutcome::Value(Value::String(value));
            }
        }

        if let Some(value) = ctx.env.get(&secret_env_key(&reference.path)) {
            return RefOutcome::Value(Value::String(value.clone()));
        }
        if let Some(default) = &reference.default_value {
            return RefOutcome::Value(Value::String(default.clone()));
        }

        warn!(key = %reference.path, "Secret could not be resolved");
        RefOutcome::Value(Value::String(format!("[secret:{}]", reference.path)))
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a resolved value into a larger string
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

/// Remove mapping entries whose value is the literal `$unset`
fn drop_unset(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut out = Mapping::new();
            for (key, val) in map {
                if matches!(&val, Value::String(s) if s == UNSET_MARKER) {
                    continue;
                }
                out.insert(key, drop_unset(val));
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(drop_unset).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionError, ExecutionResult};
    use crate::exec::{CommandRunner, ExecOutput};
    use async_trait::async_trait;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn ctx_with_vars(vars: &str) -> VariableContext {
        VariableContext::new().with_vars(yaml(vars))
    }

    fn resolve(interp: &Interpolator, input: &str, ctx: &VariableContext) -> Value {
        interp.interpolate(&Value::String(input.to_string()), ctx).unwrap()
    }

    #[test]
    fn test_simple_substitution() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{name: world}");
        assert_eq!(resolve(&interp, "Hello, ${vars.name}!", &ctx), yaml("'Hello, world!'"));
    }

    #[test]
    fn test_bare_path_reads_vars() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{name: world}");
        assert_eq!(resolve(&interp, "${name}", &ctx), yaml("world"));
    }

    #[test]
    fn test_whole_string_keeps_type() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{port: 8080, debug: true}");
        assert_eq!(resolve(&interp, "${vars.port}", &ctx), yaml("8080"));
        assert_eq!(resolve(&interp, "${vars.debug}", &ctx), yaml("true"));
    }

    #[test]
    fn test_embedded_reference_stringifies() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{port: 8080}");
        assert_eq!(resolve(&interp, "port=${vars.port}", &ctx), yaml("port=8080"));
    }

    #[test]
    fn test_non_string_passthrough() {
        let interp = Interpolator::new();
        let ctx = VariableContext::new();
        assert_eq!(interp.interpolate(&yaml("42"), &ctx).unwrap(), yaml("42"));
        assert_eq!(interp.interpolate(&yaml("null"), &ctx).unwrap(), yaml("null"));
    }

    #[test]
    fn test_nested_tree_recursion() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{env: prod}");
        let tree = yaml("{a: ['${vars.env}-1', plain], b: {c: '${vars.env}'}}");
        assert_eq!(
            interp.interpolate(&tree, &ctx).unwrap(),
            yaml("{a: [prod-1, plain], b: {c: prod}}")
        );
    }

    #[test]
    fn test_missing_without_default_stays_raw() {
        let interp = Interpolator::new();
        let ctx = VariableContext::new();
        assert_eq!(resolve(&interp, "${vars.missing}", &ctx), yaml("'${vars.missing}'"));
    }

    #[test]
    fn test_missing_with_default() {
        let interp = Interpolator::new();
        let ctx = VariableContext::new();
        assert_eq!(resolve(&interp, "${vars.missing:fallback}", &ctx), yaml("fallback"));
        assert_eq!(
            resolve(&interp, "${vars.missing:}", &ctx),
            Value::String(String::new())
        );
    }

    #[test]
    fn test_present_empty_env_wins_over_default() {
        let interp = Interpolator::new();
        let mut env = HashMap::new();
        env.insert("EMPTY".to_string(), String::new());
        let ctx = VariableContext::new().with_env(env);
        assert_eq!(
            resolve(&interp, "${env.EMPTY:default}", &ctx),
            Value::String(String::new())
        );
    }

    #[test]
    fn test_env_reference() {
        let interp = Interpolator::new();
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/home/me".to_string());
        let ctx = VariableContext::new().with_env(env);
        assert_eq!(resolve(&interp, "${env.HOME}", &ctx), yaml("/home/me"));
    }

    #[test]
    fn test_params_reference() {
        let interp = Interpolator::new();
        let ctx = VariableContext::new().with_params(yaml("{count: 3}"));
        assert_eq!(resolve(&interp, "${params.count}", &ctx), yaml("3"));
    }

    #[test]
    fn test_nested_interpolation_chain() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{inner: value, outer: '${vars.inner}'}");
        assert_eq!(resolve(&interp, "${vars.outer}", &ctx), yaml("value"));
    }

    #[test]
    fn test_chain_of_ten_resolves() {
        let interp = Interpolator::new();
        let mut vars = String::from("{v10: terminal");
        for i in 1..10 {
            vars.push_str(&format!(", v{}: '${{vars.v{}}}'", i, i + 1));
        }
        vars.push('}');
        let ctx = ctx_with_vars(&vars);
        assert_eq!(resolve(&interp, "${vars.v1}", &ctx), yaml("terminal"));
    }

    #[test]
    fn test_chain_of_eleven_is_fatal() {
        let interp = Interpolator::new();
        let mut vars = String::from("{v11: terminal");
        for i in 1..11 {
            vars.push_str(&format!(", v{}: '${{vars.v{}}}'", i, i + 1));
        }
        vars.push('}');
        let ctx = ctx_with_vars(&vars);
        let err = interp
            .interpolate(&Value::String("${vars.v1}".to_string()), &ctx)
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Maximum variable interpolation depth (10) exceeded"));
    }

    #[test]
    fn test_mutual_cycle_leaves_placeholders() {
        let interp = Interpolator::new();
        let vars = yaml("{a: '${vars.b}', b: '${vars.a}'}");
        let ctx = VariableContext::new().with_vars(vars.clone());
        // Both values survive as their original placeholder strings
        assert_eq!(interp.resolve_config(&vars, &ctx).unwrap(), vars);
        // A reference into the cycle stays unresolved too
        assert_eq!(resolve(&interp, "${vars.a}", &ctx), yaml("'${vars.a}'"));
    }

    #[test]
    fn test_self_cycle_leaves_placeholder() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{a: 'x-${vars.a}'}");
        assert_eq!(resolve(&interp, "${vars.a}", &ctx), yaml("'${vars.a}'"));
    }

    #[test]
    fn test_cycle_is_fatal_in_strict_mode() {
        let interp = Interpolator::new().strict(true);
        let ctx = ctx_with_vars("{a: '${vars.b}', b: '${vars.a}'}");
        let err = interp
            .interpolate(&Value::String("${vars.a}".to_string()), &ctx)
            .unwrap_err();
        assert!(matches!(err, InterpolationError::CircularReference(_)));
    }

    #[test]
    fn test_repeated_reference_is_not_a_cycle() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{x: v}");
        assert_eq!(resolve(&interp, "${vars.x}-${vars.x}", &ctx), yaml("v-v"));
    }

    #[test]
    fn test_escaped_placeholder_untouched() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{name: world}");
        assert_eq!(
            resolve(&interp, r"literal \${vars.name} here", &ctx),
            yaml(r"'literal \${vars.name} here'")
        );
    }

    #[test]
    fn test_empty_body_stays_literal() {
        let interp = Interpolator::new();
        let ctx = VariableContext::new();
        assert_eq!(resolve(&interp, "x${}y", &ctx), yaml("'x${}y'"));
    }

    #[test]
    fn test_sync_cmd_returns_placeholder() {
        let interp = Interpolator::new();
        let ctx = VariableContext::new();
        assert_eq!(resolve(&interp, "${cmd:whoami}", &ctx), yaml("'[cmd:whoami]'"));
    }

    #[test]
    fn test_sync_secret_env_fallback() {
        let interp = Interpolator::new();
        let mut env = HashMap::new();
        env.insert("SECRET_DB_PASSWORD".to_string(), "hunter2".to_string());
        let ctx = VariableContext::new().with_env(env);
        assert_eq!(resolve(&interp, "${secret:db-password}", &ctx), yaml("hunter2"));
    }

    #[test]
    fn test_sync_secret_unresolved_placeholder() {
        let interp = Interpolator::new();
        let ctx = VariableContext::new();
        assert_eq!(
            resolve(&interp, "${secret:missing}", &ctx),
            yaml("'[secret:missing]'")
        );
    }

    #[test]
    fn test_resolve_config_removes_unset() {
        let interp = Interpolator::new();
        let ctx = ctx_with_vars("{env: prod}");
        let config = yaml("{keep: '${vars.env}', drop: '$unset', nested: {gone: '$unset', ok: 1}}");
        assert_eq!(
            interp.resolve_config(&config, &ctx).unwrap(),
            yaml("{keep: prod, nested: {ok: 1}}")
        );
    }

    #[test]
    fn test_parse_variables_has_no_side_effects() {
        let refs = parse_variables("a ${vars.x} b ${cmd:rm -rf /} c ${secret:key:fb}");
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].ref_type, RefType::Vars);
        assert_eq!(refs[1].ref_type, RefType::Cmd);
        assert_eq!(refs[1].path, "rm -rf /");
        assert_eq!(refs[2].ref_type, RefType::Secret);
        assert_eq!(refs[2].default_value.as_deref(), Some("fb"));
    }

    struct FixedRunner {
        stdout: String,
        exit_code: i32,
    }

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, _invocation: &Invocation) -> ExecutionResult<ExecOutput> {
            if self.exit_code < 0 {
                return Err(ExecutionError::Spawn("boom".to_string()));
            }
            Ok(ExecOutput {
                exit_code: Some(self.exit_code),
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_async_cmd_substitutes_trimmed_stdout() {
        let interp = Interpolator::new().with_runner(Arc::new(FixedRunner {
            stdout: "abc123\n".to_string(),
            exit_code: 0,
        }));
        let ctx = VariableContext::new();
        let out = interp
            .interpolate_async(&Value::String("rev=${cmd:git rev-parse HEAD}".to_string()), &ctx)
            .await
            .unwrap();
        assert_eq!(out, yaml("rev=abc123"));
    }

    #[tokio::test]
    async fn test_async_cmd_through_vars_indirection() {
        let interp = Interpolator::new().with_runner(Arc::new(FixedRunner {
            stdout: "resolved-output\n".to_string(),
            exit_code: 0,
        }));
        let ctx = ctx_with_vars("{x: '${cmd:whoami}'}");
        let out = interp
            .interpolate_async(&Value::String("${vars.x}".to_string()), &ctx)
            .await
            .unwrap();
        assert_eq!(out, yaml("resolved-output"));
    }

    #[tokio::test]
    async fn test_async_cmd_failure_becomes_empty() {
        let interp = Interpolator::new().with_runner(Arc::new(FixedRunner {
            stdout: "partial".to_string(),
            exit_code: 1,
        }));
        let ctx = VariableContext::new();
        let out = interp
            .interpolate_async(&Value::String("x=${cmd:false}y".to_string()), &ctx)
            .await
            .unwrap();
        assert_eq!(out, yaml("x=y"));
    }

    struct OneSecret;

    #[async_trait]
    impl crate::exec::SecretProvider for OneSecret {
        async fn initialize(&self) -> InterpolationResult<()> {
            Ok(())
        }
        async fn get(&self, key: &str) -> Option<String> {
            (key == "token").then(|| "s3cr3t".to_string())
        }
        async fn set(&self, _key: &str, _value: &str) -> InterpolationResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_async_secret_populates_cache() {
        let interp = Interpolator::new().with_secrets(Arc::new(OneSecret));
        let ctx = VariableContext::new();
        let input = Value::String("${secret:token}".to_string());

        let out = interp.interpolate_async(&input, &ctx).await.unwrap();
        assert_eq!(out, yaml("s3cr3t"));

        // Now visible to the synchronous path through the cache
        assert_eq!(interp.interpolate(&input, &ctx).unwrap(), yaml("s3cr3t"));

        interp.clear_secret_cache();
        assert_eq!(
            interp.interpolate(&input, &ctx).unwrap(),
            yaml("'[secret:token]'")
        );
    }
}
