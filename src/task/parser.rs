//! Task definition parsing and validation
//!
//! Every rule yields exactly one issue and never short-circuits the rest,
//! so an author sees the full list of problems in one pass. A task with
//! any issue parses to `None`; `parse_tasks` fails aggregate if any task
//! failed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde_yaml::Value;

use crate::error::{TaskError, ValidationIssue};
use crate::task::types::{
    CacheSpec, OnFailure, ParamDefinition, ParamType, StepAction, StepDefinition, TaskBody,
    TaskDefinition,
};
use crate::utils::parse_duration;

pub struct TaskParser {
    issues: Vec<ValidationIssue>,
}

impl TaskParser {
    pub fn new() -> Self {
        TaskParser { issues: Vec::new() }
    }

    /// Issues accumulated across all `parse_task` calls so far
    pub fn errors(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Parse the whole `tasks` section, failing aggregate if any task has
    /// validation issues
    pub fn parse_tasks(
        &mut self,
        tasks: &Value,
    ) -> Result<BTreeMap<String, TaskDefinition>, TaskError> {
        let mut parsed = BTreeMap::new();
        let Some(map) = tasks.as_mapping() else {
            return Ok(parsed);
        };

        for (key, def) in map {
            let Some(name) = key.as_str() else {
                self.issues
                    .push(ValidationIssue::new(format!("{:?}", key), "task name must be a string"));
                continue;
            };
            if let Some(task) = self.parse_task(name, def) {
                parsed.insert(name.to_string(), task);
            }
        }

        if self.issues.is_empty() {
            Ok(parsed)
        } else {
            Err(TaskError::Invalid(std::mem::take(&mut self.issues)))
        }
    }

    /// Parse one task definition; `None` when any validation rule fired
    pub fn parse_task(&mut self, name: &str, def: &Value) -> Option<TaskDefinition> {
        let before = self.issues.len();

        // Bare string shorthand for a single-command task
        if let Some(command) = def.as_str() {
            return Some(TaskDefinition {
                name: name.to_string(),
                description: None,
                private: false,
                body: TaskBody::Command(command.to_string()),
                params: Vec::new(),
                target: None,
                parallel: false,
                max_concurrent: None,
                fail_fast: false,
                timeout: None,
                cache: None,
                env: HashMap::new(),
                cwd: None,
            });
        }

        let Some(map) = def.as_mapping() else {
            self.issues.push(ValidationIssue::new(
                name,
                "task definition must be a string or a mapping",
            ));
            return None;
        };

        let body = self.parse_body(name, map);
        let params = self.parse_params(name, map.get(Value::from("params")));
        let timeout = self.parse_timeout(name, "timeout".to_string(), map.get(Value::from("timeout")));
        let cache = self.parse_cache(name, map.get(Value::from("cache")));

        let parallel = bool_key(map, "parallel").unwrap_or(false);
        let fail_fast = bool_key(map, "failFast").unwrap_or(false);
        let max_concurrent = match map.get(Value::from("maxConcurrent")) {
            None => None,
            Some(v) => match v.as_u64() {
                Some(n) if n >= 1 => Some(n as usize),
                _ => {
                    self.issues.push(ValidationIssue::field(
                        name,
                        "maxConcurrent",
                        "must be an integer >= 1",
                    ));
                    None
                }
            },
        };

        let task = TaskDefinition {
            name: name.to_string(),
            description: str_key(map, "description"),
            private: bool_key(map, "private").unwrap_or(false),
            body: body?,
            params,
            target: str_key(map, "target").or_else(|| str_key(map, "targets")),
            parallel,
            max_concurrent,
            fail_fast,
            timeout,
            cache,
            env: env_key(map),
            cwd: str_key(map, "cwd"),
        };

        if self.issues.len() > before {
            None
        } else {
            Some(task)
        }
    }

    fn parse_body(&mut self, task: &str, map: &serde_yaml::Mapping) -> Option<TaskBody> {
        let command = map.get(Value::from("command"));
        let script = map.get(Value::from("script"));
        let steps = map.get(Value::from("steps"));

        let present = [command.is_some(), steps.is_some(), script.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if present != 1 {
            self.issues.push(ValidationIssue::new(
                task,
                "task must define exactly one of command, steps or script",
            ));
            return None;
        }

        if let Some(command) = command {
            return match command.as_str() {
                Some(s) => Some(TaskBody::Command(s.to_string())),
                None => {
                    self.issues
                        .push(ValidationIssue::field(task, "command", "must be a string"));
                    None
                }
            };
        }
        if let Some(script) = script {
            return match script.as_str() {
                Some(s) => Some(TaskBody::Script(s.to_string())),
                None => {
                    self.issues
                        .push(ValidationIssue::field(task, "script", "must be a string"));
                    None
                }
            };
        }

        let steps = steps.expect("exactly-one-of already checked");
        let Some(seq) = steps.as_sequence() else {
            self.issues
                .push(ValidationIssue::field(task, "steps", "must be a sequence"));
            return None;
        };
        let parsed: Vec<StepDefinition> = seq
            .iter()
            .enumerate()
            .filter_map(|(i, step)| self.parse_step(task, i, step))
            .collect();
        if parsed.len() != seq.len() {
            return None;
        }
        Some(TaskBody::Steps(parsed))
    }

    fn parse_step(&mut self, task: &str, index: usize, step: &Value) -> Option<StepDefinition> {
        let field = format!("steps[{}]", index);
        let before = self.issues.len();

        if let Some(command) = step.as_str() {
            return Some(StepDefinition {
                name: None,
                action: StepAction::Command(command.to_string()),
                target: None,
                targets: None,
                on_failure: OnFailure::Fail,
                timeout: None,
                params: Value::Null,
            });
        }

        let Some(map) = step.as_mapping() else {
            self.issues.push(ValidationIssue::field(
                task,
                field,
                "step must be a string or a mapping",
            ));
            return None;
        };

        let command = str_key(map, "command");
        let task_ref = str_key(map, "task");
        let script = str_key(map, "script");
        let present = [command.is_some(), task_ref.is_some(), script.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        let action = if present != 1 {
            self.issues.push(ValidationIssue::field(
                task,
                field.clone(),
                "step must define exactly one of command, task or script",
            ));
            None
        } else if let Some(command) = command {
            Some(StepAction::Command(command))
        } else if let Some(task_ref) = task_ref {
            Some(StepAction::Task(task_ref))
        } else {
            script.map(StepAction::Script)
        };

        let target = str_key(map, "target");
        let targets = str_key(map, "targets");
        if target.is_some() && targets.is_some() {
            self.issues.push(ValidationIssue::field(
                task,
                field.clone(),
                "step must not declare both target and targets",
            ));
        }

        let on_failure = self.parse_on_failure(task, &field, map.get(Value::from("onFailure")));
        let timeout = self.parse_timeout(
            task,
            format!("{}.timeout", field),
            map.get(Value::from("timeout")),
        );

        let step = StepDefinition {
            name: str_key(map, "name"),
            action: action?,
            target,
            targets,
            on_failure,
            timeout,
            params: map.get(Value::from("params")).cloned().unwrap_or(Value::Null),
        };

        if self.issues.len() > before {
            None
        } else {
            Some(step)
        }
    }

    fn parse_on_failure(&mut self, task: &str, field: &str, value: Option<&Value>) -> OnFailure {
        let Some(value) = value else {
            return OnFailure::Fail;
        };

        if value.as_str() == Some("continue") {
            return OnFailure::Continue;
        }

        if let Some(map) = value.as_mapping() {
            let retry = match map.get(Value::from("retry")).and_then(Value::as_i64) {
                Some(n) if n >= 0 => n as u32,
                _ => {
                    self.issues.push(ValidationIssue::field(
                        task,
                        format!("{}.onFailure", field),
                        "retry must be a non-negative integer",
                    ));
                    return OnFailure::Fail;
                }
            };
            let delay = map
                .get(Value::from("delay"))
                .and_then(parse_duration)
                .unwrap_or(Duration::ZERO);
            return OnFailure::Retry { retry, delay };
        }

        self.issues.push(ValidationIssue::field(
            task,
            format!("{}.onFailure", field),
            "must be 'continue' or a {retry, delay} mapping",
        ));
        OnFailure::Fail
    }

    fn parse_timeout(
        &mut self,
        task: &str,
        field: String,
        value: Option<&Value>,
    ) -> Option<Duration> {
        let value = value?;
        match parse_duration(value) {
            Some(d) if !d.is_zero() => Some(d),
            _ => {
                self.issues.push(ValidationIssue::field(
                    task,
                    field,
                    "must be a positive number of milliseconds or a duration string",
                ));
                None
            }
        }
    }

    fn parse_cache(&mut self, task: &str, value: Option<&Value>) -> Option<CacheSpec> {
        let value = value?;
        let Some(map) = value.as_mapping() else {
            self.issues
                .push(ValidationIssue::field(task, "cache", "must be a mapping"));
            return None;
        };

        let key = match str_key(map, "key") {
            Some(key) if !key.is_empty() => key,
            _ => {
                self.issues
                    .push(ValidationIssue::field(task, "cache.key", "must be non-empty"));
                return None;
            }
        };

        let ttl = match map.get(Value::from("ttl")) {
            None => None,
            Some(v) => match parse_duration(v) {
                Some(d) if !d.is_zero() => Some(d),
                _ => {
                    self.issues
                        .push(ValidationIssue::field(task, "cache.ttl", "must be positive"));
                    return None;
                }
            },
        };

        Some(CacheSpec { key, ttl })
    }

    fn parse_params(&mut self, task: &str, value: Option<&Value>) -> Vec<ParamDefinition> {
        let Some(seq) = value.and_then(Value::as_sequence) else {
            if value.is_some_and(|v| !v.is_null()) && value.and_then(Value::as_sequence).is_none() {
                self.issues
                    .push(ValidationIssue::field(task, "params", "must be a sequence"));
            }
            return Vec::new();
        };

        let mut params = Vec::new();
        let mut names: HashSet<String> = HashSet::new();

        for (i, entry) in seq.iter().enumerate() {
            let field = format!("params[{}]", i);
            let Some(map) = entry.as_mapping() else {
                self.issues
                    .push(ValidationIssue::field(task, field, "must be a mapping"));
                continue;
            };

            let Some(name) = str_key(map, "name") else {
                self.issues
                    .push(ValidationIssue::field(task, field, "parameter needs a name"));
                continue;
            };
            if !names.insert(name.clone()) {
                self.issues.push(ValidationIssue::field(
                    task,
                    "params",
                    format!("duplicate parameter name '{}'", name),
                ));
                continue;
            }

            let type_name = str_key(map, "type").unwrap_or_else(|| "string".to_string());
            let Some(param_type) = ParamType::parse(&type_name) else {
                self.issues.push(ValidationIssue::field(
                    task,
                    format!("params.{}", name),
                    format!("unknown type '{}'", type_name),
                ));
                continue;
            };

            let values: Vec<Value> = map
                .get(Value::from("values"))
                .and_then(Value::as_sequence)
                .cloned()
                .unwrap_or_default();
            if param_type == ParamType::Enum && values.is_empty() {
                self.issues.push(ValidationIssue::field(
                    task,
                    format!("params.{}", name),
                    "enum parameter must declare values",
                ));
                continue;
            }

            let default = map.get(Value::from("default")).cloned();
            if let Some(default) = &default {
                if !default_matches(param_type, default, &values) {
                    self.issues.push(ValidationIssue::field(
                        task,
                        format!("params.{}", name),
                        format!("default does not match declared type '{}'", param_type.as_str()),
                    ));
                    continue;
                }
            }

            params.push(ParamDefinition {
                name,
                param_type,
                required: bool_key(map, "required").unwrap_or(false),
                default,
                values,
                min: map.get(Value::from("min")).and_then(Value::as_f64),
                max: map.get(Value::from("max")).and_then(Value::as_f64),
                min_items: map
                    .get(Value::from("minItems"))
                    .and_then(Value::as_u64)
                    .map(|n| n as usize),
                max_items: map
                    .get(Value::from("maxItems"))
                    .and_then(Value::as_u64)
                    .map(|n| n as usize),
                pattern: str_key(map, "pattern"),
                description: str_key(map, "description"),
            });
        }

        params
    }
}

impl Default for TaskParser {
    fn default() -> Self {
        Self::new()
    }
}

fn default_matches(param_type: ParamType, default: &Value, values: &[Value]) -> bool {
    match param_type {
        ParamType::String => default.is_string(),
        ParamType::Number => default.is_number(),
        ParamType::Boolean => default.is_bool(),
        ParamType::Array => default.is_sequence(),
        ParamType::Enum => values.contains(default),
    }
}

fn str_key(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(Value::from(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn bool_key(map: &serde_yaml::Mapping, key: &str) -> Option<bool> {
    map.get(Value::from(key)).and_then(Value::as_bool)
}

fn env_key(map: &serde_yaml::Mapping) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if let Some(entries) = map.get(Value::from("env")).and_then(Value::as_mapping) {
        for (key, value) in entries {
            let (Some(key), Some(value)) = (key.as_str(), scalar_to_string(value)) else {
                continue;
            };
            env.insert(key.to_string(), value);
        }
    }
    env
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
