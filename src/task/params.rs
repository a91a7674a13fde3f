//! Parameter validation and coercion
//!
//! Incoming values are loose (CLI arguments arrive as strings), so each
//! declared parameter coerces its value to the declared type before the
//! constraints run. A missing required parameter fails here, before any
//! step executes.

use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::error::{ExecutionError, ExecutionResult};
use crate::task::types::{ParamDefinition, ParamType};

/// Validate and coerce the provided values against the declared
/// parameters, returning the effective parameter mapping
pub fn resolve_params(defs: &[ParamDefinition], provided: &Value) -> ExecutionResult<Value> {
    let empty = Mapping::new();
    let provided = provided.as_mapping().unwrap_or(&empty);
    let mut resolved = Mapping::new();

    for def in defs {
        let incoming = provided.get(Value::from(def.name.as_str()));

        let value = match incoming {
            Some(value) => coerce(def, value)?,
            None => match &def.default {
                Some(default) => default.clone(),
                None if def.required => {
                    return Err(ExecutionError::MissingParam(def.name.clone()));
                }
                None => continue,
            },
        };

        validate(def, &value)?;
        resolved.insert(Value::from(def.name.as_str()), value);
    }

    // Undeclared values pass through untouched
    for (key, value) in provided {
        if !resolved.contains_key(key) {
            resolved.insert(key.clone(), value.clone());
        }
    }

    Ok(Value::Mapping(resolved))
}

/// Map a loose value onto the declared type
fn coerce(def: &ParamDefinition, value: &Value) -> ExecutionResult<Value> {
    let invalid = |message: String| ExecutionError::InvalidParam {
        name: def.name.clone(),
        message,
    };

    match def.param_type {
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::from(n.to_string())),
            Value::Bool(b) => Ok(Value::from(b.to_string())),
            _ => Err(invalid("expected a string".to_string())),
        },
        ParamType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => {
                if let Ok(n) = s.trim().parse::<i64>() {
                    Ok(Value::from(n))
                } else if let Ok(f) = s.trim().parse::<f64>() {
                    Ok(Value::from(f))
                } else {
                    Err(invalid(format!("'{}' is not a number", s)))
                }
            }
            _ => Err(invalid("expected a number".to_string())),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim() {
                "true" | "yes" | "1" => Ok(Value::from(true)),
                "false" | "no" | "0" => Ok(Value::from(false)),
                other => Err(invalid(format!("'{}' is not a boolean", other))),
            },
            _ => Err(invalid("expected a boolean".to_string())),
        },
        ParamType::Array => match value {
            Value::Sequence(_) => Ok(value.clone()),
            Value::String(s) => Ok(Value::Sequence(
                s.split(',')
                    .map(|part| Value::from(part.trim()))
                    .collect(),
            )),
            _ => Err(invalid("expected an array".to_string())),
        },
        // Enum values keep their declared representation
        ParamType::Enum => Ok(value.clone()),
    }
}

/// Run the declared constraints against the coerced value
fn validate(def: &ParamDefinition, value: &Value) -> ExecutionResult<()> {
    let invalid = |message: String| ExecutionError::InvalidParam {
        name: def.name.clone(),
        message,
    };

    if def.param_type == ParamType::Enum && !def.values.contains(value) {
        return Err(invalid(format!(
            "must be one of: {}",
            def.values
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = def.min {
            if n < min {
                return Err(invalid(format!("{} is below the minimum {}", n, min)));
            }
        }
        if let Some(max) = def.max {
            if n > max {
                return Err(invalid(format!("{} is above the maximum {}", n, max)));
            }
        }
    }

    if let Some(items) = value.as_sequence() {
        if let Some(min_items) = def.min_items {
            if items.len() < min_items {
                return Err(invalid(format!("needs at least {} item(s)", min_items)));
            }
        }
        if let Some(max_items) = def.max_items {
            if items.len() > max_items {
                return Err(invalid(format!("allows at most {} item(s)", max_items)));
            }
        }
    }

    if let (Some(pattern), Some(s)) = (&def.pattern, value.as_str()) {
        let re = Regex::new(pattern)
            .map_err(|e| invalid(format!("invalid pattern '{}': {}", pattern, e)))?;
        if !re.is_match(s) {
            return Err(invalid(format!("'{}' does not match pattern '{}'", s, pattern)));
        }
    }

    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
