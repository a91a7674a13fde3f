//! Typed task entities reconstructed from the loose configuration tree

use std::collections::HashMap;
use std::time::Duration;

use serde_yaml::Value;

/// Recognized parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Enum,
}

impl ParamType {
    pub fn parse(s: &str) -> Option<ParamType> {
        match s {
            "string" => Some(ParamType::String),
            "number" => Some(ParamType::Number),
            "boolean" => Some(ParamType::Boolean),
            "array" => Some(ParamType::Array),
            "enum" => Some(ParamType::Enum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Enum => "enum",
        }
    }
}

/// One declared task parameter
#[derive(Debug, Clone)]
pub struct ParamDefinition {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    /// Allowed values for `enum` parameters
    pub values: Vec<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    /// Regex the coerced string value must match
    pub pattern: Option<String>,
    pub description: Option<String>,
}

/// Per-step recovery rule
#[derive(Debug, Clone, PartialEq)]
pub enum OnFailure {
    /// Step failure fails the task
    Fail,
    /// Step failure is recorded but non-fatal
    Continue,
    /// Re-attempt up to `retry` additional times, sleeping `delay` between
    Retry { retry: u32, delay: Duration },
}

impl Default for OnFailure {
    fn default() -> Self {
        OnFailure::Fail
    }
}

/// What a step actually does
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Command(String),
    /// Dispatch back through the task registry
    Task(String),
    Script(String),
}

/// One unit of work within a multi-step task
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub name: Option<String>,
    pub action: StepAction,
    /// Single target reference, authoritative when present
    pub target: Option<String>,
    /// Fan-out pattern; the step runs once per matched target
    pub targets: Option<String>,
    pub on_failure: OnFailure,
    pub timeout: Option<Duration>,
    /// Parameters forwarded to a `task:` step
    pub params: Value,
}

/// The exactly-one-of body of a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskBody {
    Command(String),
    Script(String),
    Steps(Vec<StepDefinition>),
}

/// Result caching declaration
#[derive(Debug, Clone)]
pub struct CacheSpec {
    pub key: String,
    pub ttl: Option<Duration>,
}

/// A fully parsed task
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Hidden from listings, still runnable by name
    pub private: bool,
    pub body: TaskBody,
    pub params: Vec<ParamDefinition>,
    /// Default target for steps that declare none
    pub target: Option<String>,
    pub parallel: bool,
    pub max_concurrent: Option<usize>,
    pub fail_fast: bool,
    pub timeout: Option<Duration>,
    pub cache: Option<CacheSpec>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

/// Lifecycle state shared by tasks and steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub state: RunState,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Failure was a timeout rather than a non-zero exit
    pub timed_out: bool,
    /// Attempts actually made, including retries
    pub attempts: u32,
}

impl StepResult {
    pub fn pending(name: impl Into<String>) -> Self {
        StepResult {
            name: name.into(),
            state: RunState::Pending,
            output: None,
            error: None,
            timed_out: false,
            attempts: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }
}

/// Outcome of one task run
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<StepResult>,
}

impl TaskResult {
    pub fn failed(error: impl Into<String>) -> Self {
        TaskResult {
            success: false,
            output: None,
            error: Some(error.into()),
            steps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_round_trip() {
        for name in ["string", "number", "boolean", "array", "enum"] {
            assert_eq!(ParamType::parse(name).unwrap().as_str(), name);
        }
        assert!(ParamType::parse("object").is_none());
    }

    #[test]
    fn test_on_failure_defaults_to_fail() {
        assert_eq!(OnFailure::default(), OnFailure::Fail);
    }

    #[test]
    fn test_run_state_names() {
        assert_eq!(RunState::Pending.as_str(), "pending");
        assert_eq!(RunState::Failed.as_str(), "failed");
    }
}
