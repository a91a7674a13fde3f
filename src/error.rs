//! Error types for xec

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for xec operations
pub type Result<T> = std::result::Result<T, XecError>;

/// Main error type for xec
#[derive(Error, Debug)]
pub enum XecError {
    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Variable interpolation errors
    #[error("Interpolation error: {0}")]
    Interpolation(#[from] InterpolationError),

    /// Target resolution errors
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// Task definition errors
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Profile '{0}' is not defined")]
    ProfileNotFound(String),

    #[error("Cannot set value at '{path}': {message}")]
    InvalidPath { path: String, message: String },
}

/// Variable interpolation errors
#[derive(Error, Debug)]
pub enum InterpolationError {
    #[error("Maximum variable interpolation depth ({0}) exceeded")]
    DepthExceeded(usize),

    #[error("Circular variable reference: {0}")]
    CircularReference(String),

    #[error("Command substitution failed for '{command}': {message}")]
    CommandSubstitution { command: String, message: String },

    #[error("Secret '{0}' could not be resolved")]
    SecretUnavailable(String),
}

/// Target resolution errors
#[derive(Error, Debug)]
pub enum TargetError {
    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Target '{name}' is not defined in '{group}'")]
    NotFoundInGroup { group: String, name: String },

    #[error("Invalid target reference: {0}")]
    InvalidReference(String),

    #[error("Backend probe failed: {0}")]
    ProbeFailed(String),
}

/// Task definition errors
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task '{0}' is not defined")]
    NotFound(String),

    #[error("Task '{0}' already exists")]
    AlreadyExists(String),

    #[error("Failed to parse {} task(s):\n{}", .0.len(), format_issues(.0))]
    Invalid(Vec<ValidationIssue>),
}

/// A single structured validation problem found while parsing a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Task the problem belongs to
    pub task: String,

    /// Field within the task, when the problem is field-specific
    pub field: Option<String>,

    /// Human-readable description of the problem
    pub message: String,
}

impl ValidationIssue {
    pub fn new(task: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            task: task.into(),
            field: None,
            message: message.into(),
        }
    }

    pub fn field(task: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            task: task.into(),
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}: {}", self.task, field, self.message),
            None => write!(f, "{}: {}", self.task, self.message),
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Parameter '{0}' is required but was not provided")]
    MissingParam(String),

    #[error("Invalid value for parameter '{name}': {message}")]
    InvalidParam { name: String, message: String },

    #[error("Command failed with exit code {0:?}")]
    CommandFailed(Option<i32>),

    #[error("Timed out after {0}ms")]
    Timeout(u128),

    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    #[error("Task cycle detected: {0}")]
    TaskCycle(String),

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    #[error("Interpolation error: {0}")]
    Interpolation(#[from] InterpolationError),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for interpolation operations
pub type InterpolationResult<T> = std::result::Result<T, InterpolationError>;

/// Specialized result type for target resolution
pub type TargetResult<T> = std::result::Result<T, TargetError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Whether an execution error is a timeout (as opposed to a non-zero exit
/// or a spawn failure); callers distinguish the two failure flavors
pub fn is_timeout(err: &ExecutionError) -> bool {
    matches!(err, ExecutionError::Timeout(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_exceeded_message_names_bound() {
        let err = InterpolationError::DepthExceeded(10);
        assert_eq!(
            err.to_string(),
            "Maximum variable interpolation depth (10) exceeded"
        );
    }

    #[test]
    fn test_aggregate_task_error_lists_issues() {
        let err = TaskError::Invalid(vec![
            ValidationIssue::field("deploy", "params", "duplicate parameter name 'env'"),
            ValidationIssue::new(
                "deploy",
                "task must define exactly one of command, steps or script",
            ),
        ]);

        let text = err.to_string();
        assert!(text.contains("2 task(s)"));
        assert!(text.contains("deploy.params"));
        assert!(text.contains("exactly one of"));
    }

    #[test]
    fn test_is_timeout() {
        assert!(is_timeout(&ExecutionError::Timeout(5000)));
        assert!(!is_timeout(&ExecutionError::CommandFailed(Some(1))));
    }
}
