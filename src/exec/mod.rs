//! Execution collaborators consumed by the core
//!
//! The core never talks to a shell, an SSH daemon, Docker or Kubernetes
//! directly. It consumes three narrow contracts: a command runner, a secret
//! provider and a backend probe. Default local implementations live here;
//! tests swap in deterministic mocks.

pub mod probe;
pub mod secrets;
pub mod shell;

pub use probe::{BackendProbe, CliProbe, NullProbe};
pub use secrets::{secret_env_key, EnvSecrets, SecretProvider};
pub use shell::ShellRunner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecutionResult;
use crate::target::Target;

/// Result of one external command execution
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Process exit code, if the process ran to completion
    pub exit_code: Option<i32>,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Everything a runner needs to execute one command
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Shell command line to execute
    pub command: String,

    /// Resolved target the command is bound to
    pub target: Option<Target>,

    /// Working directory
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Hard deadline for the execution
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(command: impl Into<String>) -> Self {
        Invocation {
            command: command.into(),
            target: None,
            cwd: None,
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Command execution contract consumed by the executor and the
/// interpolator's `cmd:` substitution
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> ExecutionResult<ExecOutput>;
}
