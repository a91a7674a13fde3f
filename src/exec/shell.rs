//! Local shell command runner

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ExecutionError, ExecutionResult};

use super::{CommandRunner, ExecOutput, Invocation};

/// Runs commands through a local shell interpreter.
///
/// This is the default [`CommandRunner`]: remote transports (SSH sessions,
/// container execs, pod execs) are supplied by the embedding application.
/// The resolved target is carried on the invocation for those runners; this
/// one only looks at the command line.
pub struct ShellRunner {
    /// Interpreter vector, e.g. `["sh", "-c"]`
    interpreter: Vec<String>,
}

impl ShellRunner {
    pub fn new() -> Self {
        ShellRunner {
            interpreter: vec!["sh".to_string(), "-c".to_string()],
        }
    }

    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.interpreter = interpreter;
        self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, invocation: &Invocation) -> ExecutionResult<ExecOutput> {
        let mut command = Command::new(&self.interpreter[0]);
        if self.interpreter.len() > 1 {
            command.args(&self.interpreter[1..]);
        }
        command.arg(&invocation.command);

        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        command.kill_on_drop(true);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let child = command
            .spawn()
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecutionError::Timeout(limit.as_millis()))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
