//! Task execution
//!
//! Runs one parsed task to completion: parameter preconditions, command
//! interpolation, target binding, step sequencing (sequential or bounded
//! parallel), per-step failure policy and timeout enforcement. Execution
//! failures land in the returned `TaskResult`; only parameter
//! preconditions and task cycles surface as errors.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_yaml::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{is_timeout, ExecutionError, ExecutionResult};
use crate::exec::{CommandRunner, Invocation};
use crate::target::TargetResolver;
use crate::task::params::resolve_params;
use crate::task::types::{
    OnFailure, RunState, StepAction, StepDefinition, StepResult, TaskBody, TaskDefinition,
    TaskResult,
};
use crate::utils::{get_path, parse_memory_size};
use crate::vars::{Interpolator, VariableContext};

/// Outcome of one step attempt, before retry accounting
struct Outcome {
    success: bool,
    output: Option<String>,
    error: Option<String>,
    timed_out: bool,
}

impl Outcome {
    fn ok(output: Option<String>) -> Self {
        Outcome {
            success: true,
            output,
            error: None,
            timed_out: false,
        }
    }

    fn failed(error: String, timed_out: bool) -> Self {
        Outcome {
            success: false,
            output: None,
            error: Some(error),
            timed_out,
        }
    }
}

pub struct TaskExecutor {
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<TargetResolver>,
    interpolator: Arc<Interpolator>,
}

impl TaskExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<TargetResolver>,
        interpolator: Arc<Interpolator>,
    ) -> Self {
        TaskExecutor {
            runner,
            resolver,
            interpolator,
        }
    }

    /// Run one task by name against the parsed registry.
    ///
    /// `Err` is reserved for preconditions (parameter violations, task
    /// cycles); everything that happens during execution is reported in
    /// the `TaskResult`.
    pub async fn execute(
        &self,
        name: &str,
        tasks: &BTreeMap<String, TaskDefinition>,
        params: &Value,
        ctx: &VariableContext,
    ) -> ExecutionResult<TaskResult> {
        self.execute_inner(name, tasks, params, ctx, Vec::new())
            .await
    }

    fn execute_inner<'a>(
        &'a self,
        name: &'a str,
        tasks: &'a BTreeMap<String, TaskDefinition>,
        params: &'a Value,
        ctx: &'a VariableContext,
        mut stack: Vec<String>,
    ) -> BoxFuture<'a, ExecutionResult<TaskResult>> {
        Box::pin(async move {
            if stack.iter().any(|s| s == name) {
                stack.push(name.to_string());
                return Err(ExecutionError::TaskCycle(stack.join(" -> ")));
            }

            let Some(def) = tasks.get(name) else {
                return Ok(TaskResult::failed(format!("Task '{}' is not defined", name)));
            };

            let resolved = resolve_params(&def.params, params)?;
            let ctx = ctx.clone().with_params(resolved);
            stack.push(name.to_string());

            debug!(task = %name, "Task starting");
            let result = match &def.body {
                TaskBody::Command(command) | TaskBody::Script(command) => {
                    let outcome = self
                        .run_on_target(def, command, def.target.as_deref(), def.timeout, &ctx)
                        .await;
                    TaskResult {
                        success: outcome.success,
                        output: outcome.output,
                        error: outcome.error,
                        steps: Vec::new(),
                    }
                }
                TaskBody::Steps(steps) => {
                    self.run_steps(def, steps, tasks, &ctx, &stack).await
                }
            };

            debug!(task = %name, success = result.success, "Task finished");
            Ok(result)
        })
    }

    async fn run_steps(
        &self,
        def: &TaskDefinition,
        steps: &[StepDefinition],
        tasks: &BTreeMap<String, TaskDefinition>,
        ctx: &VariableContext,
        stack: &[String],
    ) -> TaskResult {
        let results: Mutex<Vec<StepResult>> = Mutex::new(
            steps
                .iter()
                .enumerate()
                .map(|(i, s)| StepResult::pending(step_label(s, i)))
                .collect(),
        );

        let run = async {
            if def.parallel {
                self.run_steps_parallel(def, steps, tasks, ctx, stack, &results)
                    .await
            } else {
                self.run_steps_sequential(def, steps, tasks, ctx, stack, &results)
                    .await
            }
        };

        let timeout_error = match def.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .err()
                .map(|_| ExecutionError::Timeout(limit.as_millis()).to_string()),
            None => {
                run.await;
                None
            }
        };

        let results = results.into_inner().unwrap_or_else(|e| e.into_inner());

        if let Some(error) = timeout_error {
            // Steps that finished keep their results; unfinished ones stay
            // pending
            return TaskResult {
                success: false,
                output: None,
                error: Some(error),
                steps: results,
            };
        }

        let success = results
            .iter()
            .zip(steps)
            .all(|(result, step)| step_counts_as_success(result, step));
        let error = results
            .iter()
            .find(|r| r.state == RunState::Failed)
            .and_then(|r| r.error.clone());

        TaskResult {
            success,
            output: None,
            error: if success { None } else { error },
            steps: results,
        }
    }

    async fn run_steps_sequential(
        &self,
        def: &TaskDefinition,
        steps: &[StepDefinition],
        tasks: &BTreeMap<String, TaskDefinition>,
        ctx: &VariableContext,
        stack: &[String],
        results: &Mutex<Vec<StepResult>>,
    ) {
        for (i, step) in steps.iter().enumerate() {
            let result = self.run_step(def, step, i, tasks, ctx, stack).await;
            let fatal = result.state == RunState::Failed
                && !matches!(step.on_failure, OnFailure::Continue);
            lock_results(results)[i] = result;
            if fatal {
                // Remaining steps stay pending
                break;
            }
        }
    }

    async fn run_steps_parallel(
        &self,
        def: &TaskDefinition,
        steps: &[StepDefinition],
        tasks: &BTreeMap<String, TaskDefinition>,
        ctx: &VariableContext,
        stack: &[String],
        results: &Mutex<Vec<StepResult>>,
    ) {
        let limit = def.max_concurrent.unwrap_or_else(|| steps.len().max(1));
        let semaphore = Arc::new(Semaphore::new(limit));
        let stop = Arc::new(AtomicBool::new(false));

        let mut futures = FuturesUnordered::new();
        for (i, step) in steps.iter().enumerate() {
            let semaphore = semaphore.clone();
            let stop = stop.clone();
            futures.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (i, None);
                };
                if def.fail_fast && stop.load(Ordering::SeqCst) {
                    // Never launched; reported as pending
                    return (i, None);
                }
                let result = self.run_step(def, step, i, tasks, ctx, stack).await;
                if result.state == RunState::Failed
                    && !matches!(step.on_failure, OnFailure::Continue)
                {
                    stop.store(true, Ordering::SeqCst);
                }
                (i, Some(result))
            });
        }

        while let Some((i, result)) = futures.next().await {
            if let Some(result) = result {
                lock_results(results)[i] = result;
            }
        }
    }

    async fn run_step(
        &self,
        def: &TaskDefinition,
        step: &StepDefinition,
        index: usize,
        tasks: &BTreeMap<String, TaskDefinition>,
        ctx: &VariableContext,
        stack: &[String],
    ) -> StepResult {
        let label = step_label(step, index);
        let (retries, delay) = match step.on_failure {
            OnFailure::Retry { retry, delay } => (retry, delay),
            _ => (0, std::time::Duration::ZERO),
        };

        let mut attempts = 0;
        let mut outcome = Outcome::failed("step never ran".to_string(), false);
        while attempts <= retries {
            if attempts > 0 {
                // The delay is a real wait between attempts
                tokio::time::sleep(delay).await;
            }
            attempts += 1;
            outcome = self.run_step_once(def, step, tasks, ctx, stack).await;
            if outcome.success {
                break;
            }
            if attempts <= retries {
                warn!(step = %label, attempt = attempts, "Step failed, retrying");
            }
        }

        StepResult {
            name: label,
            state: if outcome.success {
                RunState::Succeeded
            } else {
                RunState::Failed
            },
            output: outcome.output,
            error: outcome.error,
            timed_out: outcome.timed_out,
            attempts,
        }
    }

    async fn run_step_once(
        &self,
        def: &TaskDefinition,
        step: &StepDefinition,
        tasks: &BTreeMap<String, TaskDefinition>,
        ctx: &VariableContext,
        stack: &[String],
    ) -> Outcome {
        match &step.action {
            StepAction::Command(command) | StepAction::Script(command) => {
                if let Some(pattern) = &step.targets {
                    return self.run_fanned_out(def, step, command, pattern, ctx).await;
                }
                let target_ref = step.target.as_deref().or(def.target.as_deref());
                self.run_on_target(def, command, target_ref, step.timeout, ctx)
                    .await
            }
            StepAction::Task(task_name) => {
                let params = match self.interpolator.interpolate_async(&step.params, ctx).await {
                    Ok(params) => params,
                    Err(e) => return Outcome::failed(e.to_string(), false),
                };
                let dispatch = self.execute_inner(task_name, tasks, &params, ctx, stack.to_vec());
                let dispatched = match step.timeout {
                    Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                        Ok(result) => result,
                        Err(_) => {
                            return Outcome::failed(
                                ExecutionError::Timeout(limit.as_millis()).to_string(),
                                true,
                            )
                        }
                    },
                    None => dispatch.await,
                };
                match dispatched {
                    Ok(result) => Outcome {
                        success: result.success,
                        output: result.output,
                        error: result.error,
                        timed_out: false,
                    },
                    Err(e) => Outcome::failed(e.to_string(), false),
                }
            }
        }
    }

    /// Run a command once per target matched by a fan-out pattern; the
    /// step succeeds only if every target run succeeds
    async fn run_fanned_out(
        &self,
        def: &TaskDefinition,
        step: &StepDefinition,
        command: &str,
        pattern: &str,
        ctx: &VariableContext,
    ) -> Outcome {
        let targets = match self.resolver.find(pattern).await {
            Ok(targets) => targets,
            Err(e) => return Outcome::failed(e.to_string(), false),
        };
        if targets.is_empty() {
            return Outcome::failed(format!("no targets match '{}'", pattern), false);
        }

        let mut outputs = Vec::new();
        for target in targets {
            let outcome = self
                .run_on_target(def, command, Some(&target.id), step.timeout, ctx)
                .await;
            if !outcome.success {
                return outcome;
            }
            if let Some(output) = outcome.output {
                outputs.push(output);
            }
        }
        Outcome::ok(Some(outputs.join("\n")))
    }

    async fn run_on_target(
        &self,
        def: &TaskDefinition,
        command: &str,
        target_ref: Option<&str>,
        timeout: Option<std::time::Duration>,
        ctx: &VariableContext,
    ) -> Outcome {
        let command = match self
            .interpolator
            .interpolate_async(&Value::from(command), ctx)
            .await
        {
            Ok(value) => render_scalar(&value),
            Err(e) => return Outcome::failed(e.to_string(), false),
        };

        let target = match self.resolver.resolve(target_ref.unwrap_or("local")).await {
            Ok(target) => target,
            Err(e) => return Outcome::failed(e.to_string(), false),
        };
        let lenient_exit = get_path(&target.config, "throwOnNonZeroExit")
            .and_then(Value::as_bool)
            .map(|throw| !throw)
            .unwrap_or(false);
        let max_buffer = get_path(&target.config, "maxBuffer").and_then(max_buffer_bytes);

        let mut invocation = Invocation::new(command)
            .with_env(def.env.clone())
            .with_timeout(timeout)
            .with_target(target);
        if let Some(cwd) = &def.cwd {
            invocation = invocation.with_cwd(cwd.into());
        }

        match self.runner.run(&invocation).await {
            Ok(output) => {
                let success = output.success() || lenient_exit;
                let mut stdout = output.stdout.trim_end().to_string();
                if let Some(limit) = max_buffer {
                    stdout.truncate(floor_char_boundary(&stdout, limit as usize));
                }
                Outcome {
                    success,
                    output: Some(stdout),
                    error: if success {
                        None
                    } else {
                        Some(command_failure_message(&output))
                    },
                    timed_out: false,
                }
            }
            Err(e) => {
                let timed_out = is_timeout(&e);
                Outcome::failed(e.to_string(), timed_out)
            }
        }
    }
}

fn lock_results(results: &Mutex<Vec<StepResult>>) -> MutexGuard<'_, Vec<StepResult>> {
    results.lock().unwrap_or_else(|e| e.into_inner())
}

/// A `maxBuffer` value is either a suffixed size string or bare bytes
fn max_buffer_bytes(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => parse_memory_size(s),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Largest index <= limit that lands on a UTF-8 character boundary
fn floor_char_boundary(s: &str, limit: usize) -> usize {
    if limit >= s.len() {
        return s.len();
    }
    let mut at = limit;
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

fn step_label(step: &StepDefinition, index: usize) -> String {
    match &step.name {
        Some(name) => name.clone(),
        None => format!("step {}", index + 1),
    }
}

fn step_counts_as_success(result: &StepResult, step: &StepDefinition) -> bool {
    match result.state {
        RunState::Succeeded => true,
        RunState::Failed => matches!(step.on_failure, OnFailure::Continue),
        _ => false,
    }
}

fn command_failure_message(output: &crate::exec::ExecOutput) -> String {
    let base = ExecutionError::CommandFailed(output.exit_code).to_string();
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        base
    } else {
        format!("{}: {}", base, stderr)
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
