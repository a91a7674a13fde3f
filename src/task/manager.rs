//! Task registry façade
//!
//! Ties the configuration, parser and executor together: CRUD over the
//! `tasks` section (persisted through the configuration), lifecycle
//! events on a broadcast channel, a dry-run explainer and a parse cache.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_yaml::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ConfigManager;
use crate::error::{Result, TaskError};
use crate::exec::{BackendProbe, CommandRunner, EnvSecrets, SecretProvider};
use crate::target::TargetResolver;
use crate::task::executor::TaskExecutor;
use crate::task::params::resolve_params;
use crate::task::parser::TaskParser;
use crate::task::types::{StepAction, TaskBody, TaskDefinition, TaskResult};
use crate::vars::Interpolator;

/// Lifecycle notifications emitted around every run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started { task: String, params: Value },
    Completed { task: String, result: TaskResult },
}

/// One row of `list()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub name: String,
    pub description: Option<String>,
}

pub struct TaskManager {
    config: ConfigManager,
    executor: TaskExecutor,
    events: broadcast::Sender<TaskEvent>,
    parsed: Mutex<Option<Arc<BTreeMap<String, TaskDefinition>>>>,
}

impl TaskManager {
    pub fn new(
        config: ConfigManager,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn BackendProbe>,
    ) -> Self {
        let secrets_config = config.secrets();
        if secrets_config.provider != "env" {
            tracing::warn!(
                provider = %secrets_config.provider,
                "Secret provider is supplied by the embedding application; using the environment fallback"
            );
        }
        let secrets: Arc<dyn SecretProvider> =
            Arc::new(EnvSecrets::new(config.env().clone()));
        let resolver = Arc::new(TargetResolver::new(config.targets(), probe));
        let interpolator = Arc::new(
            Interpolator::new()
                .with_runner(runner.clone())
                .with_secrets(secrets),
        );
        let executor = TaskExecutor::new(runner, resolver, interpolator);
        let (events, _) = broadcast::channel(64);

        TaskManager {
            config,
            executor,
            events,
            parsed: Mutex::new(None),
        }
    }

    /// Subscribe to `task:start` / `task:complete` events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// All visible tasks; `private` tasks are omitted
    pub fn list(&self) -> Result<Vec<TaskSummary>> {
        let tasks = self.parsed_tasks()?;
        Ok(tasks
            .values()
            .filter(|task| !task.private)
            .map(|task| TaskSummary {
                name: task.name.clone(),
                description: task.description.clone(),
            })
            .collect())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.raw_task(name).is_some()
    }

    pub fn get(&self, name: &str) -> Result<TaskDefinition> {
        let tasks = self.parsed_tasks()?;
        tasks
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(name.to_string()).into())
    }

    /// Add a new task and persist the configuration
    pub fn create(&mut self, name: &str, definition: Value) -> Result<()> {
        if self.exists(name) {
            return Err(TaskError::AlreadyExists(name.to_string()).into());
        }
        self.put_task(name, definition)
    }

    /// Replace an existing task and persist the configuration
    pub fn update(&mut self, name: &str, definition: Value) -> Result<()> {
        if !self.exists(name) {
            return Err(TaskError::NotFound(name.to_string()).into());
        }
        self.put_task(name, definition)
    }

    /// Remove a task and persist the configuration
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let mut tasks = self.raw_tasks();
        if tasks.remove(Value::from(name)).is_none() {
            return Err(TaskError::NotFound(name.to_string()).into());
        }
        self.config.set("tasks", Value::Mapping(tasks))?;
        self.config.save(None)?;
        self.invalidate();
        Ok(())
    }

    /// Run a task by name, emitting lifecycle events around it
    pub async fn run(&self, name: &str, params: Value) -> Result<TaskResult> {
        let tasks = self.parsed_tasks()?;
        if !tasks.contains_key(name) {
            return Err(TaskError::NotFound(name.to_string()).into());
        }

        let _ = self.events.send(TaskEvent::Started {
            task: name.to_string(),
            params: params.clone(),
        });

        debug!(task = %name, "Dispatching task run");
        let ctx = self.config.variable_context();
        let result = self.executor.execute(name, &tasks, &params, &ctx).await?;

        let _ = self.events.send(TaskEvent::Completed {
            task: name.to_string(),
            result: result.clone(),
        });
        Ok(result)
    }

    /// Human-readable dry-run description; nothing executes
    pub fn explain(&self, name: &str, params: &Value) -> Result<String> {
        let task = self.get(name)?;
        let mut lines = Vec::new();

        lines.push(format!("Task: {}", task.name));
        if let Some(description) = &task.description {
            lines.push(format!("  {}", description));
        }

        if !task.params.is_empty() {
            lines.push("Parameters:".to_string());
            let resolved = resolve_params(&task.params, params);
            for def in &task.params {
                let binding = resolved
                    .as_ref()
                    .ok()
                    .and_then(|r| r.get(def.name.as_str()).cloned())
                    .map(|v| display_value(&v))
                    .unwrap_or_else(|| "<unset>".to_string());
                lines.push(format!("  {} = {}", def.name, binding));
            }
        }

        match &task.body {
            TaskBody::Command(command) => lines.push(format!("Command: {}", command)),
            TaskBody::Script(script) => {
                lines.push("Script:".to_string());
                for line in script.lines() {
                    lines.push(format!("  {}", line));
                }
            }
            TaskBody::Steps(steps) => {
                let mode = if task.parallel { " (parallel)" } else { "" };
                lines.push(format!("Steps{}:", mode));
                for (i, step) in steps.iter().enumerate() {
                    let what = match &step.action {
                        StepAction::Command(c) => format!("run: {}", c),
                        StepAction::Task(t) => format!("task: {}", t),
                        StepAction::Script(_) => "script".to_string(),
                    };
                    let on = match &step.target {
                        Some(target) => format!(" on {}", target),
                        None => step
                            .targets
                            .as_ref()
                            .map(|p| format!(" on targets '{}'", p))
                            .unwrap_or_default(),
                    };
                    lines.push(format!("  {}. {}{}", i + 1, what, on));
                }
            }
        }

        Ok(lines.join("\n"))
    }

    /// Drop the parsed-definition cache; the next call re-parses
    pub fn clear_cache(&self) {
        self.invalidate();
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    fn put_task(&mut self, name: &str, definition: Value) -> Result<()> {
        let mut parser = TaskParser::new();
        if parser.parse_task(name, &definition).is_none() {
            return Err(TaskError::Invalid(parser.errors().to_vec()).into());
        }

        let mut tasks = self.raw_tasks();
        tasks.insert(Value::from(name), definition);
        self.config.set("tasks", Value::Mapping(tasks))?;
        self.config.save(None)?;
        self.invalidate();
        Ok(())
    }

    fn parsed_tasks(&self) -> Result<Arc<BTreeMap<String, TaskDefinition>>> {
        let mut cache = self.cache_lock();
        if let Some(tasks) = cache.as_ref() {
            return Ok(tasks.clone());
        }

        let mut parser = TaskParser::new();
        let tasks = Arc::new(parser.parse_tasks(&self.config.tasks())?);
        *cache = Some(tasks.clone());
        Ok(tasks)
    }

    fn raw_tasks(&self) -> serde_yaml::Mapping {
        self.config
            .tasks()
            .as_mapping()
            .cloned()
            .unwrap_or_default()
    }

    fn raw_task(&self, name: &str) -> Option<Value> {
        self.raw_tasks().get(Value::from(name)).cloned()
    }

    fn invalidate(&self) {
        *self.cache_lock() = None;
    }

    fn cache_lock(&self) -> MutexGuard<'_, Option<Arc<BTreeMap<String, TaskDefinition>>>> {
        self.parsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecOutput, Invocation, NullProbe};
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    struct EchoRunner;

    #[async_trait::async_trait]
    impl CommandRunner for EchoRunner {
        async fn run(
            &self,
            invocation: &Invocation,
        ) -> crate::error::ExecutionResult<ExecOutput> {
            Ok(ExecOutput {
                exit_code: Some(0),
                stdout: invocation.command.clone(),
                stderr: String::new(),
            })
        }
    }

    fn write_config(dir: &Path, content: &str) {
        std::fs::write(dir.join("xec.yaml"), content).unwrap();
    }

    fn manager_in(dir: &TempDir) -> TaskManager {
        let mut config = ConfigManager::new()
            .with_project_dir(dir.path().to_path_buf())
            .without_global()
            .with_env(HashMap::new());
        config.load().unwrap();
        TaskManager::new(config, Arc::new(EchoRunner), Arc::new(NullProbe))
    }

    #[test]
    fn test_list_hides_private_tasks() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"
tasks:
  build: {command: make, description: build it}
  helper: {command: internal.sh, private: true}
"#,
        );

        let manager = manager_in(&dir);
        let summaries = manager.list().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "build");
        assert_eq!(summaries[0].description.as_deref(), Some("build it"));

        assert!(manager.exists("helper"));
        assert!(manager.get("helper").is_ok());
    }

    #[test]
    fn test_crud_persists_through_config() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "tasks: {build: 'make'}");

        let mut manager = manager_in(&dir);
        manager
            .create("test", serde_yaml::from_str("command: make test").unwrap())
            .unwrap();
        assert!(manager.exists("test"));

        // The change survived the save
        let saved = std::fs::read_to_string(dir.path().join("xec.yaml")).unwrap();
        assert!(saved.contains("make test"));

        manager
            .update("test", serde_yaml::from_str("command: cargo test").unwrap())
            .unwrap();
        assert!(manager.get("test").is_ok());

        manager.delete("test").unwrap();
        assert!(!manager.exists("test"));
    }

    #[test]
    fn test_create_rejects_duplicates_and_invalid() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "tasks: {build: 'make'}");

        let mut manager = manager_in(&dir);
        assert!(manager
            .create("build", Value::from("make again"))
            .is_err());
        assert!(manager
            .create("broken", serde_yaml::from_str("{command: a, script: b}").unwrap())
            .is_err());
        assert!(manager.update("ghost", Value::from("x")).is_err());
        assert!(manager.delete("ghost").is_err());
    }

    #[tokio::test]
    async fn test_run_emits_lifecycle_events() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "tasks: {greet: \"echo hello\"}");

        let manager = manager_in(&dir);
        let mut events = manager.subscribe();

        let result = manager
            .run("greet", serde_yaml::from_str("{}").unwrap())
            .await
            .unwrap();
        assert!(result.success);

        match events.try_recv().unwrap() {
            TaskEvent::Started { task, .. } => assert_eq!(task, "greet"),
            other => panic!("unexpected event: {other:?}"),
        }
        match events.try_recv().unwrap() {
            TaskEvent::Completed { task, result } => {
                assert_eq!(task, "greet");
                assert!(result.success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_unknown_task() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "tasks: {}");

        let manager = manager_in(&dir);
        let err = manager
            .run("ghost", serde_yaml::from_str("{}").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_run_interpolates_vars() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            "vars: {app: web}\ntasks: {show: 'echo ${vars.app}'}",
        );

        let manager = manager_in(&dir);
        let result = manager
            .run("show", serde_yaml::from_str("{}").unwrap())
            .await
            .unwrap();
        // Interpolation already happened at config load
        assert_eq!(result.output.as_deref(), Some("echo web"));
    }

    #[test]
    fn test_explain_describes_without_running() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"
tasks:
  deploy:
    description: ship it
    params:
      - {name: env, type: enum, values: [dev, prod], default: dev}
    steps:
      - {command: 'build.sh', target: local}
      - {task: notify}
  notify: {command: notify.sh}
"#,
        );

        let manager = manager_in(&dir);
        let text = manager
            .explain("deploy", &serde_yaml::from_str("{env: prod}").unwrap())
            .unwrap();

        assert!(text.contains("Task: deploy"));
        assert!(text.contains("ship it"));
        assert!(text.contains("env = prod"));
        assert!(text.contains("1. run: build.sh on local"));
        assert!(text.contains("2. task: notify"));
    }

    #[test]
    fn test_clear_cache_picks_up_config_edits() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "tasks: {build: 'make'}");

        let mut manager = manager_in(&dir);
        assert_eq!(manager.list().unwrap().len(), 1);

        manager
            .config
            .set(
                "tasks",
                serde_yaml::from_str("{build: make, test: 'make test'}").unwrap(),
            )
            .unwrap();
        manager.clear_cache();
        assert_eq!(manager.list().unwrap().len(), 2);
    }
}
