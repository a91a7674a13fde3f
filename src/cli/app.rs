//! Main CLI application

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use serde_yaml::{Mapping, Value};

use crate::config::ConfigManager;
use crate::error::{ExecutionError, Result, XecError};
use crate::exec::{CliProbe, ShellRunner};
use crate::task::TaskManager;

/// Build the clap command tree
pub fn build_command() -> Command {
    Command::new("xec")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Configuration-driven task runner for local, SSH, Docker and Kubernetes targets")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the project config file")
                .global(true),
        )
        .arg(
            Arg::new("profile")
                .short('p')
                .long("profile")
                .value_name("NAME")
                .help("Activate a configuration profile")
                .global(true),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Treat configuration problems as fatal")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("list").about("List available tasks"))
        .subcommand(
            Command::new("run")
                .about("Run a task")
                .arg(Arg::new("task").required(true).help("Task name"))
                .arg(
                    Arg::new("param")
                        .long("param")
                        .value_name("NAME=VALUE")
                        .help("Task parameter, repeatable")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("explain")
                .about("Describe what a task would do, without running it")
                .arg(Arg::new("task").required(true).help("Task name"))
                .arg(
                    Arg::new("param")
                        .long("param")
                        .value_name("NAME=VALUE")
                        .help("Task parameter, repeatable")
                        .action(ArgAction::Append),
                ),
        )
}

/// Parse arguments and dispatch
pub async fn run() -> Result<()> {
    let mut command = build_command();
    let matches = command.clone().get_matches();

    let Some((name, sub)) = matches.subcommand() else {
        command.print_help()?;
        println!();
        return Ok(());
    };

    let manager = build_manager(&matches)?;
    match name {
        "list" => list_tasks(&manager),
        "run" => run_task(&manager, sub).await,
        "explain" => explain_task(&manager, sub),
        _ => unreachable!("clap rejects unknown subcommands"),
    }
}

fn build_manager(matches: &ArgMatches) -> Result<TaskManager> {
    let mut config = ConfigManager::new();
    if let Some(path) = matches.get_one::<String>("config") {
        config = config.with_config_file(PathBuf::from(path));
    }
    if let Some(profile) = matches.get_one::<String>("profile") {
        config = config.with_profile(profile.clone());
    }
    config = config.with_strict(matches.get_flag("strict"));
    config.load()?;

    Ok(TaskManager::new(
        config,
        Arc::new(ShellRunner::new()),
        Arc::new(CliProbe::new()),
    ))
}

fn list_tasks(manager: &TaskManager) -> Result<()> {
    let tasks = manager.list()?;
    if tasks.is_empty() {
        println!("No tasks defined");
        return Ok(());
    }

    for task in tasks {
        match task.description {
            Some(description) => println!("  {}  {}", task.name.bold(), description),
            None => println!("  {}", task.name.bold()),
        }
    }
    Ok(())
}

async fn run_task(manager: &TaskManager, matches: &ArgMatches) -> Result<()> {
    let task = matches
        .get_one::<String>("task")
        .expect("task is a required argument");
    let params = parse_params(matches);

    let result = manager.run(task, params).await?;
    if let Some(output) = &result.output {
        if !output.is_empty() {
            println!("{}", output);
        }
    }
    for step in &result.steps {
        let marker = if step.succeeded() {
            "ok".green()
        } else {
            step.state.as_str().red()
        };
        println!("  [{}] {}", marker, step.name);
        if let Some(error) = &step.error {
            eprintln!("      {}", error.red());
        }
    }

    if result.success {
        Ok(())
    } else {
        if let Some(error) = &result.error {
            eprintln!("{}", error.red());
        }
        Err(XecError::Execution(ExecutionError::CommandFailed(None)))
    }
}

fn explain_task(manager: &TaskManager, matches: &ArgMatches) -> Result<()> {
    let task = matches
        .get_one::<String>("task")
        .expect("task is a required argument");
    let params = parse_params(matches);
    println!("{}", manager.explain(task, &params)?);
    Ok(())
}

/// Turn repeated `--param name=value` flags into a parameter mapping;
/// values stay strings, the parameter layer coerces them
fn parse_params(matches: &ArgMatches) -> Value {
    let mut params = Mapping::new();
    let entries: HashMap<&str, &str> = matches
        .get_many::<String>("param")
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.split_once('='))
        .collect();
    for (key, value) in entries {
        params.insert(Value::from(key), Value::from(value));
    }
    Value::Mapping(params)
}
