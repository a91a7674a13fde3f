//! Task definitions, parsing and execution
//!
//! A task is a named unit of work: a single command, an inline script or a
//! sequence of steps. The parser turns the loose `tasks` section into typed
//! definitions, the executor runs one definition to completion, and the
//! manager ties both to the configuration with CRUD, events and a dry-run
//! explainer.

pub mod executor;
pub mod manager;
pub mod params;
pub mod parser;
pub mod types;

pub use executor::TaskExecutor;
pub use manager::{TaskEvent, TaskManager, TaskSummary};
pub use params::resolve_params;
pub use parser::TaskParser;
pub use types::{
    OnFailure, ParamDefinition, ParamType, RunState, StepAction, StepDefinition, StepResult,
    TaskBody, TaskDefinition, TaskResult,
};
