//! CLI interface and argument parsing
//!
//! A thin surface over the task manager: list tasks, explain a task,
//! run a task with parameters.

pub mod app;

pub use app::*;
