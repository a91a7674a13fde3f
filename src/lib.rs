//! Xec - configuration-driven task orchestration
//!
//! Xec loads a layered YAML configuration (defaults, global file, project
//! file, profiles, environment overlay), interpolates `${...}` placeholders,
//! resolves execution targets (local shell, SSH hosts, Docker containers,
//! Kubernetes pods) and runs named tasks against them.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod target;
pub mod task;
pub mod utils;
pub mod vars;

// Re-export commonly used types
pub use error::{Result, XecError};

/// Current version of Xec
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
