//! Configuration loading, merging and persistence
//!
//! A configuration is assembled from layered sources: built-in defaults,
//! the global file, the project file, the active profile chain and the
//! `XEC_*` environment overlay, followed by a final interpolation pass.

pub mod manager;
pub mod profile;
pub mod types;

pub use manager::{find_config_file_from, ConfigManager};
pub use profile::resolve_profile_chain;
pub use types::{builtin_defaults, SecretsConfig, TargetsConfig, CANONICAL_KEYS};
