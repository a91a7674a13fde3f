//! Pure helpers shared across the crate
//!
//! Nothing in here touches the filesystem, the process environment or any
//! backend; these are the leaf utilities the rest of the crate builds on.

pub mod merge;
pub mod path;
pub mod pattern;
pub mod units;

pub use merge::{deep_merge, deep_merge_concat, deep_merge_verbatim, MERGE_MARKER, UNSET_MARKER};
pub use path::{get_path, remove_path, set_path};
pub use pattern::{expand_braces, expand_pattern, is_pattern, matches_glob};
pub use units::{parse_duration, parse_memory_size};
