//! Variable interpolation
//!
//! Resolves `${type.path:default}` placeholders against a variable context
//! (vars, env snapshot, params) plus two external collaborators: command
//! substitution and secret lookup.

pub mod interpolator;
pub mod types;

pub use interpolator::{parse_variables, Interpolator, MAX_INTERPOLATION_DEPTH};
pub use types::{RefType, VariableContext, VariableReference};
