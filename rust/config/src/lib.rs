#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Hierarchical configuration for planning framework jobs.
//!
//! A job configuration is a TOML tree composed from a primary file, a list of
//! config-group selections, and flat `key=value` override strings. Every
//! composition goes through an explicit [`Composer`] value; there is no
//! process-wide configuration state.

mod compose;
mod error;
mod interpolate;
mod overrides;
mod tree;

pub use compose::{Composer, DEFAULTS_KEY, GLOBAL_PACKAGE, PACKAGE_KEY};
pub use error::ConfigError;
pub use overrides::{Override, OverrideError, OverrideKind, parse_value, render_value};
pub use tree::ConfigTree;
pub use toml::{Table, Value};
