use std::path::PathBuf;

use crate::overrides::OverrideError;

/// Errors that can occur while loading, composing, or querying configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),
    #[error("config '{name}' not found in {dir}")]
    NotFound { name: String, dir: PathBuf },
    #[error(transparent)]
    Override(#[from] OverrideError),
    #[error("key '{0}' not found (use '+{0}=...' to add it)")]
    MissingKey(String),
    #[error("key '{0}' already exists (use '++{0}=...' to force it)")]
    KeyExists(String),
    #[error("override for '{0}' has no value")]
    MissingValue(String),
    #[error("cannot set '{path}': '{segment}' is not a table")]
    NotATable { path: String, segment: String },
    #[error("cannot replace table '{0}' with a non-table value")]
    TypeMismatch(String),
    #[error("cannot delete '{key}': expected {expected}, found {found}")]
    DeleteMismatch {
        key: String,
        expected: String,
        found: String,
    },
    #[error("config group '{group}' is not in the defaults list (use '+{group}={option}' to add it)")]
    GroupNotSelected { group: String, option: String },
    #[error("config group '{0}' is already selected (use '++{0}=...' to replace it)")]
    GroupAlreadySelected(String),
    #[error("config group '{group}' has no option '{option}' (available: {available})")]
    UnknownOption {
        group: String,
        option: String,
        available: String,
    },
    #[error("invalid defaults entry '{entry}' in {path}: expected group = \"option\"")]
    InvalidDefaults { path: PathBuf, entry: String },
    #[error("invalid _package_ in {0}: expected a string")]
    InvalidPackage(PathBuf),
    #[error("defaults nesting deeper than {0} levels (is there a cycle?)")]
    DefaultsTooDeep(usize),
    #[error("failed to resolve '${{{reference}}}' in '{key}': key not found")]
    Interpolation { key: String, reference: String },
    #[error("interpolation cycle detected at '${{{0}}}'")]
    InterpolationCycle(String),
    #[error("failed to read '{path}' as the requested type: {message}")]
    Deserialize { path: String, message: String },
    #[error("failed to serialize config: {0}")]
    Serialize(String),
}
