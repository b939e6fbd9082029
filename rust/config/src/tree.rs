//! Nested TOML configuration tree addressed by dotted key paths.

use std::path::Path;

use serde::de::DeserializeOwned;
use toml::{Table, Value};

use crate::error::ConfigError;

/// A hierarchical configuration.
///
/// Keys are addressed with dotted paths such as `planner.ml_planner.checkpoint_path`.
/// Table order follows the order in which keys were first inserted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    root: Table,
}

impl ConfigTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_table(root: Table) -> Self {
        Self { root }
    }

    /// Parse a TOML document.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        content.parse::<Table>().map(Self::from_table)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    #[must_use]
    pub fn as_table(&self) -> &Table {
        &self.root
    }

    #[must_use]
    pub fn into_table(self) -> Table {
        self.root
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Top-level keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.root.get(segments.next()?)?;
        for segment in segments {
            current = current.as_table()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = path.split('.');
        let mut current = self.root.get_mut(segments.next()?)?;
        for segment in segments {
            current = current.as_table_mut()?.get_mut(segment)?;
        }
        Some(current)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a value, creating intermediate tables as needed.
    ///
    /// Returns the previous value, if any.
    pub fn set(&mut self, path: &str, value: Value) -> Result<Option<Value>, ConfigError> {
        let (parents, leaf) = match path.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, path),
        };

        let mut table = &mut self.root;
        for segment in parents.into_iter().flat_map(|p| p.split('.')) {
            let entry = table
                .entry(segment.to_string())
                .or_insert(Value::Table(Table::new()));
            table = match entry {
                Value::Table(t) => t,
                _ => {
                    return Err(ConfigError::NotATable {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    });
                }
            };
        }
        Ok(table.insert(leaf.to_string(), value))
    }

    /// Remove a value and return it.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        match path.rsplit_once('.') {
            Some((parents, leaf)) => self.get_mut(parents)?.as_table_mut()?.remove(leaf),
            None => self.root.remove(path),
        }
    }

    /// A copy of the table at `path`, or `None` if it is missing or not a table.
    #[must_use]
    pub fn section(&self, path: &str) -> Option<ConfigTree> {
        self.get(path)?.as_table().cloned().map(Self::from_table)
    }

    /// Recursively merge `overlay` into this tree. Overlay values win.
    pub fn merge(&mut self, overlay: &ConfigTree) {
        merge_tables(&mut self.root, &overlay.root);
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(&self.root).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Deserialize the value at `path`, or `None` if it is absent.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigError> {
        self.get(path)
            .cloned()
            .map(|v| {
                v.try_into().map_err(|e: toml::de::Error| ConfigError::Deserialize {
                    path: path.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}

impl From<Table> for ConfigTree {
    fn from(root: Table) -> Self {
        Self::from_table(root)
    }
}

impl std::str::FromStr for ConfigTree {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Merge two TOML tables in place, with `overlay` values taking precedence.
fn merge_tables(base: &mut Table, overlay: &Table) {
    for (k, v) in overlay {
        match (base.get_mut(k), v) {
            (Some(Value::Table(base_t)), Value::Table(overlay_t)) => merge_tables(base_t, overlay_t),
            _ => {
                base.insert(k.clone(), v.clone());
            }
        }
    }
}
