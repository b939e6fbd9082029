//! Flat `key=value` override strings.
//!
//! Grammar:
//!
//! - `key=value` sets an existing key
//! - `+key=value` adds a key that must not exist yet
//! - `++key=value` sets or adds
//! - `~key` or `~key=value` deletes an existing key
//!
//! Keys are dotted paths. Values are parsed leniently: quoted text is a string,
//! `[a, b]` is a list, anything TOML reads as a number, boolean, datetime or
//! inline table keeps that type, and everything else is a bare string.

use std::fmt;

use toml::{Table, Value};

use crate::{error::ConfigError, tree::ConfigTree};

/// What an override does to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    Set,
    Add,
    ForceAdd,
    Delete,
}

/// A single parsed override.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub kind: OverrideKind,
    pub key: String,
    pub value: Option<Value>,
}

impl Override {
    pub fn parse(input: &str) -> Result<Self, OverrideError> {
        input.parse()
    }

    /// Parse a list of override strings, failing on the first bad one.
    pub fn parse_all<I, S>(inputs: I) -> Result<Vec<Self>, OverrideError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        inputs.into_iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    /// Apply this override to `tree`, validating it against the current contents.
    pub fn apply_to(&self, tree: &mut ConfigTree) -> Result<(), ConfigError> {
        let key = self.key.as_str();
        match self.kind {
            OverrideKind::Set => {
                let value = self.required_value()?;
                match tree.get(key) {
                    None => return Err(ConfigError::MissingKey(key.to_string())),
                    Some(Value::Table(_)) if !value.is_table() => {
                        return Err(ConfigError::TypeMismatch(key.to_string()));
                    }
                    Some(_) => {}
                }
                tree.set(key, value)?;
            }
            OverrideKind::Add => {
                let value = self.required_value()?;
                if tree.contains(key) {
                    return Err(ConfigError::KeyExists(key.to_string()));
                }
                tree.set(key, value)?;
            }
            OverrideKind::ForceAdd => {
                tree.set(key, self.required_value()?)?;
            }
            OverrideKind::Delete => {
                let current = tree
                    .get(key)
                    .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
                if let Some(expected) = &self.value
                    && current != expected
                {
                    return Err(ConfigError::DeleteMismatch {
                        key: key.to_string(),
                        expected: render_value(expected),
                        found: render_value(current),
                    });
                }
                tree.remove(key);
            }
        }
        Ok(())
    }

    fn required_value(&self) -> Result<Value, ConfigError> {
        self.value
            .clone()
            .ok_or_else(|| ConfigError::MissingValue(self.key.clone()))
    }
}

impl std::str::FromStr for Override {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let (kind, rest) = if let Some(rest) = input.strip_prefix("++") {
            (OverrideKind::ForceAdd, rest)
        } else if let Some(rest) = input.strip_prefix('+') {
            (OverrideKind::Add, rest)
        } else if let Some(rest) = input.strip_prefix('~') {
            (OverrideKind::Delete, rest)
        } else {
            (OverrideKind::Set, input)
        };

        let (key, value) = match rest.split_once('=') {
            Some((key, value)) => (key.trim(), Some(parse_value(value)?)),
            None if kind == OverrideKind::Delete => (rest.trim(), None),
            None => return Err(OverrideError::MissingEquals(input.to_string())),
        };

        validate_key(key, input)?;
        Ok(Self {
            kind,
            key: key.to_string(),
            value,
        })
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            OverrideKind::Set => "",
            OverrideKind::Add => "+",
            OverrideKind::ForceAdd => "++",
            OverrideKind::Delete => "~",
        };
        write!(f, "{prefix}{}", self.key)?;
        if let Some(ref value) = self.value {
            write!(f, "={}", render_value(value))?;
        }
        Ok(())
    }
}

fn validate_key(key: &str, input: &str) -> Result<(), OverrideError> {
    if key.is_empty() {
        return Err(OverrideError::EmptyKey(input.to_string()));
    }
    let valid = key.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '@'))
    });
    if valid {
        Ok(())
    } else {
        Err(OverrideError::InvalidKey {
            key: key.to_string(),
            input: input.to_string(),
        })
    }
}

/// Parse the value half of an override.
pub fn parse_value(raw: &str) -> Result<Value, OverrideError> {
    let raw = raw.trim();

    if raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
    {
        return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
    }

    if raw.starts_with('[') {
        let inner = raw
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| OverrideError::UnbalancedList(raw.to_string()))?;
        return split_list_items(inner, raw)?
            .into_iter()
            .map(parse_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    if raw.is_empty() || raw.contains('\n') || raw.contains("${") {
        return Ok(Value::String(raw.to_string()));
    }

    // Let TOML decide numbers, booleans, datetimes and inline tables.
    match format!("v = {raw}").parse::<Table>() {
        Ok(mut table) if table.len() == 1 => match table.remove("v") {
            Some(Value::String(_)) | None => Ok(Value::String(raw.to_string())),
            Some(value) => Ok(value),
        },
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Split list contents on commas that are not nested in brackets, braces or quotes.
fn split_list_items<'a>(inner: &'a str, raw: &str) -> Result<Vec<&'a str>, OverrideError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '{') => depth += 1,
            (None, ']' | '}') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| OverrideError::UnbalancedList(raw.to_string()))?;
            }
            (None, ',') if depth == 0 => {
                items.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(OverrideError::UnbalancedList(raw.to_string()));
    }
    items.push(&inner[start..]);

    Ok(items.into_iter().filter(|item| !item.trim().is_empty()).collect())
}

/// Render a value the way it would be written in an override.
///
/// Strings are written bare unless they would parse back as another type.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => match parse_value(s) {
            Ok(Value::String(ref parsed)) if parsed == s => s.clone(),
            _ => format!("\"{s}\""),
        },
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

/// Errors that can occur when parsing an override string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverrideError {
    #[error("override '{0}' is missing '=' (expected key=value)")]
    MissingEquals(String),
    #[error("override '{0}' has an empty key")]
    EmptyKey(String),
    #[error("invalid key '{key}' in override '{input}'")]
    InvalidKey { key: String, input: String },
    #[error("unbalanced list value '{0}'")]
    UnbalancedList(String),
}
