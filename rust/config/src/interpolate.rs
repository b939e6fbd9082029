//! `${path}` interpolation.
//!
//! A string that is exactly `${path}` is replaced by the referenced value with
//! its type intact. A reference embedded in longer text is replaced by the
//! referenced value's rendering.

use toml::{Table, Value};

use crate::{error::ConfigError, tree::ConfigTree};

const MAX_DEPTH: usize = 32;

/// Resolve every interpolation in `tree` against `tree` itself.
pub(crate) fn resolve(tree: &ConfigTree) -> Result<ConfigTree, ConfigError> {
    let mut stack = Vec::new();
    let mut resolved = Table::new();
    for (key, value) in tree.as_table() {
        resolved.insert(key.clone(), resolve_value(value, key, tree, &mut stack)?);
    }
    Ok(ConfigTree::from_table(resolved))
}

fn resolve_value(
    value: &Value,
    at: &str,
    source: &ConfigTree,
    stack: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    match value {
        Value::String(s) => resolve_string(s, at, source, stack),
        Value::Table(table) => {
            let mut out = Table::new();
            for (key, child) in table {
                let path = format!("{at}.{key}");
                out.insert(key.clone(), resolve_value(child, &path, source, stack)?);
            }
            Ok(Value::Table(out))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| resolve_value(item, &format!("{at}[{i}]"), source, stack))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    s: &str,
    at: &str,
    source: &ConfigTree,
    stack: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    if let Some(reference) = whole_reference(s) {
        return lookup(reference, at, source, stack);
    }
    if !s.contains("${") {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated; keep the text as written.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let value = lookup(&after[..end], at, source, stack)?;
        out.push_str(&render_inline(&value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn whole_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    (!inner.contains(['{', '}'])).then_some(inner)
}

fn lookup(
    reference: &str,
    at: &str,
    source: &ConfigTree,
    stack: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    let reference = reference.trim();
    if stack.len() >= MAX_DEPTH || stack.iter().any(|r| r == reference) {
        return Err(ConfigError::InterpolationCycle(reference.to_string()));
    }
    let target = source
        .get(reference)
        .ok_or_else(|| ConfigError::Interpolation {
            key: at.to_string(),
            reference: reference.to_string(),
        })?;

    stack.push(reference.to_string());
    let resolved = resolve_value(target, reference, source, stack);
    stack.pop();
    resolved
}

fn render_inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(s: &str) -> Result<ConfigTree, ConfigError> {
        resolve(&ConfigTree::parse(s).unwrap())
    }

    #[test]
    fn test_whole_value_keeps_type() {
        let t = resolved(
            r#"
[model]
name = "raster_model"
num_layers = 4

[planner.ml_planner]
model_config = "${model}"
horizon = "${model.num_layers}"
"#,
        )
        .unwrap();
        assert_eq!(
            t.get("planner.ml_planner.model_config.name")
                .and_then(Value::as_str),
            Some("raster_model")
        );
        assert_eq!(t.get("planner.ml_planner.horizon"), Some(&Value::Integer(4)));
    }

    #[test]
    fn test_embedded_reference() {
        let t = resolved(
            r#"
group = "/tmp/save"
experiment_name = "sim"
output_dir = "${group}/${experiment_name}/run"
"#,
        )
        .unwrap();
        assert_eq!(
            t.get("output_dir").and_then(Value::as_str),
            Some("/tmp/save/sim/run")
        );
    }

    #[test]
    fn test_chained_references() {
        let t = resolved(
            r#"
a = "${b}"
b = "${c}"
c = 7
"#,
        )
        .unwrap();
        assert_eq!(t.get("a"), Some(&Value::Integer(7)));
    }

    #[test]
    fn test_missing_reference() {
        let err = resolved("x = \"${nope}\"").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Interpolation { ref key, ref reference } if key == "x" && reference == "nope"
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let err = resolved("a = \"${b}\"\nb = \"${a}\"").unwrap_err();
        assert!(matches!(err, ConfigError::InterpolationCycle(_)));

        let err = resolved("[model]\nself_ref = \"${model}\"").unwrap_err();
        assert!(matches!(err, ConfigError::InterpolationCycle(_)));
    }

    #[test]
    fn test_unterminated_reference_left_alone() {
        let t = resolved("x = \"cost ${oops\"").unwrap();
        assert_eq!(t.get("x").and_then(Value::as_str), Some("cost ${oops"));
    }
}
