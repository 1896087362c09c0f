//! Built-in step plugins

pub mod script;
pub mod shell;

pub use script::ScriptStep;
pub use shell::ShellStep;

use serde_json::Value;

use crate::error::{BuildError, Result};
use crate::script::is_valid_env_name;

/// Read `key` as one line or a list of lines
fn lines_option(options: &Value, key: &str) -> Result<Vec<String>> {
    let lines = match options.get(key) {
        Some(Value::String(line)) => vec![line.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BuildError::invalid(format!("{key} entries must be strings")))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(BuildError::invalid(format!(
                "{key} must be a string or a list of strings, got {other}"
            )))
        }
        None => return Err(BuildError::invalid(format!("missing required option {key}"))),
    };

    if lines.iter().all(|line| line.trim().is_empty()) {
        return Err(BuildError::invalid(format!("{key} must not be empty")));
    }

    Ok(lines)
}

fn string_option(options: &Value, key: &str) -> Result<Option<String>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(BuildError::invalid(format!("{key} must be a string, got {other}"))),
    }
}

fn bool_option(options: &Value, key: &str, default: bool) -> Result<bool> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(value)) => Ok(*value),
        Some(other) => Err(BuildError::invalid(format!("{key} must be a boolean, got {other}"))),
    }
}

/// Read the `env` mapping; scalar values are stringified
fn env_option(options: &Value) -> Result<Vec<(String, String)>> {
    let map = match options.get("env") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(BuildError::invalid(format!("env must be a mapping, got {other}")))
        }
    };

    let mut env = map
        .iter()
        .map(|(key, value)| {
            if !is_valid_env_name(key) {
                return Err(BuildError::invalid(format!("invalid environment variable name {key}")));
            }
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(BuildError::invalid(format!(
                        "environment variable {key} must be a scalar, got {other}"
                    )))
                }
            };
            Ok((key.clone(), value))
        })
        .collect::<Result<Vec<_>>>()?;

    env.sort();
    Ok(env)
}
