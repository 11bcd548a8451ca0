//! Control-value validation
//!
//! Small registry of checks applied to configuration values and, through
//! the param schema, to run-request arguments: token shape, integers,
//! booleans, and comma-separated lists.

use crate::errors::DispatcherError;

/// Registration tokens are handed out by the server operator.
pub const REGISTRATION_TOKEN_SIZE: usize = 25;

/// Agent tokens are issued by the registration endpoint.
pub const AGENT_TOKEN_SIZE: usize = 64;

/// Check that a token is alphanumeric and exactly `size` characters long.
pub fn validate_token(field_name: &str, size: usize, value: &str) -> Result<(), DispatcherError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DispatcherError::Config(format!(
            "{field_name} must be alphanumeric"
        )));
    }
    if value.len() != size {
        return Err(DispatcherError::Config(format!(
            "{field_name} must be {size} character length"
        )));
    }
    Ok(())
}

/// Parse an integer option that may be written as a bare integer or as an
/// integer-like string.
pub fn control_int(field_name: &str, value: &toml::Value) -> Result<i64, DispatcherError> {
    match value {
        toml::Value::Integer(n) => Ok(*n),
        toml::Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            DispatcherError::Config(format!(
                "\"{field_name}\" with value {s:?} should be an int"
            ))
        }),
        other => Err(DispatcherError::Config(format!(
            "\"{field_name}\" with value {other} should be an int"
        ))),
    }
}

/// Parse a boolean option. Accepts a bare boolean or the string forms
/// `true`/`false` (case-insensitive).
pub fn control_bool(field_name: &str, value: &toml::Value) -> Result<bool, DispatcherError> {
    match value {
        toml::Value::Boolean(b) => Ok(*b),
        toml::Value::String(s) => match s.to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(DispatcherError::Config(format!(
                "\"{field_name}\" with value {s:?} should be a bool"
            ))),
        },
        other => Err(DispatcherError::Config(format!(
            "\"{field_name}\" with value {other} should be a bool"
        ))),
    }
}

/// Split a comma-separated list, trimming the surrounding whitespace of
/// each item. Items must be non-empty, free of internal whitespace, and
/// unique when `can_repeat` is false.
pub fn control_list(
    field_name: &str,
    value: &str,
    can_repeat: bool,
) -> Result<Vec<String>, DispatcherError> {
    let items: Vec<String> = value.split(',').map(|item| item.trim().to_string()).collect();
    let mut seen = std::collections::HashSet::new();
    for item in &items {
        if item.is_empty() {
            return Err(DispatcherError::Config(format!(
                "\"{field_name}\" contains an empty item"
            )));
        }
        if item.contains(char::is_whitespace) {
            return Err(DispatcherError::Config(format!(
                "\"{field_name}\" item {item:?} must not contain whitespace"
            )));
        }
        if !can_repeat && !seen.insert(item.clone()) {
            return Err(DispatcherError::Config(format!(
                "\"{field_name}\" contains repeated values"
            )));
        }
    }
    Ok(items)
}
