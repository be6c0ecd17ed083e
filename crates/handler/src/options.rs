use serde_json::{Map, Value};
use thiserror::Error;

/// Parsed job payload handed to a handler factory.
pub type Attributes = Map<String, Value>;

/// Errors raised while turning a payload into a runnable handler.
///
/// These are never retried: the same payload would fail the same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildHandlerError {
    #[error("Payload has no 'type' field")]
    MissingType,
    #[error("No handler registered for type '{0}'")]
    UnknownType(String),
    #[error("Missing required option '{0}'")]
    MissingOption(String),
    #[error("Invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },
}

impl BuildHandlerError {
    pub fn invalid(option: &str, reason: impl Into<String>) -> Self {
        BuildHandlerError::InvalidOption {
            option: option.to_string(),
            reason: reason.into(),
        }
    }
}

/// Reads a required string option.
pub fn require_str<'a>(attributes: &'a Attributes, option: &str) -> Result<&'a str, BuildHandlerError> {
    match attributes.get(option) {
        None | Some(Value::Null) => Err(BuildHandlerError::MissingOption(option.to_string())),
        Some(Value::String(value)) if value.is_empty() => {
            Err(BuildHandlerError::MissingOption(option.to_string()))
        }
        Some(Value::String(value)) => Ok(value),
        Some(other) => Err(BuildHandlerError::invalid(
            option,
            format!("expected a string, got {other}"),
        )),
    }
}

pub fn optional_str<'a>(
    attributes: &'a Attributes,
    option: &str,
) -> Result<Option<&'a str>, BuildHandlerError> {
    match attributes.get(option) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(other) => Err(BuildHandlerError::invalid(
            option,
            format!("expected a string, got {other}"),
        )),
    }
}

/// Reads a required integer option, accepting numeric strings.
pub fn require_i64(attributes: &Attributes, option: &str) -> Result<i64, BuildHandlerError> {
    match attributes.get(option) {
        None | Some(Value::Null) => Err(BuildHandlerError::MissingOption(option.to_string())),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| BuildHandlerError::invalid(option, format!("{n} is not an integer"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| BuildHandlerError::invalid(option, format!("'{s}' is not an integer"))),
        Some(other) => Err(BuildHandlerError::invalid(
            option,
            format!("expected an integer, got {other}"),
        )),
    }
}
