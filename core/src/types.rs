//! Path parameters substituted into a request's URI template.

use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;

use crate::error::{RequestError, Result};

/// A named value for a URI template variable. Values are always strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParam {
    pub name: String,
    pub value: String,
}

impl PathParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Use the value's `Display` form, e.g. for integers or ids.
    pub fn display(name: impl Into<String>, value: &impl Display) -> Self {
        Self::new(name, value.to_string())
    }

    /// Convert any serializable value to its canonical string form.
    ///
    /// Strings, numbers and booleans map to their plain text; a flat array
    /// of those is joined with commas. Anything else (null, objects, nested
    /// arrays, or a value that fails to serialize) is an error.
    pub fn try_from_value(name: impl Into<String>, value: &impl Serialize) -> Result<Self> {
        let name = name.into();
        let fail = |reason: String| RequestError::PathParam {
            name: name.clone(),
            reason,
        };
        let json = serde_json::to_value(value).map_err(|e| fail(e.to_string()))?;
        let value = match json {
            Value::Array(items) => items
                .iter()
                .map(scalar_to_string)
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join(","))
                .ok_or_else(|| fail("array items must be strings, numbers or booleans".to_string()))?,
            other => scalar_to_string(&other)
                .ok_or_else(|| fail(format!("no string form for {}", kind(&other))))?,
        };
        Ok(Self { name, value })
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for PathParam {
    fn from((name, value): (K, V)) -> Self {
        Self::new(name, value)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Object(_) => "an object",
        Value::Array(_) => "an array",
        _ => "a scalar",
    }
}
