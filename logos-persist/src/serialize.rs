//! Value codecs applied between the transform pipeline and storage.
//!
//! - [`JsonSerializer`]: the default. Encodes a subtree to JSON text stored as
//!   `Value::String`, with a nesting guard.
//! - [`Passthrough`]: used when serialization is disabled; the backend
//!   receives the transformed value untouched.

use serde_json::{Map, Value};

use crate::error::SerializeError;

/// Maximum nesting accepted by the default serializer.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Encode outgoing values, decode stored payloads.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Value, SerializeError>;
    fn deserialize(&self, stored: Value) -> Result<Value, SerializeError>;
}

/// JSON text codec.
///
/// In strict mode a value nesting deeper than `max_depth` is rejected. In
/// lenient mode every field past the limit is written as `null` and the rest
/// of the value is kept.
#[derive(Debug, Clone)]
pub struct JsonSerializer {
    pub max_depth: usize,
    pub lenient: bool,
}

impl Default for JsonSerializer {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            lenient: false,
        }
    }
}

impl JsonSerializer {
    /// Lenient codec: over-deep fields collapse to `null`.
    pub fn lenient() -> Self {
        Self {
            lenient: true,
            ..Self::default()
        }
    }

    fn exceeds(&self, value: &Value, depth: usize) -> bool {
        if depth > self.max_depth {
            return true;
        }
        match value {
            Value::Array(items) => items.iter().any(|v| self.exceeds(v, depth + 1)),
            Value::Object(fields) => fields.values().any(|v| self.exceeds(v, depth + 1)),
            _ => false,
        }
    }

    /// Locate the first over-deep field for the error message.
    fn deep_path(&self, value: &Value, depth: usize, path: &mut String) -> bool {
        if depth > self.max_depth {
            return true;
        }
        match value {
            Value::Array(items) => items.iter().enumerate().any(|(i, v)| {
                let len = path.len();
                path.push_str(&format!("[{i}]"));
                let found = self.deep_path(v, depth + 1, path);
                if !found {
                    path.truncate(len);
                }
                found
            }),
            Value::Object(fields) => fields.iter().any(|(k, v)| {
                let len = path.len();
                path.push('.');
                path.push_str(k);
                let found = self.deep_path(v, depth + 1, path);
                if !found {
                    path.truncate(len);
                }
                found
            }),
            _ => false,
        }
    }

    fn truncate(&self, value: &Value, depth: usize) -> Value {
        if depth > self.max_depth {
            return Value::Null;
        }
        match value {
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.truncate(v, depth + 1)).collect())
            }
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.truncate(v, depth + 1)))
                    .collect::<Map<String, Value>>(),
            ),
            other => other.clone(),
        }
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Value, SerializeError> {
        let encoded = if !self.exceeds(value, 0) {
            serde_json::to_string(value)
        } else if self.lenient {
            log::debug!("Value exceeds {} levels, replacing deep fields with null", self.max_depth);
            serde_json::to_string(&self.truncate(value, 0))
        } else {
            let mut path = String::from("$");
            self.deep_path(value, 0, &mut path);
            return Err(SerializeError::TooDeep {
                path,
                limit: self.max_depth,
            });
        };
        encoded
            .map(Value::String)
            .map_err(|e| SerializeError::Encode(e.to_string()))
    }

    fn deserialize(&self, stored: Value) -> Result<Value, SerializeError> {
        match stored {
            Value::String(text) => {
                serde_json::from_str(&text).map_err(|e| SerializeError::Decode(e.to_string()))
            }
            _ => Err(SerializeError::NotText),
        }
    }
}

/// Identity codec for `serialize: false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Serializer for Passthrough {
    fn serialize(&self, value: &Value) -> Result<Value, SerializeError> {
        Ok(value.clone())
    }

    fn deserialize(&self, stored: Value) -> Result<Value, SerializeError> {
        Ok(stored)
    }
}
