//! Redaction and truncation shared by every watcher
//!
//! Nothing in this module fails: values that cannot be serialized or that are too
//! large are replaced with sentinel strings before they reach storage.

use debugscope_core::content::Headers;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Replacement for redacted header values and keys
pub const REDACTED: &str = "********";

/// Replacement for values whose `Serialize` impl failed
pub const UNSERIALIZABLE: &str = "[UNSERIALIZABLE]";

/// Replacement for values over the size ceiling, carrying the actual size
pub fn truncated_sentinel(size_bytes: usize) -> String {
    format!("[TRUNCATED: {} bytes]", size_bytes)
}

/// Serialize any value, degrading to [`UNSERIALIZABLE`] instead of failing
pub fn to_value_safe<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Captured value could not be serialized");
            Value::String(UNSERIALIZABLE.to_string())
        }
    }
}

/// Serialized size of a value in bytes
pub fn serialized_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Replace `value` with a size sentinel when its serialized form exceeds `max_kb`
pub fn truncate_value(value: Value, max_kb: usize) -> Value {
    let size = serialized_size(&value);
    if size > max_kb.saturating_mul(1024) {
        Value::String(truncated_sentinel(size))
    } else {
        value
    }
}

/// Truncate a plain string payload
pub fn truncate_string(text: String, max_kb: usize) -> String {
    if text.len() > max_kb.saturating_mul(1024) {
        truncated_sentinel(text.len())
    } else {
        text
    }
}

/// Serialize then truncate
pub fn capture<T: Serialize + ?Sized>(value: &T, max_kb: usize) -> Value {
    truncate_value(to_value_safe(value), max_kb)
}

/// Case-insensitive redaction of header values and object keys
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    names: HashSet<String>,
}

impl Redactor {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }

    /// Copy of `headers` with sensitive values replaced
    pub fn headers(&self, headers: &Headers) -> Headers {
        headers
            .iter()
            .map(|(k, v)| {
                let value = if self.is_sensitive(k) {
                    REDACTED.to_string()
                } else {
                    v.clone()
                };
                (k.clone(), value)
            })
            .collect()
    }

    /// Recursively redact sensitive keys inside a JSON value
    pub fn value(&self, value: Value) -> Value {
        if self.names.is_empty() {
            return value;
        }
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        if self.is_sensitive(&k) {
                            (k, Value::String(REDACTED.to_string()))
                        } else {
                            (k, self.value(v))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.value(v)).collect()),
            other => other,
        }
    }
}

/// Look up a header case-insensitively
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
