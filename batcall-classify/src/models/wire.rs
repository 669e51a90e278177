//! Classifier service wire format
//!
//! The service wraps values inconsistently: `status` may be `"success"` or
//! `["success"]`, and any per-file field may arrive as `x` or `[x]`. Every
//! shape difference is folded here so downstream code sees plain values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Replace a one-element JSON array by its element; other values pass through
pub fn unwrap_singleton(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.pop().unwrap_or(Value::Null),
        other => other,
    }
}

/// Top-level response body of a batch request
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEnvelope {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub file_results: Option<Value>,
}

impl ServiceEnvelope {
    pub const SUCCESS: &'static str = "success";

    /// Normalized status value, if it is a string or one-element list of one
    pub fn status(&self) -> Option<String> {
        match self.status.clone().map(unwrap_singleton) {
            Some(Value::String(status)) => Some(status),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status().as_deref() == Some(Self::SUCCESS)
    }

    /// `file_results` as an object, bare or wrapped in a one-element list
    pub fn file_results(&self) -> Option<Map<String, Value>> {
        match self.file_results.clone().map(unwrap_singleton) {
            Some(Value::Object(results)) => Some(results),
            _ => None,
        }
    }

    /// Service message, or a description of the status when there is none
    pub fn failure_message(&self) -> String {
        if let Some(message) = self.message.clone().map(unwrap_singleton).and_then(render_message) {
            if !message.trim().is_empty() {
                return message;
            }
        }
        match self.status() {
            Some(status) => format!("status '{}'", status),
            None => "missing or malformed status".to_string(),
        }
    }
}

/// Strings as-is, other non-null JSON as compact text
fn render_message(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// One clip's normalized result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileRecord {
    /// `short_name` → percent value (still raw JSON; coerced by the persister)
    pub class_probabilities: Map<String, Value>,
    /// Every other field, singleton lists unwrapped
    pub fields: Map<String, Value>,
}

impl FileRecord {
    pub const CLASS_PROBABILITIES: &'static str = "class_probabilities";

    /// Normalize one `file_results` entry
    ///
    /// Returns `None` when the entry is not a JSON object.
    pub fn from_wire(value: Value) -> Option<Self> {
        let Value::Object(raw) = unwrap_singleton(value) else {
            return None;
        };

        let mut record = FileRecord::default();
        for (key, value) in raw {
            let value = unwrap_singleton(value);
            if key == Self::CLASS_PROBABILITIES {
                if let Value::Object(probabilities) = value {
                    record.class_probabilities = probabilities;
                }
            } else {
                record.fields.insert(key, value);
            }
        }
        Some(record)
    }

    /// Record assigning the same percent to every class
    pub fn uniform<'a>(short_names: impl IntoIterator<Item = &'a str>, percent: f64) -> Self {
        let class_probabilities = short_names
            .into_iter()
            .map(|name| (name.to_string(), Value::from(percent)))
            .collect();
        FileRecord {
            class_probabilities,
            fields: Map::new(),
        }
    }
}
