//! Field definitions.

use crate::query::Options;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

fn default_kind() -> String {
    "string".to_string()
}

/// Metadata for a single field: its type plus free-form options.
///
/// Serialized shape mirrors the usual field description maps, e.g.
/// `{"type": "integer", "null": true, "default": 0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Declared type name (`string`, `integer`, `float`, `boolean`, `date`,
    /// `decimal`, `id`, `object`, ...)
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Whether `null` is an acceptable stored value
    #[serde(default)]
    pub null: bool,
    /// Whether the field holds a list of `kind` values
    #[serde(default)]
    pub array: bool,
    /// Value used by `Model::create` when the caller supplies none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    /// Adapter-specific options (`length`, `precision`, ...)
    #[serde(flatten)]
    pub options: Options,
}

impl Field {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            null: false,
            array: false,
            default: None,
            options: Options::new(),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<JsonValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// One attribute of the definition, by name.
    pub fn attribute(&self, key: &str) -> Option<JsonValue> {
        match key {
            "type" => Some(JsonValue::String(self.kind.clone())),
            "null" => Some(JsonValue::Bool(self.null)),
            "array" => Some(JsonValue::Bool(self.array)),
            "default" => self.default.clone(),
            other => self.options.get(other).cloned(),
        }
    }

    /// Whether a boolean attribute is set.
    pub fn is(&self, condition: &str) -> bool {
        match condition {
            "null" => self.null,
            "array" => self.array,
            other => self.options.get(other).map_or(false, crate::value::is_truthy),
        }
    }

    /// Parse a definition from either a type name or a full map.
    pub(crate) fn from_json(value: &JsonValue) -> Result<Self, serde_json::Error> {
        match value {
            JsonValue::String(kind) => Ok(Field::new(kind.as_str())),
            other => serde_json::from_value(other.clone()),
        }
    }
}

impl From<&str> for Field {
    fn from(kind: &str) -> Self {
        Field::new(kind)
    }
}
