//! Field metadata and value casting for an entity type.
//!
//! A [`Schema`] answers type questions about fields (`fields`, `is`,
//! `type_of`) and turns raw store data into typed values. Casting works on
//! two levels:
//!
//! - **shape**: whether a value becomes a nested [`Entity`](crate::Entity),
//!   a [`Collection`](crate::Collection) ("set") or stays a scalar
//!   (see [`Schema::cast`])
//! - **scalar**: a per-type [`Handler`] converts the raw scalar
//!   (see [`Schema::cast_type`])
//!
//! This lets schema-optional document stores still hand back typed values.

mod cast;
pub mod field;
mod handlers;

#[doc(inline)]
pub use cast::CastOptions;
#[doc(inline)]
pub use field::Field;

use crate::query::Options;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Converts one raw scalar into the canonical value for a type.
pub type Handler = Arc<dyn Fn(&JsonValue) -> JsonValue + Send + Sync>;

/// Error type for schema mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The schema is locked; field definitions cannot change
    Locked,
    /// A field description could not be parsed
    InvalidField { field: String, reason: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Locked => write!(f, "Schema is locked; field definitions cannot be modified"),
            SchemaError::InvalidField { field, reason } => {
                write!(f, "Invalid definition for field `{}`: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Field metadata for one entity type.
#[derive(Clone)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
    key: Vec<String>,
    locked: bool,
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field("key", &self.key)
            .field("locked", &self.locked)
            .field("handlers", &handlers)
            .finish()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// An empty, unlocked schema with the built-in type handlers.
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            key: Vec::new(),
            locked: false,
            handlers: handlers::defaults(),
        }
    }

    pub fn with_fields<I, K, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, F)>,
        K: Into<String>,
        F: Into<Field>,
    {
        let mut schema = Self::new();
        schema.fields = fields
            .into_iter()
            .map(|(name, field)| (name.into(), field.into()))
            .collect();
        schema
    }

    /// Build from a JSON map of `name => type | {type, null, array, ...}`.
    pub fn from_json(value: &JsonValue) -> Result<Self, SchemaError> {
        let map = value.as_object().ok_or_else(|| SchemaError::InvalidField {
            field: String::new(),
            reason: "expected an object of field definitions".to_string(),
        })?;
        let mut schema = Self::new();
        for (name, definition) in map {
            let field = Field::from_json(definition).map_err(|e| SchemaError::InvalidField {
                field: name.clone(),
                reason: e.to_string(),
            })?;
            schema.fields.insert(name.clone(), field);
        }
        Ok(schema)
    }

    pub fn with_key<I, K>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.key = key.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn set_key(&mut self, key: &[String]) {
        self.key = key.to_vec();
    }

    /// Key field name(s).
    pub fn key(&self) -> &[String] {
        &self.key
    }

    /// Lock the field definitions. There is no unlock.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// All field definitions.
    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    /// One field's full definition.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// One attribute of one field's definition.
    pub fn attribute(&self, name: &str, key: &str) -> Option<JsonValue> {
        self.fields.get(name).and_then(|field| field.attribute(key))
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Tri-state flag query: `None` when the field is unknown.
    pub fn is(&self, condition: &str, field: &str) -> Option<bool> {
        self.fields.get(field).map(|f| f.is(condition))
    }

    /// Declared type of a field.
    pub fn type_of(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|f| f.kind.as_str())
    }

    /// Add field definitions without overwriting existing ones.
    pub fn append<I, K, F>(&mut self, fields: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = (K, F)>,
        K: Into<String>,
        F: Into<Field>,
    {
        if self.locked {
            return Err(SchemaError::Locked);
        }
        for (name, field) in fields {
            self.fields.entry(name.into()).or_insert_with(|| field.into());
        }
        Ok(())
    }

    /// Define or replace one field.
    pub fn set(&mut self, name: impl Into<String>, field: impl Into<Field>) -> Result<(), SchemaError> {
        if self.locked {
            return Err(SchemaError::Locked);
        }
        self.fields.insert(name.into(), field.into());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<Field>, SchemaError> {
        if self.locked {
            return Err(SchemaError::Locked);
        }
        Ok(self.fields.remove(name))
    }

    /// Append another schema's fields; existing definitions win.
    pub fn merge(&mut self, other: &Schema) -> Result<(), SchemaError> {
        self.append(other.fields.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Default values declared by the fields that have one.
    pub fn defaults(&self) -> Options {
        self.fields
            .iter()
            .filter_map(|(name, field)| field.default.clone().map(|d| (name.clone(), d)))
            .collect()
    }

    /// Register (or replace) the handler for a type name.
    pub fn handler<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&JsonValue) -> JsonValue + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Cast one scalar (or each element of a list) through the handler of
    /// the field at `path`.
    ///
    /// Unknown fields and types without a handler pass through. `null` on a
    /// field declared nullable is kept as `null`.
    pub fn cast_type(&self, path: &str, value: JsonValue) -> JsonValue {
        let Some(field) = self.fields.get(path) else {
            return value;
        };
        if value.is_null() && field.null {
            return value;
        }
        let Some(handler) = self.handlers.get(&field.kind) else {
            return value;
        };
        match value {
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .into_iter()
                    .map(|item| if item.is_null() && field.null { item } else { handler(&item) })
                    .collect(),
            ),
            other => handler(&other),
        }
    }
}
