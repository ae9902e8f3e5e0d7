//! Entities: one record or document bound to a model.
//!
//! An [`Entity`] keeps the values it was loaded with (`data`) apart from the
//! values it currently holds (`updated`), so it can report exactly what
//! changed. Numeric changes made through [`Entity::increment`] are also
//! recorded as deltas, letting a source issue an atomic increment instead of
//! overwriting the stored value.
//!
//! # Lifecycle
//!
//! - `Model::create` builds an unsaved entity (`exists() == false`)
//! - reads build persisted entities (`exists() == true`)
//! - [`Entity::sync`] is the single transition from pending to persisted
//!   state; sources call it after a successful write
//!
//! # Serialization
//!
//! Entities serialize with serde, but only their data: `data`, `updated`,
//! `increment`, `exists`, `errors` and the model identity. The schema and
//! its type handlers are closures and are never written; a deserialized
//! entity has no schema until one is attached again, usually through
//! `Registry::restore`.

pub mod error;
pub mod export;

#[doc(inline)]
pub use error::EntityError;
#[doc(inline)]
pub use export::{register_format, ExportOptions, Exported};

use crate::query::Options;
use crate::schema::{CastOptions, Schema};
use crate::value::{numeric_add, numeric_neg, Numeric, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-field validation messages.
pub type Errors = BTreeMap<String, Vec<String>>;

/// Options for [`Entity::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Mark the entity as existing in its source
    pub materialize: bool,
    /// Mark the entity as no longer existing (after a delete)
    pub dematerialize: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            materialize: true,
            dematerialize: false,
        }
    }
}

impl SyncOptions {
    pub fn dematerialize() -> Self {
        Self {
            materialize: false,
            dematerialize: true,
        }
    }
}

/// A single record bound (optionally) to a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    key: Vec<String>,
    #[serde(default)]
    data: BTreeMap<String, Value>,
    #[serde(default)]
    updated: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    increment: BTreeMap<String, JsonValue>,
    #[serde(skip)]
    relationships: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    errors: Errors,
    #[serde(default)]
    exists: bool,
    #[serde(skip)]
    schema: Option<Arc<Schema>>,
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
            && self.key == other.key
            && self.data == other.data
            && self.updated == other.updated
            && self.increment == other.increment
            && self.relationships == other.relationships
            && self.errors == other.errors
            && self.exists == other.exists
    }
}

impl Entity {
    /// A fresh, unsaved entity.
    pub fn new(model: Option<&str>) -> Self {
        Self {
            model: model.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_key<I, K>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.key = key.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attach a schema to this entity and every nested entity.
    pub fn attach_schema(&mut self, schema: Arc<Schema>) {
        for value in self.data.values_mut().chain(self.updated.values_mut()) {
            attach_nested(value, &schema);
        }
        self.schema = Some(schema);
    }

    /// Load persisted values without registering any change.
    pub(crate) fn load(&mut self, fields: BTreeMap<String, Value>, exists: bool) {
        self.data = fields.clone();
        self.updated = fields;
        self.increment.clear();
        self.exists = exists;
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Current value of a field, falling back to loaded relationships.
    ///
    /// Unknown fields read as `None`, not as an error.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.updated
            .get(field)
            .or_else(|| self.relationships.get(field))
    }

    pub fn get_json(&self, field: &str) -> Option<&JsonValue> {
        self.get(field).and_then(Value::as_json)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        if self.updated.contains_key(field) {
            return self.updated.get_mut(field);
        }
        self.relationships.get_mut(field)
    }

    /// Whether a field holds a non-null value.
    pub fn has(&self, field: &str) -> bool {
        self.get(field).map_or(false, |v| !v.is_null())
    }

    /// Assign one field, discarding any pending increment on it.
    ///
    /// With a schema attached the value is cast first, so nested maps and
    /// lists turn into entities and sets.
    pub fn set_field(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let mut value = value.into();
        if let Some(schema) = &self.schema {
            let options = CastOptions::default().model(self.model.as_deref());
            value = Schema::cast(schema, Some(&field), value, &options);
        }
        self.increment.remove(&field);
        self.updated.insert(field, value);
    }

    /// Assign many fields at once.
    pub fn set<I, K, V>(&mut self, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (field, value) in data {
            self.set_field(field, value);
        }
    }

    /// Remove a field from the pending values.
    pub fn unset(&mut self, field: &str) -> Option<Value> {
        self.increment.remove(field);
        self.updated.remove(field)
    }

    /// Add `by` to a numeric field and record the delta.
    ///
    /// A missing field counts as `0`. Returns the new value.
    pub fn increment(&mut self, field: &str, by: impl Into<JsonValue>) -> Result<JsonValue, EntityError> {
        let by = by.into();
        let not_numeric = || EntityError::NotNumeric {
            field: field.to_string(),
        };
        if Numeric::of(&by).is_none() {
            return Err(not_numeric());
        }
        let current = match self.updated.get(field) {
            None => JsonValue::from(0),
            Some(Value::Json(JsonValue::Null)) => JsonValue::from(0),
            Some(Value::Json(json)) => json.clone(),
            Some(_) => return Err(not_numeric()),
        };
        let next = numeric_add(&current, &by).ok_or_else(not_numeric)?;
        let delta = match self.increment.get(field) {
            Some(previous) => numeric_add(previous, &by).ok_or_else(not_numeric)?,
            None => by,
        };
        self.increment.insert(field.to_string(), delta);
        self.updated.insert(field.to_string(), Value::Json(next.clone()));
        Ok(next)
    }

    /// `increment` with the sign flipped.
    pub fn decrement(&mut self, field: &str, by: impl Into<JsonValue>) -> Result<JsonValue, EntityError> {
        let by = by.into();
        let negated = numeric_neg(&by).ok_or_else(|| EntityError::NotNumeric {
            field: field.to_string(),
        })?;
        self.increment(field, negated)
    }

    /// Pending increment deltas, keyed by field.
    pub fn increments(&self) -> &BTreeMap<String, JsonValue> {
        &self.increment
    }

    /// Change state of one field.
    ///
    /// `None` if the field was never set, `Some(false)` if it still holds its
    /// loaded value, `Some(true)` otherwise. Nested entities and sets are
    /// asked for their own state.
    pub fn modified(&self, field: &str) -> Option<bool> {
        match (self.data.get(field), self.updated.get(field)) {
            (None, None) => None,
            (Some(_), None) => Some(true),
            (None, Some(_)) => Some(true),
            (Some(original), Some(current)) => {
                Some(original != current || current.modified() == Some(true))
            }
        }
    }

    /// Change state of every known field.
    pub fn modified_fields(&self) -> BTreeMap<String, bool> {
        self.data
            .keys()
            .chain(self.updated.keys())
            .filter_map(|field| self.modified(field).map(|m| (field.clone(), m)))
            .collect()
    }

    /// Whether any field changed since the entity was loaded or synced.
    pub fn is_modified(&self) -> bool {
        self.modified_fields().values().any(|m| *m)
    }

    /// Reconcile pending writes into persisted state.
    ///
    /// `id` (a scalar, or a list for composite keys) is mapped onto the key
    /// fields; `data` carries any other generated values. Both land in the
    /// loaded and the pending values, increments are cleared and `exists`
    /// follows the options. Calling it twice with the same arguments yields
    /// the same state.
    pub fn sync(
        &mut self,
        id: Option<JsonValue>,
        data: BTreeMap<String, Value>,
        options: SyncOptions,
    ) -> Result<(), EntityError> {
        if let Some(id) = id {
            let key_values = self.map_id(id)?;
            for (field, value) in key_values {
                self.updated.insert(field, Value::Json(value));
            }
        }
        self.updated.extend(data);
        if options.materialize {
            self.exists = true;
        }
        if options.dematerialize {
            self.exists = false;
        }
        let exists = self.exists;
        self.commit(exists);
        Ok(())
    }

    /// Forget the persisted value of `fields` so they keep reporting as
    /// modified. Sources call this after `sync` for fields a write skipped.
    pub fn keep_pending<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            self.data.remove(field.as_ref());
        }
    }

    /// Copy pending values over loaded ones, recursing into nested values.
    pub(crate) fn commit(&mut self, exists: bool) {
        for value in self.updated.values_mut() {
            value.commit();
        }
        self.data = self.updated.clone();
        self.increment.clear();
        self.exists = exists;
    }

    fn map_id(&self, id: JsonValue) -> Result<Vec<(String, JsonValue)>, EntityError> {
        match self.key.len() {
            0 => Err(EntityError::Unkeyed),
            1 => Ok(vec![(self.key[0].clone(), id)]),
            expected => {
                let values = match id {
                    JsonValue::Array(values) => values,
                    _ => return Err(EntityError::KeyMismatch { expected, actual: 1 }),
                };
                if values.len() != expected {
                    return Err(EntityError::KeyMismatch {
                        expected,
                        actual: values.len(),
                    });
                }
                Ok(self.key.iter().cloned().zip(values).collect())
            }
        }
    }

    /// Key values of this entity, `None` if any component is missing.
    pub fn key(&self) -> Option<Options> {
        if self.key.is_empty() {
            return None;
        }
        let mut key = Options::new();
        for field in &self.key {
            match self.get_json(field) {
                Some(value) if !value.is_null() => {
                    key.insert(field.clone(), value.clone());
                }
                _ => return None,
            }
        }
        Some(key)
    }

    /// Replace every pending value through `f` (used for content recasting).
    pub(crate) fn recast<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, Value) -> Value,
    {
        let updated = std::mem::take(&mut self.updated);
        self.updated = updated
            .into_iter()
            .map(|(field, value)| {
                let value = f(&field, value);
                (field, value)
            })
            .collect();
    }

    pub fn relation(&self, name: &str) -> Option<&Value> {
        self.relationships.get(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.relationships.insert(name.into(), value.into());
    }

    pub fn relations(&self) -> &BTreeMap<String, Value> {
        &self.relationships
    }

    /// Reset all validation errors.
    pub fn reset_errors(&mut self) {
        self.errors.clear();
    }

    /// All validation errors.
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    /// Errors for one field.
    pub fn error(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    /// Add one message to a field, after any it already has.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    /// Merge a whole error map, appending to existing messages.
    pub fn merge_errors(&mut self, errors: Errors) {
        for (field, messages) in errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    /// Pending values as plain JSON, without relationships.
    pub fn fields_json(&self) -> Options {
        let options = ExportOptions::default();
        self.updated
            .iter()
            .map(|(field, value)| (field.clone(), value.to_json(&options)))
            .collect()
    }

    /// Exported field map (pending values plus relationships).
    pub fn data(&self) -> Options {
        match self.to_array(&ExportOptions::default()) {
            JsonValue::Object(map) => map,
            _ => Options::new(),
        }
    }

    /// Export as plain JSON.
    ///
    /// Pending values come first; relationships only fill keys the entity
    /// does not already hold. A handler registered for this entity's model
    /// replaces the default export entirely.
    pub fn to_array(&self, options: &ExportOptions) -> JsonValue {
        if let Some(handler) = options.handler_for(self.model.as_deref()) {
            return handler(self, options);
        }
        let mut out: Options = self
            .updated
            .iter()
            .map(|(field, value)| (field.clone(), value.to_json(options)))
            .collect();
        for (name, value) in &self.relationships {
            if !out.contains_key(name) {
                out.insert(name.clone(), value.to_json(options));
            }
        }
        JsonValue::Object(out)
    }

    /// Export into a named format (`array`, `json`, or any registered one).
    pub fn to(&self, format: &str, options: &ExportOptions) -> Result<Exported, EntityError> {
        export::render(self.to_array(options), format)
    }

    /// Serialize the entity's data (never its schema).
    pub fn serialize_json(&self) -> Result<String, EntityError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize an entity; the result carries no schema.
    pub fn deserialize_json(json: &str) -> Result<Self, EntityError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn attach_nested(value: &mut Value, schema: &Arc<Schema>) {
    match value {
        Value::Json(_) => {}
        Value::Entity(entity) => entity.attach_schema(Arc::clone(schema)),
        Value::Set(set) => {
            for item in set.iter_mut() {
                attach_nested(item, schema);
            }
        }
    }
}
