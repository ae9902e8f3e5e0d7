//! Dynamic field values.
//!
//! Entities store their fields as [`Value`]s: a plain JSON value, a nested
//! [`Entity`] or a [`Collection`] ("set"). Nested values track their own
//! modifications, which is what lets [`Entity::modified`] look inside
//! embedded documents.

use crate::collection::Collection;
use crate::entity::{Entity, ExportOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

/// A single field value held by an [`Entity`] or a [`Collection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Scalar, array or object data that has not been wrapped
    Json(JsonValue),
    /// An embedded record
    Entity(Box<Entity>),
    /// An ordered set of values
    Set(Collection),
}

impl Value {
    /// The JSON `null` value.
    pub fn null() -> Self {
        Value::Json(JsonValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Json(JsonValue::Null))
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Collection> {
        match self {
            Value::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut Collection> {
        match self {
            Value::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Value::Entity(entity) => Some(*entity),
            _ => None,
        }
    }

    /// Change state of a nested value.
    ///
    /// Returns `None` for plain JSON, which carries no change tracking of its
    /// own; the owning entity compares it against its original instead.
    pub fn modified(&self) -> Option<bool> {
        match self {
            Value::Json(_) => None,
            Value::Entity(entity) => Some(entity.is_modified()),
            Value::Set(set) => Some(set.is_modified()),
        }
    }

    /// Export as plain JSON, recursing into nested entities and sets.
    pub fn to_json(&self, options: &ExportOptions) -> JsonValue {
        match self {
            Value::Json(json) => json.clone(),
            Value::Entity(entity) => entity.to_array(options),
            Value::Set(set) => set.to_array(options),
        }
    }

    /// Mark nested entities as persisted.
    pub(crate) fn commit(&mut self) {
        match self {
            Value::Json(_) => {}
            Value::Entity(entity) => entity.commit(true),
            Value::Set(set) => set.commit(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::Json(json)
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        Value::Entity(Box::new(entity))
    }
}

impl From<Collection> for Value {
    fn from(set: Collection) -> Self {
        Value::Set(set)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Json(JsonValue::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Json(JsonValue::String(s))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Json(JsonValue::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Json(JsonValue::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Json(JsonValue::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Json(JsonValue::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Json(JsonValue::Bool(b))
    }
}

/// Numeric view over a JSON value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    /// Numbers and numeric strings qualify; everything else does not.
    pub(crate) fn of(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Some(Numeric::Int(i)),
                None => n.as_f64().map(Numeric::Float),
            },
            JsonValue::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Some(Numeric::Int(i))
                } else {
                    s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Numeric::Float)
                }
            }
            _ => None,
        }
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }

    pub(crate) fn into_json(self) -> JsonValue {
        match self {
            Numeric::Int(i) => JsonValue::from(i),
            Numeric::Float(f) => Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        }
    }
}

/// Add two numeric JSON values, staying integral when both sides are.
pub(crate) fn numeric_add(a: &JsonValue, b: &JsonValue) -> Option<JsonValue> {
    let sum = match (Numeric::of(a)?, Numeric::of(b)?) {
        (Numeric::Int(x), Numeric::Int(y)) => match x.checked_add(y) {
            Some(sum) => Numeric::Int(sum),
            None => Numeric::Float(x as f64 + y as f64),
        },
        (x, y) => Numeric::Float(x.as_f64() + y.as_f64()),
    };
    Some(sum.into_json())
}

pub(crate) fn numeric_neg(value: &JsonValue) -> Option<JsonValue> {
    let negated = match Numeric::of(value)? {
        Numeric::Int(i) => match i.checked_neg() {
            Some(n) => Numeric::Int(n),
            None => Numeric::Float(-(i as f64)),
        },
        Numeric::Float(f) => Numeric::Float(-f),
    };
    Some(negated.into_json())
}

/// Whether a JSON value looks like a zero-based sequential list.
///
/// Arrays always do. Objects do when their keys are exactly `"0"..n` in
/// order, which is how list-shaped documents round-trip through some
/// stores. The empty object does not.
pub fn is_sequential(value: &JsonValue) -> bool {
    match value {
        JsonValue::Array(_) => true,
        JsonValue::Object(map) => {
            if map.is_empty() {
                return false;
            }
            let mut indexes = Vec::with_capacity(map.len());
            for key in map.keys() {
                match key.parse::<usize>() {
                    Ok(i) if i.to_string() == *key => indexes.push(i),
                    _ => return false,
                }
            }
            indexes.sort_unstable();
            indexes.into_iter().enumerate().all(|(i, k)| i == k)
        }
        _ => false,
    }
}

/// Elements of a sequential value in index order.
pub(crate) fn sequential_items(value: JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(map) => {
            let mut items: Vec<(usize, JsonValue)> = map
                .into_iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                .collect();
            items.sort_by_key(|(i, _)| *i);
            items.into_iter().map(|(_, v)| v).collect()
        }
        other => vec![other],
    }
}

/// Loose truthiness used by validators and boolean casting.
pub(crate) fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        JsonValue::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}
