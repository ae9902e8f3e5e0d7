//! Ordered sets of entities or scalars.
//!
//! A [`Collection`] is what multi-row reads return and what schema casting
//! builds for list-shaped fields. It owns its items and carries a single
//! shared cursor (`current`/`next`/`prev`/`rewind`/`end`); iterating with
//! [`Collection::iter`] does not touch the cursor.

use crate::entity::{export, Entity, EntityError, ExportOptions, Exported};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

/// An ordered set of values bound (optionally) to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default)]
    items: Vec<Value>,
    #[serde(skip, default = "start")]
    cursor: Option<usize>,
}

fn start() -> Option<usize> {
    Some(0)
}

impl Default for Collection {
    fn default() -> Self {
        Self {
            model: None,
            items: Vec::new(),
            cursor: start(),
        }
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.items == other.items
    }
}

impl Collection {
    pub fn new(model: Option<&str>) -> Self {
        Self {
            model: model.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.items.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.items.get_mut(index)
    }

    pub fn first(&self) -> Option<&Value> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Value> {
        self.items.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Value> {
        self.items.iter_mut()
    }

    /// Entities held by the set, skipping scalar items.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.items.iter().filter_map(Value::as_entity)
    }

    /// Remove the item at `index`, shifting later items down.
    pub fn remove(&mut self, index: usize) -> Option<Value> {
        if index >= self.items.len() {
            return None;
        }
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = start();
    }

    /// Item under the cursor.
    pub fn current(&self) -> Option<&Value> {
        self.cursor.and_then(|i| self.items.get(i))
    }

    /// Cursor position, `None` once it has moved off either end.
    pub fn key(&self) -> Option<usize> {
        self.cursor.filter(|i| *i < self.items.len())
    }

    pub fn valid(&self) -> bool {
        self.key().is_some()
    }

    /// Advance the cursor and return the new current item.
    pub fn next(&mut self) -> Option<&Value> {
        self.cursor = match self.cursor {
            Some(i) if i + 1 < self.items.len() => Some(i + 1),
            _ => None,
        };
        self.current()
    }

    /// Step the cursor back and return the new current item.
    pub fn prev(&mut self) -> Option<&Value> {
        self.cursor = match self.cursor {
            Some(i) if i > 0 && i <= self.items.len() => Some(i - 1),
            _ => None,
        };
        self.current()
    }

    /// Move the cursor to the first item.
    pub fn rewind(&mut self) -> Option<&Value> {
        self.cursor = start();
        self.current()
    }

    /// Move the cursor to the last item.
    pub fn end(&mut self) -> Option<&Value> {
        self.cursor = self.items.len().checked_sub(1);
        self.current()
    }

    /// Call `f` on every item in order.
    pub fn each<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Value),
    {
        for item in &mut self.items {
            f(item);
        }
    }

    /// A new set holding `f` applied to every item.
    pub fn map<F>(&self, f: F) -> Collection
    where
        F: FnMut(&Value) -> Value,
    {
        Collection {
            model: self.model.clone(),
            items: self.items.iter().map(f).collect(),
            cursor: start(),
        }
    }

    pub fn reduce<T, F>(&self, init: T, f: F) -> T
    where
        F: FnMut(T, &Value) -> T,
    {
        self.items.iter().fold(init, f)
    }

    /// A new set holding the items `f` accepts.
    pub fn filter<F>(&self, mut f: F) -> Collection
    where
        F: FnMut(&Value) -> bool,
    {
        Collection {
            model: self.model.clone(),
            items: self.items.iter().filter(|v| f(v)).cloned().collect(),
            cursor: start(),
        }
    }

    pub fn find<F>(&self, mut f: F) -> Option<&Value>
    where
        F: FnMut(&Value) -> bool,
    {
        self.items.iter().find(|v| f(v))
    }

    /// Sort in place (stable).
    pub fn sort_by<F>(&mut self, f: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.items.sort_by(f);
    }

    /// Sort entities by one field's JSON value; scalars sort by themselves.
    pub fn sort_by_field(&mut self, field: &str) {
        self.items.sort_by(|a, b| {
            let a = sort_key(a, field);
            let b = sort_key(b, field);
            compare_json(a, b)
        });
    }

    /// Whether any held entity or set reports a change.
    pub fn is_modified(&self) -> bool {
        self.items.iter().any(|v| v.modified() == Some(true))
    }

    /// Mark every nested value as persisted.
    pub(crate) fn commit(&mut self) {
        for item in &mut self.items {
            item.commit();
        }
    }

    /// Export every item as plain JSON.
    pub fn to_array(&self, options: &ExportOptions) -> JsonValue {
        JsonValue::Array(self.items.iter().map(|v| v.to_json(options)).collect())
    }

    /// Export into a named format (`array`, `json`, or any registered one).
    pub fn to(&self, format: &str, options: &ExportOptions) -> Result<Exported, EntityError> {
        export::render(self.to_array(options), format)
    }
}

fn sort_key<'v>(value: &'v Value, field: &str) -> Option<&'v JsonValue> {
    match value {
        Value::Json(json) => Some(json),
        Value::Entity(entity) => entity.get_json(field),
        Value::Set(_) => None,
    }
}

/// Total order over optional JSON scalars: missing < null < bool < number < string.
pub(crate) fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            None => 0,
            Some(JsonValue::Null) => 1,
            Some(JsonValue::Bool(_)) => 2,
            Some(JsonValue::Number(_)) => 3,
            Some(JsonValue::String(_)) => 4,
            Some(_) => 5,
        }
    }
    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl Extend<Value> for Collection {
    fn extend<I: IntoIterator<Item = Value>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl FromIterator<Value> for Collection {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Collection {
            items: iter.into_iter().collect(),
            ..Collection::default()
        }
    }
}

impl FromIterator<Entity> for Collection {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        iter.into_iter().map(Value::from).collect()
    }
}

impl IntoIterator for Collection {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbers() -> Collection {
        [1, 2, 3].into_iter().map(|n| Value::Json(json!(n))).collect()
    }

    #[test]
    fn test_cursor_walks_both_ways() {
        let mut set = numbers();
        assert_eq!(set.current(), Some(&Value::Json(json!(1))));
        assert_eq!(set.next(), Some(&Value::Json(json!(2))));
        assert_eq!(set.next(), Some(&Value::Json(json!(3))));
        assert_eq!(set.key(), Some(2));
        assert_eq!(set.prev(), Some(&Value::Json(json!(2))));
        assert_eq!(set.end(), Some(&Value::Json(json!(3))));
        assert_eq!(set.rewind(), Some(&Value::Json(json!(1))));
    }

    #[test]
    fn test_cursor_past_either_end_is_invalid() {
        let mut set = numbers();
        set.end();
        assert_eq!(set.next(), None);
        assert!(!set.valid());
        assert_eq!(set.next(), None);

        set.rewind();
        assert_eq!(set.prev(), None);
        assert!(!set.valid());
        assert_eq!(set.current(), None);
    }

    #[test]
    fn test_empty_set_has_no_current() {
        let mut set = Collection::new(Some("Post"));
        assert!(!set.valid());
        assert_eq!(set.rewind(), None);
        assert_eq!(set.end(), None);
    }

    #[test]
    fn test_map_filter_reduce() {
        let set = numbers();
        let doubled = set.map(|v| {
            Value::Json(json!(v.as_json().and_then(JsonValue::as_i64).unwrap_or(0) * 2))
        });
        assert_eq!(doubled.to_array(&ExportOptions::default()), json!([2, 4, 6]));

        let odd = set.filter(|v| v.as_json().and_then(JsonValue::as_i64).map_or(false, |n| n % 2 == 1));
        assert_eq!(odd.len(), 2);

        let sum = set.reduce(0, |acc, v| acc + v.as_json().and_then(JsonValue::as_i64).unwrap_or(0));
        assert_eq!(sum, 6);
        assert_eq!(set.find(|v| v.as_json() == Some(&json!(2))), Some(&Value::Json(json!(2))));
    }

    #[test]
    fn test_sort_by_field_orders_entities() {
        let mut set: Collection = ["b", "c", "a"]
            .into_iter()
            .map(|title| {
                let mut entity = Entity::new(Some("Post"));
                entity.set_field("title", title);
                entity
            })
            .collect();
        set.sort_by_field("title");
        let titles: Vec<_> = set.entities().filter_map(|e| e.get_json("title").cloned()).collect();
        assert_eq!(titles, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_is_modified_looks_into_entities() {
        let mut entity = Entity::new(None);
        entity.set_field("title", "x");
        let mut set = Collection::new(None);
        set.push(entity);
        assert!(set.is_modified());
        set.commit();
        assert!(!set.is_modified());
    }

    #[test]
    fn test_to_json_format() {
        let set = numbers();
        let text = set
            .to("json", &ExportOptions::default())
            .ok()
            .and_then(Exported::into_text);
        assert_eq!(text.as_deref(), Some("[1,2,3]"));
        assert!(set.to("nope", &ExportOptions::default()).is_err());
    }

    #[test]
    fn test_equality_ignores_cursor() {
        let a = numbers();
        let mut b = numbers();
        b.end();
        assert_eq!(a, b);
    }
}
