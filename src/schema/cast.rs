//! Shape casting: raw data → entity, set or scalar.

use super::Schema;
use crate::collection::Collection;
use crate::entity::Entity;
use crate::value::{is_sequential, sequential_items, Value};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Options controlling [`Schema::cast`].
#[derive(Debug, Clone)]
pub struct CastOptions {
    /// Dotted path of the value being cast, relative to the top-level entity
    pub path: Option<String>,
    /// Model name attached to any entity or set that gets built
    pub model: Option<String>,
    /// Key field name(s) attached to the top-level entity
    pub key: Vec<String>,
    /// Build entities/sets (`true`) or only cast scalars in place (`false`)
    pub wrap: bool,
    /// Recast the fields of an already-wrapped entity
    pub content: bool,
    /// Existence flag given to built entities
    pub exists: bool,
    within_set: bool,
}

impl Default for CastOptions {
    fn default() -> Self {
        Self {
            path: None,
            model: None,
            key: Vec::new(),
            wrap: true,
            content: false,
            exists: false,
            within_set: false,
        }
    }
}

impl CastOptions {
    pub fn model(mut self, model: Option<&str>) -> Self {
        self.model = model.map(str::to_string);
        self
    }

    pub fn key(mut self, key: &[String]) -> Self {
        self.key = key.to_vec();
        self
    }

    pub fn exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    pub fn wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn content(mut self, content: bool) -> Self {
        self.content = content;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Options for the fields of an entity found at `path`.
    fn fields_of(&self, path: Option<String>) -> Self {
        Self {
            path,
            key: Vec::new(),
            within_set: false,
            ..self.clone()
        }
    }

    /// Options for the elements of a set found at `path`.
    fn elements_of(&self, path: Option<String>) -> Self {
        Self {
            path,
            key: Vec::new(),
            within_set: true,
            ..self.clone()
        }
    }
}

fn join_path(base: Option<&str>, key: Option<&str>) -> Option<String> {
    match (base, key) {
        (Some(base), Some(key)) => Some(format!("{}.{}", base, key)),
        (None, Some(key)) => Some(key.to_string()),
        (Some(base), None) => Some(base.to_string()),
        (None, None) => None,
    }
}

enum Shape {
    Entity,
    Set,
}

impl Schema {
    /// Cast `data` found under `key` (relative to `options.path`).
    ///
    /// Decision procedure:
    /// 1. the dotted path is `options.path` + `key` (set elements keep the
    ///    path of their set);
    /// 2. sets pass through unchanged;
    /// 3. entities pass through unless the path is declared as an array (they
    ///    are then wrapped into a one-element set) or `content` asks for their
    ///    fields to be recast;
    /// 4. JSON is shaped: a declared array, or a sequential list on a path not
    ///    typed `object`, becomes a set; other objects become entities;
    ///    scalars go through [`Schema::cast_type`];
    /// 5. with `wrap` off, shapes are kept as JSON and only scalars are cast.
    pub fn cast(schema: &Arc<Schema>, key: Option<&str>, data: Value, options: &CastOptions) -> Value {
        let path = join_path(options.path.as_deref(), key);
        let declared_array = !options.within_set
            && path.as_deref().and_then(|p| schema.is("array", p)).unwrap_or(false);

        match data {
            Value::Set(set) => Value::Set(set),
            Value::Entity(entity) if declared_array => {
                let mut set = Collection::new(options.model.as_deref());
                set.push(Value::Entity(entity));
                Value::Set(set)
            }
            Value::Entity(mut entity) => {
                if options.content {
                    let child = options.fields_of(path);
                    entity.recast(|name, value| Schema::cast(schema, Some(name), value, &child));
                }
                Value::Entity(entity)
            }
            Value::Json(json) => Schema::cast_json(schema, path, declared_array, json, options),
        }
    }

    /// Cast a raw record into a top-level entity.
    pub fn cast_entity(schema: &Arc<Schema>, record: crate::query::Options, options: &CastOptions) -> Entity {
        let child = options.fields_of(options.path.clone());
        let fields = record
            .into_iter()
            .map(|(name, value)| {
                let cast = Schema::cast(schema, Some(&name), Value::Json(value), &child);
                (name, cast)
            })
            .collect();
        let mut entity = Entity::new(options.model.as_deref())
            .with_key(options.key.iter().cloned())
            .with_schema(Arc::clone(schema));
        entity.load(fields, options.exists);
        entity
    }

    fn cast_json(
        schema: &Arc<Schema>,
        path: Option<String>,
        declared_array: bool,
        json: JsonValue,
        options: &CastOptions,
    ) -> Value {
        let is_list_or_map = json.is_array() || json.is_object();
        if !is_list_or_map && !declared_array {
            let cast = match path.as_deref() {
                Some(p) => schema.cast_type(p, json),
                None => json,
            };
            return Value::Json(cast);
        }

        let declared_object = path.as_deref().and_then(|p| schema.type_of(p)) == Some("object");
        let sequential = is_sequential(&json);
        let shape = if declared_array || (sequential && !declared_object) {
            Shape::Set
        } else {
            Shape::Entity
        };

        match shape {
            Shape::Set => {
                let items = if sequential { sequential_items(json) } else { vec![json] };
                let element = options.elements_of(path);
                let values = items
                    .into_iter()
                    .map(|item| Schema::cast(schema, None, Value::Json(item), &element));
                if options.wrap {
                    let mut set = Collection::new(options.model.as_deref());
                    set.extend(values);
                    Value::Set(set)
                } else {
                    Value::Json(JsonValue::Array(values.map(unwrap_json).collect()))
                }
            }
            Shape::Entity => {
                let JsonValue::Object(map) = json else {
                    return Value::Json(json);
                };
                let child = options.fields_of(path);
                let fields: BTreeMap<String, Value> = map
                    .into_iter()
                    .map(|(name, value)| {
                        let cast = Schema::cast(schema, Some(&name), Value::Json(value), &child);
                        (name, cast)
                    })
                    .collect();
                if options.wrap {
                    let mut entity =
                        Entity::new(options.model.as_deref()).with_schema(Arc::clone(schema));
                    entity.load(fields, options.exists);
                    Value::Entity(Box::new(entity))
                } else {
                    Value::Json(JsonValue::Object(
                        fields.into_iter().map(|(k, v)| (k, unwrap_json(v))).collect(),
                    ))
                }
            }
        }
    }
}

fn unwrap_json(value: Value) -> JsonValue {
    match value {
        Value::Json(json) => json,
        other => other.to_json(&Default::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::with_fields([
            ("tags", Field::new("string").array()),
            ("scores", Field::new("integer").array()),
            ("meta", Field::new("object")),
            ("author", Field::new("object")),
            ("author.age", Field::new("integer")),
            ("count", Field::new("integer")),
            ("note", Field::new("string").nullable()),
        ]))
    }

    #[test]
    fn test_scalar_on_declared_array_becomes_single_element_set() {
        let cast = Schema::cast(&schema(), Some("tags"), Value::from("rust"), &CastOptions::default());
        let set = cast.as_set().expect("declared array wraps into a set");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).and_then(Value::as_json), Some(&json!("rust")));
    }

    #[test]
    fn test_sequential_list_on_declared_array_is_a_set_of_cast_scalars() {
        let cast = Schema::cast(&schema(), Some("scores"), Value::Json(json!(["1", 2])), &CastOptions::default());
        let set = cast.as_set().expect("set");
        assert_eq!(set.to_array(&Default::default()), json!([1, 2]));
    }

    #[test]
    fn test_associative_map_on_undeclared_field_is_an_entity() {
        let cast = Schema::cast(&schema(), Some("extra"), Value::Json(json!({"a": 1})), &CastOptions::default());
        assert!(cast.as_entity().is_some());
    }

    #[test]
    fn test_sequential_list_on_undeclared_field_is_a_set() {
        let cast = Schema::cast(&schema(), Some("extra"), Value::Json(json!([1, 2, 3])), &CastOptions::default());
        assert_eq!(cast.as_set().map(Collection::len), Some(3));
    }

    #[test]
    fn test_sequential_list_on_object_field_is_an_entity() {
        let cast = Schema::cast(&schema(), Some("meta"), Value::Json(json!({"0": "a", "1": "b"})), &CastOptions::default());
        let entity = cast.as_entity().expect("object type wins over sequential keys");
        assert_eq!(entity.get("0").and_then(Value::as_json), Some(&json!("a")));
    }

    #[test]
    fn test_nested_paths_use_dotted_field_names() {
        let cast = Schema::cast(
            &schema(),
            Some("author"),
            Value::Json(json!({"name": "Ann", "age": "41"})),
            &CastOptions::default().model(Some("Post")),
        );
        let author = cast.as_entity().expect("entity");
        assert_eq!(author.model(), Some("Post"));
        assert_eq!(author.get("age").and_then(Value::as_json), Some(&json!(41)));
        assert_eq!(author.modified("age"), Some(false));
    }

    #[test]
    fn test_wrapped_values_pass_through() {
        let entity = Entity::new(None);
        let cast = Schema::cast(&schema(), Some("author"), Value::from(entity.clone()), &CastOptions::default());
        assert_eq!(cast.as_entity(), Some(&entity));

        let set = Collection::new(None);
        let cast = Schema::cast(&schema(), Some("extra"), Value::Set(set.clone()), &CastOptions::default());
        assert_eq!(cast.as_set(), Some(&set));
    }

    #[test]
    fn test_entity_on_declared_array_is_wrapped_in_a_set() {
        let cast = Schema::cast(&schema(), Some("tags"), Value::from(Entity::new(None)), &CastOptions::default());
        assert_eq!(cast.as_set().map(Collection::len), Some(1));
    }

    #[test]
    fn test_nullable_null_passes_through() {
        let cast = Schema::cast(&schema(), Some("note"), Value::null(), &CastOptions::default());
        assert!(cast.is_null());
    }

    #[test]
    fn test_unwrapped_cast_keeps_json_shape() {
        let options = CastOptions::default().wrap(false);
        let cast = Schema::cast(&schema(), Some("author"), Value::Json(json!({"age": "7"})), &options);
        assert_eq!(cast, Value::Json(json!({"age": 7})));

        let cast = Schema::cast(&schema(), Some("scores"), Value::Json(json!("3")), &options);
        assert_eq!(cast, Value::Json(json!([3])));
    }

    #[test]
    fn test_content_recasts_wrapped_entity() {
        let mut author = Entity::new(None);
        author.set_field("age", "12");
        let options = CastOptions::default().content(true);
        let cast = Schema::cast(&schema(), Some("author"), Value::from(author), &options);
        let author = cast.as_entity().expect("entity");
        assert_eq!(author.get("age").and_then(Value::as_json), Some(&json!(12)));
    }

    #[test]
    fn test_cast_entity_builds_persisted_record() {
        let mut record = crate::query::Options::new();
        record.insert("count".into(), json!("5"));
        record.insert("tags".into(), json!(["a"]));
        let options = CastOptions::default().model(Some("Post")).key(&["id".to_string()]).exists(true);
        let entity = Schema::cast_entity(&schema(), record, &options);
        assert!(entity.exists());
        assert_eq!(entity.key_fields(), ["id".to_string()]);
        assert_eq!(entity.get("count").and_then(Value::as_json), Some(&json!(5)));
        assert!(entity.get("tags").and_then(Value::as_set).is_some());
        assert!(!entity.is_modified());
    }
}
