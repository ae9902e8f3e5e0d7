//! Model definitions and resolved meta.
//!
//! A [`ModelDef`] is what callers register: meta overrides, default query
//! options, relations, finders, validation rules and schema hints. Parent
//! definitions are composed explicitly with [`ModelDef::inherit`]. When a
//! model is configured its meta is resolved into a [`Meta`] by layering
//! registry defaults, the connection's class defaults and the definition's
//! own meta, in that order.

use super::finder::FinderDef;
use super::ModelError;
use crate::query::{merge, Options};
use crate::relation::{RelationConfig, RelationType};
use crate::schema::Field;
use crate::validator::{Rule, Rules, Validator};
use convert_case::{Case, Casing};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Connection name a model binds to when its definition names none.
pub const DEFAULT_CONNECTION: &str = "default";

/// Resolved per-model metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Model name, the registry key
    pub name: String,
    /// Table/collection name
    pub source: String,
    /// Connection name; `None` binds the model to the mock connection
    pub connection: Option<String>,
    /// Key field name(s)
    #[serde(deserialize_with = "string_or_list", default = "default_key")]
    pub key: Vec<String>,
    /// Field used by `title()` and the `list` finder
    #[serde(default)]
    pub title: Option<String>,
    /// Restrict saved fields to the schema's
    #[serde(default = "default_locked")]
    pub locked: bool,
}

fn default_key() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_locked() -> bool {
    true
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(key) => vec![key],
        OneOrMany::Many(keys) => keys,
    })
}

impl Meta {
    /// Meta with every default applied.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: name.to_case(Case::Snake),
            connection: Some(DEFAULT_CONNECTION.to_string()),
            key: default_key(),
            title: None,
            locked: default_locked(),
        }
    }

    /// Default meta layer as an options map.
    pub(crate) fn defaults(name: &str) -> Options {
        match serde_json::to_value(Meta::new(name)) {
            Ok(JsonValue::Object(map)) => map,
            _ => Options::new(),
        }
    }

    /// Resolve merged meta layers; `name` always wins.
    pub(crate) fn resolve(name: &str, layers: &[&Options]) -> Result<Self, ModelError> {
        let mut merged = Meta::defaults(name);
        for layer in layers {
            for (key, value) in layer.iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged.insert("name".into(), JsonValue::String(name.to_string()));
        serde_json::from_value(JsonValue::Object(merged))
            .map_err(|e| ModelError::Config(format!("invalid meta for `{}`: {}", name, e)))
    }
}

/// A declared relation awaiting binding.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    pub kind: RelationType,
    pub name: String,
    pub config: RelationConfig,
}

/// Everything a caller declares about one model.
#[derive(Clone, Default)]
pub struct ModelDef {
    pub(crate) name: String,
    pub(crate) meta: Options,
    pub(crate) query: Options,
    pub(crate) relations: Vec<RelationDef>,
    pub(crate) finders: Vec<(String, FinderDef)>,
    pub(crate) rules: Rules,
    pub(crate) schema: BTreeMap<String, Field>,
    pub(crate) validator: Option<Arc<dyn Validator>>,
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .field("query", &self.query)
            .field("relations", &self.relations)
            .field("finders", &self.finders.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("rules", &self.rules)
            .field("schema", &self.schema)
            .finish()
    }
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set one raw meta entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn source(self, source: impl Into<String>) -> Self {
        self.meta("source", source.into())
    }

    /// Connection name; `None` binds to the mock connection.
    pub fn connection(self, connection: Option<&str>) -> Self {
        let value = connection.map_or(JsonValue::Null, |c| JsonValue::String(c.to_string()));
        self.meta("connection", value)
    }

    pub fn key<I, K>(self, key: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let key: Vec<JsonValue> = key.into_iter().map(|k| JsonValue::String(k.into())).collect();
        self.meta("key", key)
    }

    pub fn title(self, field: impl Into<String>) -> Self {
        self.meta("title", field.into())
    }

    pub fn locked(self, locked: bool) -> Self {
        self.meta("locked", locked)
    }

    /// Default query options merged under every `find`.
    pub fn query(mut self, options: Options) -> Self {
        self.query = merge(std::mem::take(&mut self.query), options);
        self
    }

    pub fn has_one(self, name: impl Into<String>, config: RelationConfig) -> Self {
        self.relation(RelationType::HasOne, name, config)
    }

    pub fn has_many(self, name: impl Into<String>, config: RelationConfig) -> Self {
        self.relation(RelationType::HasMany, name, config)
    }

    pub fn belongs_to(self, name: impl Into<String>, config: RelationConfig) -> Self {
        self.relation(RelationType::BelongsTo, name, config)
    }

    pub fn relation(mut self, kind: RelationType, name: impl Into<String>, config: RelationConfig) -> Self {
        let name = name.into();
        self.relations.retain(|r| r.name != name);
        self.relations.push(RelationDef { kind, name, config });
        self
    }

    pub fn finder(mut self, name: impl Into<String>, finder: impl Into<FinderDef>) -> Self {
        let name = name.into();
        self.finders.retain(|(n, _)| *n != name);
        self.finders.push((name, finder.into()));
        self
    }

    /// Add a validation rule to a field.
    pub fn validates(mut self, field: impl Into<String>, rule: impl Into<Rule>) -> Self {
        self.rules.entry(field.into()).or_default().push(rule.into());
        self
    }

    /// Declare a schema hint for a field.
    pub fn field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.schema.insert(name.into(), field.into());
        self
    }

    /// Use a validator other than the registry's.
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Compose with a parent definition; this definition's entries win.
    ///
    /// Meta and query options deep-merge, relations, finders, rules and
    /// schema hints are inherited unless redeclared here.
    pub fn inherit(mut self, parent: &ModelDef) -> Self {
        let mut meta = parent.meta.clone();
        // Source names follow the child unless it was set explicitly.
        meta.remove("source");
        self.meta = merge(meta, std::mem::take(&mut self.meta));
        self.query = merge(parent.query.clone(), std::mem::take(&mut self.query));

        let mut relations: Vec<RelationDef> = parent
            .relations
            .iter()
            .filter(|r| !self.relations.iter().any(|own| own.name == r.name))
            .cloned()
            .collect();
        relations.append(&mut self.relations);
        self.relations = relations;

        let mut finders: Vec<(String, FinderDef)> = parent
            .finders
            .iter()
            .filter(|(n, _)| !self.finders.iter().any(|(own, _)| own == n))
            .cloned()
            .collect();
        finders.append(&mut self.finders);
        self.finders = finders;

        for (field, rules) in &parent.rules {
            self.rules.entry(field.clone()).or_insert_with(|| rules.clone());
        }
        for (name, field) in &parent.schema {
            self.schema.entry(name.clone()).or_insert_with(|| field.clone());
        }
        if self.validator.is_none() {
            self.validator = parent.validator.clone();
        }
        self
    }
}
