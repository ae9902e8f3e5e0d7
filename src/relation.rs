//! Relationship declarations and bound relationships.
//!
//! Models declare relations with a [`RelationType`] and a
//! [`RelationConfig`]. Declarations are only turned into [`Relationship`]s
//! when first used; building one is the source's job
//! (`Source::relationship`), since how records link (foreign keys or
//! embedding) depends on the store.

use crate::entity::Entity;
use crate::query::Options;
use convert_case::{Case, Casing};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of relationship between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationType {
    HasOne,
    HasMany,
    BelongsTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::HasOne => "hasOne",
            RelationType::HasMany => "hasMany",
            RelationType::BelongsTo => "belongsTo",
        }
    }

    /// Whether the related side holds a single record.
    pub fn is_single(&self) -> bool {
        !matches!(self, RelationType::HasMany)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hasOne" | "has_one" => Ok(RelationType::HasOne),
            "hasMany" | "has_many" => Ok(RelationType::HasMany),
            "belongsTo" | "belongs_to" => Ok(RelationType::BelongsTo),
            other => Err(other.to_string()),
        }
    }
}

/// How related records are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Link {
    /// Separate records matched through key fields
    #[default]
    Key,
    /// Embedded in the owning record under the relation's field name
    Contained,
}

/// Declared options of one relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationConfig {
    /// Target model name; defaults to the relation name
    pub to: Option<String>,
    /// `local field => foreign field`; defaults depend on the relation type
    pub key: Option<BTreeMap<String, String>>,
    /// Field the related data is exposed under on the entity
    pub field_name: Option<String>,
    pub conditions: Options,
    pub fields: Vec<String>,
    pub order: Option<JsonValue>,
    pub limit: Option<usize>,
    pub link: Link,
}

impl RelationConfig {
    pub fn to(model: impl Into<String>) -> Self {
        Self {
            to: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn key<I, L, F>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = (L, F)>,
        L: Into<String>,
        F: Into<String>,
    {
        self.key = Some(key.into_iter().map(|(l, f)| (l.into(), f.into())).collect());
        self
    }

    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    pub fn conditions(mut self, conditions: Options) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn order(mut self, order: impl Into<JsonValue>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contained(mut self) -> Self {
        self.link = Link::Contained;
        self
    }
}

/// A bound relationship from one model to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub kind: RelationType,
    pub from: String,
    pub to: String,
    /// `local field => foreign field`
    pub keys: BTreeMap<String, String>,
    pub field_name: String,
    pub link: Link,
    pub conditions: Options,
    pub fields: Vec<String>,
    pub order: Option<JsonValue>,
    pub limit: Option<usize>,
}

impl Relationship {
    /// Bind a declaration, filling in default keys.
    ///
    /// Without explicit keys, `belongsTo` links `<to>_id` to `id` and the
    /// `has*` kinds link the owner's first key field to `<from>_id`.
    pub fn new(
        from: &str,
        from_key: &[String],
        kind: RelationType,
        name: &str,
        field_name: String,
        config: &RelationConfig,
    ) -> Self {
        let to = config.to.clone().unwrap_or_else(|| name.to_string());
        let keys = match &config.key {
            Some(keys) => keys.clone(),
            None => match kind {
                RelationType::BelongsTo => BTreeMap::from([(
                    format!("{}_id", to.to_case(Case::Snake)),
                    "id".to_string(),
                )]),
                RelationType::HasOne | RelationType::HasMany => BTreeMap::from([(
                    from_key.first().cloned().unwrap_or_else(|| "id".to_string()),
                    format!("{}_id", from.to_case(Case::Snake)),
                )]),
            },
        };
        Self {
            name: name.to_string(),
            kind,
            from: from.to_string(),
            to,
            keys,
            field_name: config.field_name.clone().unwrap_or(field_name),
            link: config.link,
            conditions: config.conditions.clone(),
            fields: config.fields.clone(),
            order: config.order.clone(),
            limit: config.limit,
        }
    }

    /// Conditions selecting the records related to `entity`.
    ///
    /// `None` when a local key value is missing or the relation is embedded.
    pub fn conditions_for(&self, entity: &Entity) -> Option<Options> {
        if self.link == Link::Contained {
            return None;
        }
        let mut conditions = self.conditions.clone();
        for (local, foreign) in &self.keys {
            match entity.get_json(local) {
                Some(value) if !value.is_null() => {
                    conditions.insert(foreign.clone(), value.clone());
                }
                _ => return None,
            }
        }
        Some(conditions)
    }

    /// Find options for loading the related records of `entity`.
    pub fn query_for(&self, entity: &Entity) -> Option<Options> {
        let conditions = self.conditions_for(entity)?;
        let mut options = Options::new();
        options.insert("conditions".into(), JsonValue::Object(conditions));
        if !self.fields.is_empty() {
            options.insert("fields".into(), self.fields.clone().into());
        }
        if let Some(order) = &self.order {
            options.insert("order".into(), order.clone());
        }
        if let Some(limit) = self.limit {
            options.insert("limit".into(), limit.into());
        }
        Some(options)
    }

    /// Finder used to load the related side.
    pub fn finder(&self) -> &'static str {
        if self.kind.is_single() {
            "first"
        } else {
            "all"
        }
    }
}
