//! The adapter contract every storage backend implements.
//!
//! A [`Source`] executes [`Query`]s and answers metadata questions for the
//! models bound to it. Drivers for SQL or document databases live outside
//! this crate; [`MemorySource`] is the in-process document store used as
//! the mock connection and in tests.

pub mod memory;

#[doc(inline)]
pub use memory::{IdStrategy, MemorySource};

use crate::entity::EntityError;
use crate::model::{FinderDef, Meta};
use crate::query::{Options, Query, QueryError, Record};
use crate::relation::{RelationConfig, RelationType, Relationship};
use crate::schema::{Field, Schema};
use convert_case::{Case, Casing};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Error type for source operations
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The query names no source (table/collection)
    MissingSource,
    /// A write needs key values the query or entity does not carry
    MissingKey(String),
    /// An insert carries a key that is already stored
    DuplicateKey(String),
    /// The source does not support an operation or calculation
    Unsupported(String),
    /// Adapter options are invalid
    InvalidConfig(String),
    /// An internal lock was poisoned
    Lock(String),
    /// Syncing the written entity failed
    Entity(EntityError),
    Query(QueryError),
    /// Backend-specific failure
    Backend(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::MissingSource => write!(f, "Query does not name a source"),
            SourceError::MissingKey(msg) => write!(f, "Missing key: {}", msg),
            SourceError::DuplicateKey(msg) => write!(f, "Duplicate key: {}", msg),
            SourceError::Unsupported(what) => write!(f, "Unsupported by this source: {}", what),
            SourceError::InvalidConfig(msg) => write!(f, "Invalid source configuration: {}", msg),
            SourceError::Lock(msg) => write!(f, "Source lock error: {}", msg),
            SourceError::Entity(err) => write!(f, "Entity error: {}", err),
            SourceError::Query(err) => write!(f, "Query error: {}", err),
            SourceError::Backend(msg) => write!(f, "Source error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<EntityError> for SourceError {
    fn from(err: EntityError) -> Self {
        SourceError::Entity(err)
    }
}

impl From<QueryError> for SourceError {
    fn from(err: QueryError) -> Self {
        SourceError::Query(err)
    }
}

/// Per-model defaults a source hands out when a model binds to it.
#[derive(Debug, Clone, Default)]
pub struct ClassConfig {
    /// Meta defaults (`key`, `locked`, ...), overridden by the model's own
    pub meta: Options,
    /// Schema to use instead of calling `describe`
    pub schema: Option<Schema>,
    /// Finders every model on this source gets
    pub finders: Vec<(String, FinderDef)>,
}

/// Storage adapter contract.
///
/// Reads return raw records; the model casts them through its schema.
/// Writes receive the query mutably so they can sync generated values back
/// onto `query.entity`.
pub trait Source: Send + Sync {
    /// Fetch the records matching `query`.
    fn read(&self, query: &Query<'_>, options: &Options) -> Result<Vec<Record>, SourceError>;

    /// Insert `query.entity` (or `query.data`) and sync it as persisted.
    fn create(&self, query: &mut Query<'_>, options: &Options) -> Result<bool, SourceError>;

    /// Update `query.entity` by key, or every record matching the conditions
    /// with `query.data`.
    fn update(&self, query: &mut Query<'_>, options: &Options) -> Result<bool, SourceError>;

    /// Delete `query.entity` by key, or every record matching the conditions.
    fn delete(&self, query: &mut Query<'_>, options: &Options) -> Result<bool, SourceError>;

    /// Aggregate calculation such as `count`.
    fn calculation(&self, name: &str, query: &Query<'_>, options: &Options) -> Result<JsonValue, SourceError>;

    /// Schema for `source`, given the model's declared field hints.
    fn describe(&self, source: &str, hints: &BTreeMap<String, Field>, meta: &Meta) -> Result<Schema, SourceError>;

    /// Build a bound relationship for a model.
    fn relationship(
        &self,
        meta: &Meta,
        kind: RelationType,
        name: &str,
        config: &RelationConfig,
    ) -> Result<Relationship, SourceError> {
        let field_name = self.relation_field_name(kind, name);
        Ok(Relationship::new(&meta.name, &meta.key, kind, name, field_name, config))
    }

    /// Entity field a relation is exposed under.
    fn relation_field_name(&self, _kind: RelationType, name: &str) -> String {
        name.to_case(Case::Snake)
    }

    /// Whether an optional feature (`relationships`, `arrays`, ...) is supported.
    fn enabled(&self, _feature: &str) -> bool {
        false
    }

    /// Defaults for a model binding to this source.
    fn configure_class(&self, _model: &str) -> ClassConfig {
        ClassConfig::default()
    }

    /// Names of the sources (tables/collections) this adapter knows about.
    fn sources(&self) -> Vec<String> {
        Vec::new()
    }
}
