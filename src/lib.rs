//! # Tidemark
//!
//! Data-mapper core: models, entities, schemas, composable finders and
//! pluggable storage sources.
//!
//! A [`Registry`] holds model definitions ([`ModelDef`]) and turns them into
//! configured [`Model`]s bound to a named connection. Models read and write
//! through a [`Source`] adapter; the bundled [`MemorySource`] serves as the
//! mock connection and as a test double for real stores.
//!
//! ```ignore
//! let connections = Connections::new();
//! connections.add("default", ConnectionConfig::new("memory"));
//! let registry = Registry::new(connections);
//! registry.define(ModelDef::new("Post").validates("title", RuleKind::NotEmpty))?;
//!
//! let posts = registry.model("Post")?;
//! let mut post = posts.create(options(json!({"title": "Hello"})), CreateOptions::default())?;
//! posts.save(&mut post, Options::new(), SaveOptions::default())?;
//! let again = posts.call("findByTitle", json!("Hello"), Options::new())?;
//! ```

pub mod collection;
pub mod config;
pub mod connections;
pub mod entity;
pub mod filters;
pub mod metrics;
pub mod model;
pub mod query;
pub mod relation;
pub mod schema;
pub mod source;
pub mod validator;
pub mod value;

pub use collection::Collection;
pub use config::Settings;
pub use connections::{ConnectionConfig, ConnectionError, Connections};
pub use entity::{Entity, EntityError, ExportOptions, Exported, SyncOptions};
pub use filters::{Chain, Filter, Filters, Method, Outcome, Params};
pub use model::{
    CreateOptions, Find, FinderDef, Lifecycle, Meta, Model, ModelDef, ModelError, Registry, RegistryBuilder,
    RemoveOptions, SaveOptions, Validate, ValidateOptions,
};
pub use query::{merge, options, Options, Query, QueryKind};
pub use relation::{RelationConfig, RelationType, Relationship};
pub use schema::{Field, Schema, SchemaError};
pub use source::{MemorySource, Source, SourceError};
pub use validator::{Rule, RuleKind, RuleValidator, Rules, Validator};
pub use value::Value;
