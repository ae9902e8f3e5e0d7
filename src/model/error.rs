//! Error types for model operations.
//!
//! Configuration mistakes (unknown model, missing connection, bad key or
//! relation declarations, unknown methods) are errors. Validation failures
//! are not: `save` and `validates` report them as `Ok(false)` plus the
//! entity's error map.

use crate::connections::ConnectionError;
use crate::entity::EntityError;
use crate::query::QueryError;
use crate::schema::SchemaError;
use crate::source::SourceError;

/// Error type for Model operations
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No definition registered under this name
    UnknownModel(String),
    /// The model's connection name is not configured
    ConnectionNotConfigured { model: String, connection: String },
    /// A declared key field is missing from the resolved schema
    MissingKey { model: String, field: String },
    /// Unknown relation type or relation name
    InvalidRelation { model: String, relation: String },
    /// Neither a finder nor a magic finder pattern matches
    MethodNotFound { model: String, method: String },
    /// `remove` with empty conditions and no `force`
    UnguardedRemove(String),
    /// Model definition could not be turned into meta
    Config(String),
    Schema(SchemaError),
    Entity(EntityError),
    Source(SourceError),
    Connection(ConnectionError),
    Query(QueryError),
    /// The model registry lock was poisoned
    Registry(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::UnknownModel(name) => write!(f, "Unknown model `{}`", name),
            ModelError::ConnectionNotConfigured { model, connection } => write!(
                f,
                "The data connection `{}` is not configured for model `{}`",
                connection, model
            ),
            ModelError::MissingKey { model, field } => write!(
                f,
                "Key field `{}` of model `{}` is not in its schema",
                field, model
            ),
            ModelError::InvalidRelation { model, relation } => {
                write!(f, "Invalid relation `{}` on model `{}`", relation, model)
            }
            ModelError::MethodNotFound { model, method } => {
                write!(f, "Method `{}` not defined or handled in model `{}`", method, model)
            }
            ModelError::UnguardedRemove(model) => write!(
                f,
                "Refusing to remove every `{}` record without `force`",
                model
            ),
            ModelError::Config(msg) => write!(f, "Model configuration error: {}", msg),
            ModelError::Schema(err) => write!(f, "Schema error: {}", err),
            ModelError::Entity(err) => write!(f, "Entity error: {}", err),
            ModelError::Source(err) => write!(f, "Source error: {}", err),
            ModelError::Connection(err) => write!(f, "Connection error: {}", err),
            ModelError::Query(err) => write!(f, "Query error: {}", err),
            ModelError::Registry(msg) => write!(f, "Model registry error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

impl From<SchemaError> for ModelError {
    fn from(err: SchemaError) -> Self {
        ModelError::Schema(err)
    }
}

impl From<EntityError> for ModelError {
    fn from(err: EntityError) -> Self {
        ModelError::Entity(err)
    }
}

impl From<SourceError> for ModelError {
    fn from(err: SourceError) -> Self {
        ModelError::Source(err)
    }
}

impl From<ConnectionError> for ModelError {
    fn from(err: ConnectionError) -> Self {
        ModelError::Connection(err)
    }
}

impl From<QueryError> for ModelError {
    fn from(err: QueryError) -> Self {
        ModelError::Query(err)
    }
}
