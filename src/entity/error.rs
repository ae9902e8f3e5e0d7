//! Error types for entity operations.

/// Error type for Entity operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// `increment`/`decrement` on a value that is not numeric
    NotNumeric { field: String },
    /// A generated id does not line up with the key fields
    KeyMismatch { expected: usize, actual: usize },
    /// An id was supplied to `sync` but the entity has no key fields
    Unkeyed,
    /// `to()` was asked for a format nobody registered
    UnknownFormat(String),
    /// Serialization or deserialization failed
    Serialization(String),
}

impl std::fmt::Display for EntityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityError::NotNumeric { field } => {
                write!(f, "Field `{}` cannot be incremented: value is not numeric", field)
            }
            EntityError::KeyMismatch { expected, actual } => write!(
                f,
                "Key mismatch: expected {} key value(s), got {}",
                expected, actual
            ),
            EntityError::Unkeyed => write!(f, "Entity has no key fields to map an id onto"),
            EntityError::UnknownFormat(format) => write!(f, "Unknown export format: {}", format),
            EntityError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for EntityError {}

impl From<serde_json::Error> for EntityError {
    fn from(err: serde_json::Error) -> Self {
        EntityError::Serialization(err.to_string())
    }
}
