//! Export of entities and collections into plain data and text formats.

use super::{Entity, EntityError};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Custom export for the entities of one model.
pub type ExportHandler = Arc<dyn Fn(&Entity, &ExportOptions) -> JsonValue + Send + Sync>;

/// Renders exported data into a named text format.
pub type Formatter = Arc<dyn Fn(&JsonValue) -> Result<String, EntityError> + Send + Sync>;

static FORMATS: Lazy<RwLock<HashMap<String, Formatter>>> = Lazy::new(|| {
    let mut formats: HashMap<String, Formatter> = HashMap::new();
    formats.insert(
        "json".to_string(),
        Arc::new(|data: &JsonValue| serde_json::to_string(data).map_err(EntityError::from)),
    );
    RwLock::new(formats)
});

/// Register a text format usable with `Entity::to` and `Collection::to`.
///
/// `array` is reserved and always yields the exported data itself.
pub fn register_format<F>(name: impl Into<String>, formatter: F)
where
    F: Fn(&JsonValue) -> Result<String, EntityError> + Send + Sync + 'static,
{
    let mut formats = FORMATS.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    formats.insert(name.into(), Arc::new(formatter));
}

/// Result of `to(format)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Exported {
    Array(JsonValue),
    Text(String),
}

impl Exported {
    pub fn into_json(self) -> Option<JsonValue> {
        match self {
            Exported::Array(json) => Some(json),
            Exported::Text(_) => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Exported::Text(text) => Some(text),
            Exported::Array(_) => None,
        }
    }
}

pub(crate) fn render(data: JsonValue, format: &str) -> Result<Exported, EntityError> {
    if format == "array" {
        return Ok(Exported::Array(data));
    }
    let formatter = {
        let formats = FORMATS.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        formats.get(format).cloned()
    };
    match formatter {
        Some(formatter) => formatter(&data).map(Exported::Text),
        None => Err(EntityError::UnknownFormat(format.to_string())),
    }
}

/// Options for `to_array`: per-model export handlers.
#[derive(Clone, Default)]
pub struct ExportOptions {
    handlers: HashMap<String, ExportHandler>,
}

impl fmt::Debug for ExportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOptions")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export entities bound to `model` through `handler` instead of the
    /// default field dump.
    pub fn handler<F>(mut self, model: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Entity, &ExportOptions) -> JsonValue + Send + Sync + 'static,
    {
        self.handlers.insert(model.into(), Arc::new(handler));
        self
    }

    pub(crate) fn handler_for(&self, model: Option<&str>) -> Option<&ExportHandler> {
        model.and_then(|m| self.handlers.get(m))
    }
}
