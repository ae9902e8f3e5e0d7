//! Named connection registry.
//!
//! Connections are configured by name and built lazily: `add` only stores
//! the configuration, the first `get` builds the adapter through the factory
//! registered for its `adapter` (or `type`) and memoizes it. The mock
//! connection is a process-wide [`MemorySource`] shared by every registry.

use crate::config::Settings;
use crate::query::Options;
use crate::source::{MemorySource, Source, SourceError};
use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Builds an adapter from its configuration.
pub type Factory = Arc<dyn Fn(&ConnectionConfig) -> Result<Arc<dyn Source>, SourceError> + Send + Sync>;

static MOCK: Lazy<Arc<MemorySource>> = Lazy::new(|| Arc::new(MemorySource::new()));

static GLOBAL: Lazy<Connections> = Lazy::new(Connections::new);

/// Error type for connection lookups
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// No factory is registered for the configured adapter/type
    UnknownAdapter(String),
    /// The factory failed to build the adapter
    Build { name: String, source: SourceError },
    /// The registry lock was poisoned
    Lock(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::UnknownAdapter(adapter) => {
                write!(f, "No adapter registered for `{}`", adapter)
            }
            ConnectionError::Build { name, source } => {
                write!(f, "Failed to build connection `{}`: {}", name, source)
            }
            ConnectionError::Lock(msg) => write!(f, "Connection registry lock error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Stored configuration of one named connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection type (`memory`, `database`, `mongo`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Adapter within the type; takes precedence over `type` for factory lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    /// Adapter-specific options
    #[serde(flatten)]
    pub options: Options,
}

impl ConnectionConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            adapter: None,
            options: Options::new(),
        }
    }

    pub fn adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Options for [`Connections::get_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Build the adapter if it has not been built yet
    pub auto_create: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { auto_create: true }
    }
}

#[derive(Default)]
struct Inner {
    configs: BTreeMap<String, ConnectionConfig>,
    instances: HashMap<String, Arc<dyn Source>>,
    factories: HashMap<String, Factory>,
}

/// A registry of named, lazily-built connections.
///
/// Cloning yields a handle to the same registry.
#[derive(Clone)]
pub struct Connections {
    inner: Arc<RwLock<Inner>>,
}

impl fmt::Debug for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connections").field("names", &self.names()).finish()
    }
}

impl Default for Connections {
    fn default() -> Self {
        Self::new()
    }
}

impl Connections {
    /// An empty registry with the built-in `memory` adapter.
    pub fn new() -> Self {
        let connections = Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        };
        connections.register_adapter("memory", |config| {
            Ok(Arc::new(MemorySource::from_config(config)?) as Arc<dyn Source>)
        });
        connections
    }

    /// The process-wide registry.
    pub fn global() -> &'static Connections {
        &GLOBAL
    }

    /// Registry pre-populated from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let connections = Self::new();
        for (name, config) in &settings.connections {
            connections.add(name.clone(), config.clone());
        }
        connections
    }

    /// The shared mock adapter (used by models with no connection).
    pub fn mock() -> Arc<dyn Source> {
        MOCK.clone()
    }

    /// The shared mock adapter with its concrete type, for seeding.
    pub fn mock_memory() -> Arc<MemorySource> {
        MOCK.clone()
    }

    /// Register a factory for an adapter or type name.
    pub fn register_adapter<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectionConfig) -> Result<Arc<dyn Source>, SourceError> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.factories.insert(name.into(), Arc::new(factory));
    }

    /// Store a configuration; the adapter is not built until first use.
    ///
    /// Re-adding a name replaces its configuration and drops the built
    /// adapter held by the registry.
    pub fn add(&self, name: impl Into<String>, config: ConnectionConfig) {
        let name = name.into();
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.instances.remove(&name);
        inner.configs.insert(name, config);
    }

    /// Register an already-built adapter under `name`.
    pub fn add_source(&self, name: impl Into<String>, source: Arc<dyn Source>) {
        let name = name.into();
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner
            .configs
            .entry(name.clone())
            .or_insert_with(|| ConnectionConfig::new("custom"));
        inner.instances.insert(name, source);
    }

    /// Configured connection names.
    pub fn names(&self) -> Vec<String> {
        match self.inner.read() {
            Ok(inner) => inner.configs.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().configs.keys().cloned().collect(),
        }
    }

    pub fn config(&self, name: &str) -> Option<ConnectionConfig> {
        self.inner.read().ok()?.configs.get(name).cloned()
    }

    /// The adapter for `name`, built on first use.
    ///
    /// Returns `Ok(None)` when `name` is not configured.
    pub fn get(&self, name: &str) -> Result<Option<Arc<dyn Source>>, ConnectionError> {
        self.get_with(name, GetOptions::default())
    }

    pub fn get_with(&self, name: &str, options: GetOptions) -> Result<Option<Arc<dyn Source>>, ConnectionError> {
        let (config, factory) = {
            let inner = self
                .inner
                .read()
                .map_err(|e| ConnectionError::Lock(format!("Failed to lock connections: {e}")))?;
            if let Some(instance) = inner.instances.get(name) {
                return Ok(Some(Arc::clone(instance)));
            }
            let Some(config) = inner.configs.get(name) else {
                return Ok(None);
            };
            if !options.auto_create {
                return Ok(None);
            }
            let adapter = config.adapter.as_deref().unwrap_or(&config.kind);
            let factory = inner
                .factories
                .get(adapter)
                .or_else(|| inner.factories.get(&config.kind))
                .cloned()
                .ok_or_else(|| ConnectionError::UnknownAdapter(adapter.to_string()))?;
            (config.clone(), factory)
        };

        debug!("Building connection `{}` ({})", name, config.kind);
        let source = factory(&config).map_err(|source| ConnectionError::Build {
            name: name.to_string(),
            source,
        })?;

        let mut inner = self
            .inner
            .write()
            .map_err(|e| ConnectionError::Lock(format!("Failed to lock connections: {e}")))?;
        // Another caller may have built it while the lock was released.
        let instance = inner
            .instances
            .entry(name.to_string())
            .or_insert(source);
        Ok(Some(Arc::clone(instance)))
    }

    /// Forget a configuration. Adapters already handed out keep working.
    pub fn remove(&self, name: &str) -> Option<ConnectionConfig> {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.instances.remove(name);
        inner.configs.remove(name)
    }

    /// Drop every configuration and built adapter; factories are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.configs.clear();
        inner.instances.clear();
    }
}
