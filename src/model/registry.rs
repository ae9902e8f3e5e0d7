//! Model registry for runtime registration
//!
//! Definitions are registered with [`Registry::define`] and turned into
//! configured [`Model`]s on first request. Each registry owns its
//! connections, filters and default validator; [`Registry::global`] is the
//! process-wide instance built over [`Connections::global`].

use super::{Meta, Model, ModelDef, ModelError};
use crate::config::Settings;
use crate::connections::Connections;
use crate::entity::Entity;
use crate::filters::Filters;
use crate::query::Options;
use crate::validator::{RuleValidator, Validator};
use log::debug;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

static GLOBAL: Lazy<Registry> = Lazy::new(|| Registry::new(Connections::global().clone()));

/// Where a model is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Defined (or not) but never requested since the last reset
    Unconfigured,
    /// Meta resolved and connection bound
    Configured,
    /// Schema described, finders merged, relations queued
    Initialized,
}

pub(crate) struct RegistryInner {
    pub(crate) connections: Connections,
    pub(crate) filters: Filters,
    pub(crate) validator: Arc<dyn Validator>,
    /// Meta layer under every definition's own
    pub(crate) defaults: Options,
    definitions: RwLock<HashMap<String, ModelDef>>,
    instances: RwLock<HashMap<String, Model>>,
}

/// Registered model definitions and their configured instances.
///
/// Cloning yields a handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.names())
            .field("connections", &self.inner.connections)
            .finish()
    }
}

/// Builder for a [`Registry`] with a non-default validator or defaults.
pub struct RegistryBuilder {
    connections: Connections,
    filters: Filters,
    validator: Arc<dyn Validator>,
    defaults: Options,
}

impl RegistryBuilder {
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Share filter registrations with another registry.
    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Default `locked` meta for every model.
    pub fn locked(mut self, locked: bool) -> Self {
        self.defaults.insert("locked".into(), JsonValue::Bool(locked));
        self
    }

    /// Default meta entry for every model.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                connections: self.connections,
                filters: self.filters,
                validator: self.validator,
                defaults: self.defaults,
                definitions: RwLock::new(HashMap::new()),
                instances: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl Registry {
    /// A registry over `connections` with the rule validator.
    pub fn new(connections: Connections) -> Self {
        Self::builder(connections).build()
    }

    pub fn builder(connections: Connections) -> RegistryBuilder {
        RegistryBuilder {
            connections,
            filters: Filters::new(),
            validator: Arc::new(RuleValidator),
            defaults: Options::new(),
        }
    }

    /// A registry whose connections and model defaults come from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::builder(Connections::from_settings(settings))
            .locked(settings.models.locked)
            .build()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub fn connections(&self) -> &Connections {
        &self.inner.connections
    }

    /// Filter registrations of every model in this registry.
    pub fn filters(&self) -> &Filters {
        &self.inner.filters
    }

    /// Register (or replace) a model definition
    ///
    /// Replacing a definition drops the configured instance, so the next
    /// request configures the model afresh.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Config` for an empty name and
    /// `ModelError::Registry` if the registry lock cannot be acquired.
    pub fn define(&self, def: ModelDef) -> Result<(), ModelError> {
        if def.name().is_empty() {
            return Err(ModelError::Config("a model needs a name".to_string()));
        }
        let name = def.name().to_string();
        self.inner
            .definitions
            .write()
            .map_err(|e| ModelError::Registry(format!("Failed to lock model registry: {e}")))?
            .insert(name.clone(), def);
        self.inner
            .instances
            .write()
            .map_err(|e| ModelError::Registry(format!("Failed to lock model registry: {e}")))?
            .remove(&name);
        debug!("Defined model `{}`", name);
        Ok(())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.inner
            .definitions
            .read()
            .map(|defs| defs.contains_key(name))
            .unwrap_or(false)
    }

    /// Names of every defined model, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .definitions
            .read()
            .map(|defs| defs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Get a configured model by name
    ///
    /// The first request after a definition or reset configures the model:
    /// its meta is resolved and its connection bound.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnknownModel` if nothing is defined under
    /// `name`, `ModelError::ConnectionNotConfigured` if its connection is
    /// unknown, or the connection's build error.
    pub fn model(&self, name: &str) -> Result<Model, ModelError> {
        if let Some(model) = self
            .inner
            .instances
            .read()
            .map_err(|e| ModelError::Registry(format!("Failed to lock model registry: {e}")))?
            .get(name)
        {
            return Ok(model.clone());
        }

        let def = self
            .inner
            .definitions
            .read()
            .map_err(|e| ModelError::Registry(format!("Failed to lock model registry: {e}")))?
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))?;
        let model = Model::configure(def, &self.inner)?;

        let mut instances = self
            .inner
            .instances
            .write()
            .map_err(|e| ModelError::Registry(format!("Failed to lock model registry: {e}")))?;
        // Another caller may have configured it while the lock was released.
        Ok(instances.entry(name.to_string()).or_insert(model).clone())
    }

    /// Resolved meta of a model.
    pub fn meta(&self, name: &str) -> Result<Meta, ModelError> {
        Ok(self.model(name)?.meta().clone())
    }

    /// Drop the configured instance of one model, or of every model.
    ///
    /// Definitions stay registered; the next request reconfigures.
    pub fn reset(&self, name: Option<&str>) {
        let mut instances = self
            .inner
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match name {
            Some(name) => {
                instances.remove(name);
            }
            None => instances.clear(),
        }
    }

    pub fn lifecycle(&self, name: &str) -> Lifecycle {
        let Ok(instances) = self.inner.instances.read() else {
            return Lifecycle::Unconfigured;
        };
        match instances.get(name) {
            Some(model) if model.is_initialized() => Lifecycle::Initialized,
            Some(_) => Lifecycle::Configured,
            None => Lifecycle::Unconfigured,
        }
    }

    /// Deserialize an entity and re-attach its model's schema.
    ///
    /// Serialized entities carry neither schema nor loaded relations.
    pub fn restore(&self, json: &str) -> Result<Entity, ModelError> {
        let mut entity = Entity::deserialize_json(json)?;
        if let Some(name) = entity.model().map(str::to_string) {
            let schema = self.model(&name)?.schema()?;
            entity.attach_schema(schema);
        }
        Ok(entity)
    }
}
