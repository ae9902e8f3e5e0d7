//! Filter pipeline around model operations.
//!
//! Every model method runs as a chain: the filters registered for
//! `(model, method)` in order, then (for `find`) the finder itself, then the
//! method's terminal implementation. A [`Filter`] receives the call's
//! [`Params`] and the rest of the [`Chain`]; it may inspect or change the
//! params, call `chain.next(params)` any number of times, change the
//! result, or short-circuit by not calling `next` at all.
//!
//! ```ignore
//! registry.filters().apply_fn("Post", Method::Find, |params, chain| {
//!     if let Some(options) = params.options_mut() {
//!         options.insert("limit".into(), 10.into());
//!     }
//!     chain.next(params)
//! });
//! ```

use crate::collection::Collection;
use crate::entity::Entity;
use crate::model::{ModelError, RemoveOptions, SaveOptions, ValidateOptions};
use crate::query::Options;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Model methods that run through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Find,
    Save,
    Validates,
    Delete,
    Update,
    Remove,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Find => "find",
            Method::Save => "save",
            Method::Validates => "validates",
            Method::Delete => "delete",
            Method::Update => "update",
            Method::Remove => "remove",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of one model call, as seen by filters.
#[derive(Debug)]
pub enum Params<'a> {
    Find {
        finder: String,
        options: Options,
    },
    Save {
        entity: &'a mut Entity,
        data: Options,
        options: SaveOptions,
    },
    Validates {
        entity: &'a mut Entity,
        options: ValidateOptions,
    },
    Delete {
        entity: &'a mut Entity,
        options: Options,
    },
    Update {
        data: Options,
        conditions: Options,
        options: Options,
    },
    Remove {
        conditions: Options,
        options: RemoveOptions,
    },
}

impl<'a> Params<'a> {
    pub fn method(&self) -> Method {
        match self {
            Params::Find { .. } => Method::Find,
            Params::Save { .. } => Method::Save,
            Params::Validates { .. } => Method::Validates,
            Params::Delete { .. } => Method::Delete,
            Params::Update { .. } => Method::Update,
            Params::Remove { .. } => Method::Remove,
        }
    }

    /// Free-form options of the call, where the method has them.
    pub fn options_mut(&mut self) -> Option<&mut Options> {
        match self {
            Params::Find { options, .. }
            | Params::Delete { options, .. }
            | Params::Update { options, .. } => Some(options),
            _ => None,
        }
    }

    /// Entity the call operates on, where there is one.
    pub fn entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Params::Save { entity, .. }
            | Params::Validates { entity, .. }
            | Params::Delete { entity, .. } => Some(&mut **entity),
            _ => None,
        }
    }
}

/// Result of a model call.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Outcome {
    #[default]
    None,
    Entity(Entity),
    Set(Collection),
    /// `key => title` pairs from the `list` finder
    List(Vec<(JsonValue, JsonValue)>),
    Count(u64),
    Scalar(JsonValue),
    Bool(bool),
}

impl Outcome {
    pub fn is_none(&self) -> bool {
        matches!(self, Outcome::None)
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Outcome::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn into_set(self) -> Option<Collection> {
        match self {
            Outcome::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<(JsonValue, JsonValue)>> {
        match self {
            Outcome::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Outcome::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Outcome::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// One link of the pipeline.
pub trait Filter: Send + Sync {
    fn apply<'a>(&self, params: &mut Params<'a>, chain: &mut Chain<'_, 'a>) -> Result<Outcome, ModelError>;
}

/// The remainder of a pipeline.
pub struct Chain<'c, 'a> {
    filters: &'c [Arc<dyn Filter>],
    terminal: &'c mut dyn FnMut(&mut Params<'a>) -> Result<Outcome, ModelError>,
}

impl<'c, 'a> Chain<'c, 'a> {
    /// Run the next filter, or the terminal once filters are exhausted.
    pub fn next(&mut self, params: &mut Params<'a>) -> Result<Outcome, ModelError> {
        let filters = self.filters;
        match filters.split_first() {
            Some((filter, rest)) => {
                self.filters = rest;
                let result = filter.apply(params, self);
                self.filters = filters;
                result
            }
            None => (self.terminal)(params),
        }
    }
}

/// Adapter turning a closure into a [`Filter`].
pub struct FnFilter<F>(F);

impl<F> Filter for FnFilter<F>
where
    F: for<'a, 'c> Fn(&mut Params<'a>, &mut Chain<'c, 'a>) -> Result<Outcome, ModelError> + Send + Sync,
{
    fn apply<'a>(&self, params: &mut Params<'a>, chain: &mut Chain<'_, 'a>) -> Result<Outcome, ModelError> {
        (self.0)(params, chain)
    }
}

/// Wrap a closure as a filter.
pub fn filter_fn<F>(f: F) -> FnFilter<F>
where
    F: for<'a, 'c> Fn(&mut Params<'a>, &mut Chain<'c, 'a>) -> Result<Outcome, ModelError> + Send + Sync,
{
    FnFilter(f)
}

type FilterMap = HashMap<(String, Method), Vec<Arc<dyn Filter>>>;

/// Filters registered per model and method.
///
/// Cloning yields a handle to the same registrations.
#[derive(Clone, Default)]
pub struct Filters {
    inner: Arc<RwLock<FilterMap>>,
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(String, Method, usize)> = match self.inner.read() {
            Ok(map) => map.iter().map(|((m, k), v)| (m.clone(), *k, v.len())).collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("Filters").field("registered", &counts).finish()
    }
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter for `model`'s `method`.
    pub fn apply<F>(&self, model: &str, method: Method, filter: F)
    where
        F: Filter + 'static,
    {
        let mut map = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry((model.to_string(), method))
            .or_default()
            .push(Arc::new(filter));
    }

    /// Append a closure filter for `model`'s `method`.
    pub fn apply_fn<F>(&self, model: &str, method: Method, f: F)
    where
        F: for<'a, 'c> Fn(&mut Params<'a>, &mut Chain<'c, 'a>) -> Result<Outcome, ModelError>
            + Send
            + Sync
            + 'static,
    {
        self.apply(model, method, filter_fn(f));
    }

    pub fn has(&self, model: &str, method: Method) -> bool {
        self.inner
            .read()
            .map(|map| map.get(&(model.to_string(), method)).map_or(false, |v| !v.is_empty()))
            .unwrap_or(false)
    }

    /// Drop the filters of one model, or of every model.
    pub fn clear(&self, model: Option<&str>) {
        let mut map = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match model {
            Some(model) => map.retain(|(m, _), _| m != model),
            None => map.clear(),
        }
    }

    /// Run `terminal` wrapped by the registered filters, then `extra`.
    pub fn run<'a, F>(
        &self,
        model: &str,
        method: Method,
        extra: Option<Arc<dyn Filter>>,
        params: &mut Params<'a>,
        mut terminal: F,
    ) -> Result<Outcome, ModelError>
    where
        F: FnMut(&mut Params<'a>) -> Result<Outcome, ModelError>,
    {
        let mut filters: Vec<Arc<dyn Filter>> = self
            .inner
            .read()
            .map_err(|e| ModelError::Registry(format!("Failed to lock filters: {e}")))?
            .get(&(model.to_string(), method))
            .cloned()
            .unwrap_or_default();
        filters.extend(extra);
        let mut chain = Chain {
            filters: &filters,
            terminal: &mut terminal,
        };
        chain.next(params)
    }
}
