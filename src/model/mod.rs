//! The model façade: finders, persistence, validation and relations for one
//! named model.
//!
//! A [`Model`] is obtained from a [`Registry`] and is cheap to clone. Its
//! lifecycle is:
//!
//! 1. **Configured** when first requested: the definition's meta is
//!    resolved and the connection is bound.
//! 2. **Initialized** on the first operation: the schema is described, the
//!    default finders are merged with the source's and the definition's,
//!    and relations are queued for binding.
//! 3. Back to unconfigured on [`Registry::reset`].
//!
//! Every public operation runs through the model's [`Filters`](crate::filters::Filters)
//! before its terminal implementation.

mod config;
mod error;
mod finder;
mod registry;

pub use config::{Meta, ModelDef, RelationDef, DEFAULT_CONNECTION};
pub use error::ModelError;
pub use finder::{Find, FinderDef};
pub use registry::{Lifecycle, Registry, RegistryBuilder};

use crate::collection::Collection;
use crate::entity::Entity;
use crate::filters::{Filter, Filters, Method, Outcome, Params};
use crate::query::{merge, Options, Query, QueryKind};
use crate::relation::{Link, RelationConfig, RelationType, Relationship};
use crate::schema::{CastOptions, Schema};
use crate::source::{ClassConfig, Source};
use crate::validator::{CheckOptions, Rules, Validator};
use crate::value::Value;
use finder::{parse_magic, AllFinder, CountFinder, FirstFinder, ListFinder};
use log::{debug, warn};
use once_cell::sync::OnceCell;
use registry::RegistryInner;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Which rules `save` validates with.
#[derive(Debug, Clone, Default)]
pub enum Validate {
    /// The model's declared rules
    #[default]
    Model,
    /// Persist without validating
    Skip,
    /// These rules instead of the model's
    Rules(Rules),
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub validate: Validate,
    /// Fields that may be written; defaults to the schema's when locked
    pub whitelist: Option<Vec<String>>,
    /// Overrides the model's `locked` meta
    pub locked: Option<bool>,
    /// Validation events; defaults to `create` or `update`
    pub events: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Rules to check instead of the model's
    pub rules: Option<Rules>,
    pub events: Option<Vec<String>>,
    /// Whether missing fields fail; defaults to `true` for new entities
    pub required: Option<bool>,
    /// Only rules on these fields are checked
    pub whitelist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Allow empty conditions, removing every record
    pub force: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Start from the schema's default values
    pub defaults: bool,
    /// Build the entity as already persisted
    pub exists: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            defaults: true,
            exists: false,
        }
    }
}

fn default_event(exists: bool) -> String {
    if exists { "update" } else { "create" }.to_string()
}

struct ModelInner {
    meta: Meta,
    def: ModelDef,
    source: Arc<dyn Source>,
    class: ClassConfig,
    filters: Filters,
    validator: Arc<dyn Validator>,
    registry: Weak<RegistryInner>,
    schema: OnceCell<Arc<Schema>>,
    initialized: OnceCell<()>,
    finders: RwLock<HashMap<String, Arc<dyn Filter>>>,
    relations: RwLock<BTreeMap<String, Relationship>>,
    pending: RwLock<BTreeMap<String, RelationDef>>,
}

/// A configured model bound to its connection.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("meta", &self.inner.meta)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn read_lock<'l, T>(lock: &'l RwLock<T>, what: &str) -> Result<RwLockReadGuard<'l, T>, ModelError> {
    lock.read()
        .map_err(|e| ModelError::Registry(format!("Failed to lock {what}: {e}")))
}

fn write_lock<'l, T>(lock: &'l RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'l, T>, ModelError> {
    lock.write()
        .map_err(|e| ModelError::Registry(format!("Failed to lock {what}: {e}")))
}

impl Model {
    /// Resolve meta and bind the connection for a definition.
    pub(crate) fn configure(def: ModelDef, registry: &Arc<RegistryInner>) -> Result<Self, ModelError> {
        let name = def.name.clone();
        let binding = Meta::resolve(&name, &[&registry.defaults, &def.meta])?;
        let source = match &binding.connection {
            None => crate::connections::Connections::mock(),
            Some(connection) => registry.connections.get(connection)?.ok_or_else(|| {
                ModelError::ConnectionNotConfigured {
                    model: name.clone(),
                    connection: connection.clone(),
                }
            })?,
        };
        let class = source.configure_class(&name);
        let meta = Meta::resolve(&name, &[&registry.defaults, &class.meta, &def.meta])?;
        let validator = def
            .validator
            .clone()
            .unwrap_or_else(|| Arc::clone(&registry.validator));
        debug!(
            "Configured model `{}` (source `{}`, connection {:?})",
            name, meta.source, meta.connection
        );

        Ok(Self {
            inner: Arc::new(ModelInner {
                meta,
                def,
                source,
                class,
                filters: registry.filters.clone(),
                validator,
                registry: Arc::downgrade(registry),
                schema: OnceCell::new(),
                initialized: OnceCell::new(),
                finders: RwLock::new(HashMap::new()),
                relations: RwLock::new(BTreeMap::new()),
                pending: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.inner.initialized.get().is_some()
    }

    fn initialize(&self) -> Result<(), ModelError> {
        self.inner.initialized.get_or_try_init(|| -> Result<(), ModelError> {
            let meta = &self.inner.meta;
            let title = self.title_field()?;

            let mut finders: HashMap<String, Arc<dyn Filter>> = HashMap::new();
            finders.insert("all".into(), Arc::new(AllFinder));
            finders.insert("first".into(), Arc::new(FirstFinder));
            finders.insert(
                "list".into(),
                Arc::new(ListFinder {
                    key: meta.key.clone(),
                    title,
                }),
            );
            finders.insert(
                "count".into(),
                Arc::new(CountFinder {
                    source: Arc::clone(&self.inner.source),
                    model: meta.name.clone(),
                    table: meta.source.clone(),
                    key: meta.key.clone(),
                }),
            );
            for (name, def) in self.inner.class.finders.iter().chain(self.inner.def.finders.iter()) {
                finders.insert(name.clone(), def.clone().into_filter());
            }
            *write_lock(&self.inner.finders, "finders")? = finders;

            let mut pending = write_lock(&self.inner.pending, "relations")?;
            for relation in &self.inner.def.relations {
                pending.insert(relation.name.clone(), relation.clone());
            }
            debug!("Initialized model `{}`", meta.name);
            Ok(())
        })?;
        Ok(())
    }

    #[allow(unused_variables)]
    fn instrument<T, F>(&self, method: Method, op: F) -> Result<T, ModelError>
    where
        F: FnOnce() -> Result<T, ModelError>,
    {
        #[cfg(feature = "tracing")]
        let _span = crate::metrics::tracing_helpers::operation_span(&self.inner.meta.name, method.as_str()).entered();
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let result = op();

        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_operation(
            &self.inner.meta.name,
            method.as_str(),
            start.elapsed(),
            result.is_ok(),
        );
        result
    }

    fn registry(&self) -> Result<Registry, ModelError> {
        self.inner
            .registry
            .upgrade()
            .map(Registry::from_inner)
            .ok_or_else(|| ModelError::Registry("the model registry was dropped".to_string()))
    }

    fn query<'q>(&self, kind: QueryKind, options: &Options) -> Result<Query<'q>, ModelError> {
        let meta = &self.inner.meta;
        Ok(Query::from_options(kind, options)?
            .model(meta.name.clone())
            .source(meta.source.clone())
            .key(&meta.key))
    }

    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    pub fn meta(&self) -> &Meta {
        &self.inner.meta
    }

    /// Default options merged under every `find`.
    pub fn query_defaults(&self) -> &Options {
        &self.inner.def.query
    }

    /// The bound adapter.
    pub fn connection(&self) -> Arc<dyn Source> {
        Arc::clone(&self.inner.source)
    }

    /// The model's resolved schema, described once and then cached.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::MissingKey` when the schema declares fields but
    /// none named like a key field, or the adapter's error when describing
    /// fails.
    pub fn schema(&self) -> Result<Arc<Schema>, ModelError> {
        self.inner
            .schema
            .get_or_try_init(|| -> Result<Arc<Schema>, ModelError> {
                let meta = &self.inner.meta;
                let hints = &self.inner.def.schema;
                let mut schema = match &self.inner.class.schema {
                    Some(schema) => {
                        let mut schema = schema.clone();
                        if !schema.locked() {
                            schema.append(hints.iter().map(|(k, v)| (k.clone(), v.clone())))?;
                        }
                        schema
                    }
                    None => self.inner.source.describe(&meta.source, hints, meta)?,
                };
                schema.set_key(&meta.key);
                if !schema.is_empty() {
                    if let Some(field) = meta.key.iter().find(|field| !schema.has(field)) {
                        return Err(ModelError::MissingKey {
                            model: meta.name.clone(),
                            field: field.clone(),
                        });
                    }
                }
                debug!("Described schema of `{}` ({} fields)", meta.name, schema.names().len());
                Ok(Arc::new(schema))
            })
            .map(Arc::clone)
    }

    /// Field used for titles: the `title` meta, else a `title` or `name`
    /// field of the schema, else the first key field.
    pub fn title_field(&self) -> Result<String, ModelError> {
        let meta = &self.inner.meta;
        if let Some(title) = &meta.title {
            return Ok(title.clone());
        }
        let schema = self.schema()?;
        Ok(["title", "name"]
            .into_iter()
            .find(|field| schema.has(field))
            .map(str::to_string)
            .or_else(|| meta.key.first().cloned())
            .unwrap_or_else(|| "id".to_string()))
    }

    pub fn title(&self, entity: &Entity) -> Result<Option<JsonValue>, ModelError> {
        let field = self.title_field()?;
        Ok(entity.get_json(&field).cloned())
    }

    /// Canonical key conditions for a raw id, a list of values for a
    /// composite key, or an object.
    ///
    /// Returns `None` when any key component is missing.
    pub fn key(&self, values: &JsonValue) -> Option<Options> {
        let key = &self.inner.meta.key;
        match values {
            JsonValue::Null => None,
            JsonValue::Object(map) => key
                .iter()
                .map(|field| {
                    map.get(field)
                        .filter(|v| !v.is_null())
                        .map(|v| (field.clone(), v.clone()))
                })
                .collect(),
            JsonValue::Array(items) if key.len() > 1 => (items.len() == key.len())
                .then(|| key.iter().cloned().zip(items.iter().cloned()).collect()),
            value => match key.as_slice() {
                [field] => {
                    let mut map = Options::new();
                    map.insert(field.clone(), value.clone());
                    Some(map)
                }
                _ => None,
            },
        }
    }

    /// Key conditions of an entity.
    pub fn key_of(&self, entity: &Entity) -> Option<Options> {
        self.key(&JsonValue::Object(entity.fields_json()))
    }

    // ---- finders ----

    /// The registered finder filter for `name`.
    pub fn finder(&self, name: &str) -> Result<Option<Arc<dyn Filter>>, ModelError> {
        self.initialize()?;
        Ok(read_lock(&self.inner.finders, "finders")?.get(name).cloned())
    }

    pub fn set_finder(&self, name: impl Into<String>, finder: impl Into<FinderDef>) -> Result<(), ModelError> {
        self.initialize()?;
        write_lock(&self.inner.finders, "finders")?.insert(name.into(), finder.into().into_filter());
        Ok(())
    }

    pub fn finder_names(&self) -> Result<Vec<String>, ModelError> {
        self.initialize()?;
        let mut names: Vec<String> = read_lock(&self.inner.finders, "finders")?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Run a finder, or look up by key.
    ///
    /// A name no finder is registered under is treated as a key value.
    ///
    /// # Errors
    ///
    /// Propagates filter, query-option and adapter errors.
    pub fn find(&self, find: impl Into<Find>, options: Options) -> Result<Outcome, ModelError> {
        let find = find.into();
        self.instrument(Method::Find, || {
            self.initialize()?;
            let name = match find {
                Find::Key(value) => return self.find_by_key(&value, options),
                Find::Named(name) => name,
            };
            let Some(finder) = self.finder(&name)? else {
                return self.find_by_key(&JsonValue::String(name), options);
            };
            let mut params = Params::Find {
                finder: name,
                options: merge(self.inner.def.query.clone(), options),
            };
            self.inner
                .filters
                .run(&self.inner.meta.name, Method::Find, Some(finder), &mut params, |params| {
                    self.read(params)
                })
        })
    }

    fn find_by_key(&self, value: &JsonValue, options: Options) -> Result<Outcome, ModelError> {
        let Some(key) = self.key(value) else {
            return Ok(Outcome::None);
        };
        let mut lookup = Options::new();
        lookup.insert("conditions".into(), JsonValue::Object(key));
        self.find("first", merge(options, lookup))
    }

    fn read(&self, params: &mut Params<'_>) -> Result<Outcome, ModelError> {
        let Params::Find { options, .. } = params else {
            return Ok(Outcome::None);
        };
        let meta = &self.inner.meta;
        let query = self.query(QueryKind::Read, options)?;
        let records = self.inner.source.read(&query, options)?;
        let schema = self.schema()?;
        let cast = CastOptions::default()
            .model(Some(&meta.name))
            .key(&meta.key)
            .exists(true);

        let mut set = Collection::new(Some(&meta.name));
        for record in records {
            let mut entity = Schema::cast_entity(&schema, record, &cast);
            for name in &query.with {
                let relationship = self.relationship(name)?;
                let related = self.load_related(&relationship, &entity)?;
                entity.set_relation(relationship.field_name.clone(), related);
            }
            set.push(entity);
        }
        Ok(Outcome::Set(set))
    }

    pub fn all(&self, options: Options) -> Result<Collection, ModelError> {
        Ok(self.find("all", options)?.into_set().unwrap_or_default())
    }

    pub fn first(&self, options: Options) -> Result<Option<Entity>, ModelError> {
        Ok(self.find("first", options)?.into_entity())
    }

    pub fn list(&self, options: Options) -> Result<Vec<(JsonValue, JsonValue)>, ModelError> {
        Ok(self.find("list", options)?.into_list().unwrap_or_default())
    }

    pub fn count(&self, conditions: Options) -> Result<u64, ModelError> {
        let mut options = Options::new();
        options.insert("conditions".into(), JsonValue::Object(conditions));
        Ok(self.find("count", options)?.count().unwrap_or(0))
    }

    /// Whether any record matches `conditions`.
    pub fn exists(&self, conditions: Options) -> Result<bool, ModelError> {
        Ok(self.count(conditions)? > 0)
    }

    /// Dispatch a dynamic finder call.
    ///
    /// `method` may be a registered finder name, `findBy<Field>` (the
    /// `first` finder) or `find<Finder>By<Field>`; the latter two add
    /// `{field: value}` to the conditions.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::MethodNotFound` when `method` matches neither.
    pub fn call(&self, method: &str, value: JsonValue, options: Options) -> Result<Outcome, ModelError> {
        if self.finder(method)?.is_some() {
            return self.find(method, options);
        }
        let not_found = || ModelError::MethodNotFound {
            model: self.inner.meta.name.clone(),
            method: method.to_string(),
        };
        let (finder, field) = parse_magic(method).ok_or_else(not_found)?;
        if self.finder(&finder)?.is_none() {
            return Err(not_found());
        }
        let mut conditions = Options::new();
        conditions.insert(field, value);
        let mut magic = Options::new();
        magic.insert("conditions".into(), JsonValue::Object(conditions));
        self.find(finder, merge(options, magic))
    }

    // ---- writes ----

    /// A new entity bound to this model.
    pub fn create(&self, data: Options, options: CreateOptions) -> Result<Entity, ModelError> {
        self.initialize()?;
        let meta = &self.inner.meta;
        let schema = self.schema()?;
        let mut values = if options.defaults {
            schema.defaults()
        } else {
            Options::new()
        };
        values.extend(data);

        if options.exists {
            let cast = CastOptions::default()
                .model(Some(&meta.name))
                .key(&meta.key)
                .exists(true);
            return Ok(Schema::cast_entity(&schema, values, &cast));
        }
        let mut entity = Entity::new(Some(&meta.name))
            .with_key(meta.key.iter().cloned())
            .with_schema(schema);
        entity.set(values);
        Ok(entity)
    }

    /// Validate and persist an entity.
    ///
    /// Returns `Ok(false)` when validation fails; the entity's errors say
    /// why and the source is not touched.
    pub fn save(&self, entity: &mut Entity, data: Options, options: SaveOptions) -> Result<bool, ModelError> {
        self.instrument(Method::Save, || {
            self.initialize()?;
            let mut params = Params::Save { entity, data, options };
            let outcome = self
                .inner
                .filters
                .run(&self.inner.meta.name, Method::Save, None, &mut params, |params| {
                    self.persist(params)
                })?;
            Ok(outcome.as_bool().unwrap_or(false))
        })
    }

    fn persist(&self, params: &mut Params<'_>) -> Result<Outcome, ModelError> {
        let Params::Save { entity, data, options } = params else {
            return Ok(Outcome::Bool(false));
        };
        let entity: &mut Entity = entity;
        if !data.is_empty() {
            entity.set(data.clone());
        }
        let exists = entity.exists();
        let events = options.events.clone().unwrap_or_else(|| vec![default_event(exists)]);
        let schema = self.schema()?;
        let locked = options.locked.unwrap_or(self.inner.meta.locked);
        let whitelist = options
            .whitelist
            .clone()
            .or_else(|| (locked && !schema.is_empty()).then(|| schema.names()));

        let rules = match &options.validate {
            Validate::Skip => None,
            Validate::Model => Some(None),
            Validate::Rules(rules) => Some(Some(rules.clone())),
        };
        if let Some(rules) = rules {
            let check = ValidateOptions {
                rules,
                events: Some(events),
                required: None,
                whitelist: whitelist.clone(),
            };
            if !self.validates(entity, check)? {
                return Ok(Outcome::Bool(false));
            }
        }

        let kind = if exists { QueryKind::Update } else { QueryKind::Create };
        let mut query = self.query(kind, &Options::new())?.whitelist(whitelist).entity(entity);
        let saved = if exists {
            self.inner.source.update(&mut query, &Options::new())?
        } else {
            self.inner.source.create(&mut query, &Options::new())?
        };
        Ok(Outcome::Bool(saved))
    }

    /// Check an entity against the model's (or the given) rules.
    ///
    /// Previous errors are cleared; new ones are written to the entity.
    pub fn validates(&self, entity: &mut Entity, options: ValidateOptions) -> Result<bool, ModelError> {
        self.instrument(Method::Validates, || {
            self.initialize()?;
            let mut params = Params::Validates { entity, options };
            let outcome = self
                .inner
                .filters
                .run(&self.inner.meta.name, Method::Validates, None, &mut params, |params| {
                    self.check(params)
                })?;
            Ok(outcome.as_bool().unwrap_or(false))
        })
    }

    fn check(&self, params: &mut Params<'_>) -> Result<Outcome, ModelError> {
        let Params::Validates { entity, options } = params else {
            return Ok(Outcome::Bool(false));
        };
        let mut rules = options.rules.clone().unwrap_or_else(|| self.inner.def.rules.clone());
        if let Some(whitelist) = &options.whitelist {
            rules.retain(|field, _| whitelist.contains(field));
        }
        let exists = entity.exists();
        let check = CheckOptions {
            events: options.events.clone().unwrap_or_else(|| vec![default_event(exists)]),
            required: options.required.unwrap_or(!exists),
        };
        entity.reset_errors();
        let errors = self.inner.validator.check(&entity.fields_json(), &rules, &check);
        entity.merge_errors(errors);
        Ok(Outcome::Bool(entity.errors().is_empty()))
    }

    /// Delete a persisted entity by its key.
    pub fn delete(&self, entity: &mut Entity, options: Options) -> Result<bool, ModelError> {
        self.instrument(Method::Delete, || {
            self.initialize()?;
            let mut params = Params::Delete { entity, options };
            let outcome = self
                .inner
                .filters
                .run(&self.inner.meta.name, Method::Delete, None, &mut params, |params| {
                    let Params::Delete { entity, options } = params else {
                        return Ok(Outcome::Bool(false));
                    };
                    let mut query = self.query(QueryKind::Delete, options)?.entity(entity);
                    Ok(Outcome::Bool(self.inner.source.delete(&mut query, options)?))
                })?;
            Ok(outcome.as_bool().unwrap_or(false))
        })
    }

    /// Write `data` to every record matching `conditions`.
    pub fn update(&self, data: Options, conditions: Options, options: Options) -> Result<bool, ModelError> {
        self.instrument(Method::Update, || {
            self.initialize()?;
            let mut params = Params::Update {
                data,
                conditions,
                options,
            };
            let outcome = self
                .inner
                .filters
                .run(&self.inner.meta.name, Method::Update, None, &mut params, |params| {
                    let Params::Update { data, conditions, options } = params else {
                        return Ok(Outcome::Bool(false));
                    };
                    let mut query = self
                        .query(QueryKind::Update, options)?
                        .conditions(conditions.clone())
                        .data(data.clone());
                    Ok(Outcome::Bool(self.inner.source.update(&mut query, options)?))
                })?;
            Ok(outcome.as_bool().unwrap_or(false))
        })
    }

    /// Delete every record matching `conditions`.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::UnguardedRemove` for empty conditions unless
    /// `options.force` is set.
    pub fn remove(&self, conditions: Options, options: RemoveOptions) -> Result<bool, ModelError> {
        self.instrument(Method::Remove, || {
            self.initialize()?;
            let mut params = Params::Remove { conditions, options };
            let outcome = self
                .inner
                .filters
                .run(&self.inner.meta.name, Method::Remove, None, &mut params, |params| {
                    let Params::Remove { conditions, options } = params else {
                        return Ok(Outcome::Bool(false));
                    };
                    let meta = &self.inner.meta;
                    if conditions.is_empty() {
                        if !options.force {
                            return Err(ModelError::UnguardedRemove(meta.name.clone()));
                        }
                        warn!("Removing every `{}` record from `{}`", meta.name, meta.source);
                    }
                    let mut query = self
                        .query(QueryKind::Delete, &Options::new())?
                        .conditions(conditions.clone());
                    Ok(Outcome::Bool(self.inner.source.delete(&mut query, &Options::new())?))
                })?;
            Ok(outcome.as_bool().unwrap_or(false))
        })
    }

    // ---- relations ----

    /// Bind a relation by type name (`hasOne`, `has_many`, `belongsTo`, ...).
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidRelation` for an unknown type.
    pub fn bind(&self, kind: &str, name: &str, config: RelationConfig) -> Result<Relationship, ModelError> {
        let kind: RelationType = kind.parse().map_err(|relation| ModelError::InvalidRelation {
            model: self.inner.meta.name.clone(),
            relation,
        })?;
        self.initialize()?;
        self.bind_relation(kind, name, &config)
    }

    fn bind_relation(&self, kind: RelationType, name: &str, config: &RelationConfig) -> Result<Relationship, ModelError> {
        let relationship = self
            .inner
            .source
            .relationship(&self.inner.meta, kind, name, config)?;
        write_lock(&self.inner.pending, "relations")?.remove(name);
        write_lock(&self.inner.relations, "relations")?.insert(name.to_string(), relationship.clone());
        debug!(
            "Bound relation `{}.{}` ({} `{}`)",
            self.inner.meta.name, name, kind, relationship.to
        );
        Ok(relationship)
    }

    /// A relation by name, binding a declared one on first access.
    pub fn relations(&self, name: &str) -> Result<Option<Relationship>, ModelError> {
        self.initialize()?;
        if let Some(bound) = read_lock(&self.inner.relations, "relations")?.get(name) {
            return Ok(Some(bound.clone()));
        }
        let declared = read_lock(&self.inner.pending, "relations")?.get(name).cloned();
        match declared {
            Some(def) => self.bind_relation(def.kind, &def.name, &def.config).map(Some),
            None => Ok(None),
        }
    }

    /// Names of bound and declared relations.
    pub fn relation_names(&self) -> Result<Vec<String>, ModelError> {
        self.initialize()?;
        let mut names: Vec<String> = read_lock(&self.inner.relations, "relations")?.keys().cloned().collect();
        names.extend(read_lock(&self.inner.pending, "relations")?.keys().cloned());
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn relationship(&self, name: &str) -> Result<Relationship, ModelError> {
        self.relations(name)?.ok_or_else(|| ModelError::InvalidRelation {
            model: self.inner.meta.name.clone(),
            relation: name.to_string(),
        })
    }

    /// Load the records related to `entity` through relation `name`.
    ///
    /// Single relations yield an entity or null, `hasMany` yields a set.
    pub fn related(&self, entity: &Entity, name: &str) -> Result<Value, ModelError> {
        let relationship = self.relationship(name)?;
        self.load_related(&relationship, entity)
    }

    fn load_related(&self, relationship: &Relationship, entity: &Entity) -> Result<Value, ModelError> {
        if relationship.link == Link::Contained {
            return Ok(entity.get(&relationship.field_name).cloned().unwrap_or_default());
        }
        let Some(options) = relationship.query_for(entity) else {
            return Ok(if relationship.kind.is_single() {
                Value::null()
            } else {
                Value::Set(Collection::new(Some(&relationship.to)))
            });
        };
        let target = self.registry()?.model(&relationship.to)?;
        Ok(match target.find(relationship.finder(), options)? {
            Outcome::Entity(entity) => Value::Entity(Box::new(entity)),
            Outcome::Set(set) => Value::Set(set),
            _ if relationship.kind.is_single() => Value::null(),
            _ => Value::Set(Collection::new(Some(&relationship.to))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{ConnectionConfig, Connections};
    use crate::query::options;
    use crate::schema::Field;
    use crate::validator::RuleKind;
    use serde_json::json;

    fn registry() -> Registry {
        let connections = Connections::new();
        connections.add("default", ConnectionConfig::new("memory"));
        Registry::new(connections)
    }

    fn posts(registry: &Registry) -> Model {
        registry
            .define(
                ModelDef::new("Post")
                    .field("id", Field::new("integer"))
                    .field("title", Field::new("string"))
                    .field("views", Field::new("integer").default_value(0))
                    .validates("title", RuleKind::NotEmpty),
            )
            .expect("define");
        registry.model("Post").expect("model")
    }

    #[test]
    fn test_key_shapes() {
        let registry = registry();
        let model = posts(&registry);
        assert_eq!(model.key(&json!(5)), Some(options(json!({"id": 5}))));
        assert_eq!(model.key(&json!({"id": 5, "title": "x"})), Some(options(json!({"id": 5}))));
        assert_eq!(model.key(&json!({"title": "x"})), None);
        assert_eq!(model.key(&JsonValue::Null), None);

        let key = model.key(&json!(5)).expect("key");
        assert_eq!(model.key(&JsonValue::Object(key.clone())), Some(key));
    }

    #[test]
    fn test_composite_key() {
        let registry = registry();
        registry
            .define(ModelDef::new("Membership").key(["group", "user"]))
            .expect("define");
        let model = registry.model("Membership").expect("model");
        assert_eq!(
            model.key(&json!(["a", 1])),
            Some(options(json!({"group": "a", "user": 1})))
        );
        assert_eq!(model.key(&json!(["a"])), None);
        assert_eq!(model.key(&json!(7)), None);
    }

    #[test]
    fn test_create_applies_schema_defaults() {
        let registry = registry();
        let model = posts(&registry);
        let entity = model
            .create(options(json!({"title": "Hello"})), CreateOptions::default())
            .expect("create");
        assert!(!entity.exists());
        assert_eq!(entity.get_json("views"), Some(&json!(0)));
        assert_eq!(entity.model(), Some("Post"));

        let loaded = model
            .create(options(json!({"id": 3, "title": "x"})), CreateOptions { defaults: false, exists: true })
            .expect("create");
        assert!(loaded.exists());
        assert_eq!(loaded.get_json("views"), None);
    }

    #[test]
    fn test_save_validates_before_writing() {
        let registry = registry();
        let model = posts(&registry);
        let mut entity = model.create(Options::new(), CreateOptions::default()).expect("create");

        assert_eq!(model.save(&mut entity, Options::new(), SaveOptions::default()), Ok(false));
        assert!(entity.error("title").is_some());
        assert_eq!(model.count(Options::new()), Ok(0));

        let saved = model.save(&mut entity, options(json!({"title": "Fine"})), SaveOptions::default());
        assert_eq!(saved, Ok(true));
        assert!(entity.exists());
        assert!(entity.errors().is_empty());
        assert_eq!(entity.get_json("id"), Some(&json!(1)));
    }

    #[test]
    fn test_locked_schema_whitelists_fields() {
        let registry = registry();
        let model = posts(&registry);
        let mut entity = model
            .create(options(json!({"title": "T", "secret": "s"})), CreateOptions::default())
            .expect("create");
        assert_eq!(model.save(&mut entity, Options::new(), SaveOptions::default()), Ok(true));

        let stored = model.first(Options::new()).expect("find").expect("record");
        assert_eq!(stored.get_json("title"), Some(&json!("T")));
        assert!(!stored.has("secret"));
    }

    #[test]
    fn test_missing_key_field_is_a_configuration_error() {
        let registry = registry();
        registry
            .define(ModelDef::new("Tag").field("label", Field::new("string")))
            .expect("define");
        let model = registry.model("Tag").expect("model");
        assert!(matches!(model.schema(), Err(ModelError::MissingKey { field, .. }) if field == "id"));
    }

    #[test]
    fn test_title_field_resolution() {
        let registry = registry();
        assert_eq!(posts(&registry).title_field(), Ok("title".to_string()));

        registry
            .define(ModelDef::new("Person").connection(None).field("id", Field::new("integer")).field("name", Field::new("string")))
            .expect("define");
        assert_eq!(registry.model("Person").and_then(|m| m.title_field()), Ok("name".to_string()));

        registry.define(ModelDef::new("Blob").title("label")).expect("define");
        assert_eq!(registry.model("Blob").and_then(|m| m.title_field()), Ok("label".to_string()));
    }

    #[test]
    fn test_unknown_relation_type_is_invalid() {
        let registry = registry();
        let model = posts(&registry);
        let err = model.bind("hasSeveral", "Tags", RelationConfig::to("Tag"));
        assert!(matches!(err, Err(ModelError::InvalidRelation { .. })));
        assert_eq!(model.relations("Nope"), Ok(None));
    }

    #[test]
    fn test_bind_uses_source_defaults() {
        let registry = registry();
        let model = posts(&registry);
        let relationship = model
            .bind("hasMany", "Comments", RelationConfig::to("Comment"))
            .expect("bind");
        assert_eq!(relationship.field_name, "comments");
        assert_eq!(relationship.keys.get("id").map(String::as_str), Some("post_id"));
        assert_eq!(model.relation_names(), Ok(vec!["Comments".to_string()]));
    }

    #[test]
    fn test_unknown_magic_method() {
        let registry = registry();
        let model = posts(&registry);
        let err = model.call("search", json!(1), Options::new());
        assert!(matches!(err, Err(ModelError::MethodNotFound { .. })));
        let err = model.call("findNewestByTitle", json!("x"), Options::new());
        assert!(matches!(err, Err(ModelError::MethodNotFound { .. })));
    }
}
