//! In-memory document source.
//!
//! Records live in per-source tables behind an `RwLock`. Conditions support
//! equality (numbers compare loosely), lists as membership tests, operator
//! objects (`{"views": {">": 10}}`) and an `or` group. Updates of a persisted
//! entity apply its pending increments to the stored value rather than
//! overwriting it.

use super::{ClassConfig, Source, SourceError};
use crate::collection::compare_json;
use crate::connections::ConnectionConfig;
use crate::entity::SyncOptions;
use crate::model::Meta;
use crate::query::{Direction, Options, Query, Record};
use crate::schema::{Field, Schema};
use crate::value::{numeric_add, Numeric, Value};
use log::debug;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// How missing single-field keys are generated on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// 1, 2, 3, ... per source
    #[default]
    AutoIncrement,
    /// Random v4 UUID strings
    Uuid,
}

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Record>,
    next_id: i64,
}

impl Table {
    fn bump(&mut self, id: &JsonValue) {
        if let Some(Numeric::Int(n)) = Numeric::of(id) {
            self.next_id = self.next_id.max(n);
        }
    }
}

/// Process-local document store.
#[derive(Debug)]
pub struct MemorySource {
    tables: RwLock<HashMap<String, Table>>,
    schemas: RwLock<HashMap<String, Schema>>,
    ids: IdStrategy,
    key: String,
    locked: Option<bool>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
            ids: IdStrategy::AutoIncrement,
            key: "id".to_string(),
            locked: None,
        }
    }

    pub fn with_ids(mut self, ids: IdStrategy) -> Self {
        self.ids = ids;
        self
    }

    /// Build from connection options.
    ///
    /// # Options
    ///
    /// * `ids` - `"increment"` (default) or `"uuid"`
    /// * `key` - default key field for models on this connection (`"id"`)
    /// * `locked` - default `locked` meta for models on this connection
    /// * `fixtures` - `{source: [records]}` seeded on construction
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, SourceError> {
        let mut source = Self::new();
        let options = &config.options;
        if let Some(ids) = options.get("ids") {
            source.ids = match ids.as_str() {
                Some("increment") => IdStrategy::AutoIncrement,
                Some("uuid") => IdStrategy::Uuid,
                _ => {
                    return Err(SourceError::InvalidConfig(format!(
                        "`ids` must be \"increment\" or \"uuid\", got {}",
                        ids
                    )))
                }
            };
        }
        if let Some(key) = options.get("key") {
            source.key = key
                .as_str()
                .ok_or_else(|| SourceError::InvalidConfig("`key` must be a string".into()))?
                .to_string();
        }
        if let Some(locked) = options.get("locked") {
            source.locked = Some(
                locked
                    .as_bool()
                    .ok_or_else(|| SourceError::InvalidConfig("`locked` must be a boolean".into()))?,
            );
        }
        if let Some(fixtures) = options.get("fixtures") {
            let fixtures = fixtures
                .as_object()
                .ok_or_else(|| SourceError::InvalidConfig("`fixtures` must be an object".into()))?;
            for (name, records) in fixtures {
                let records = records.as_array().ok_or_else(|| {
                    SourceError::InvalidConfig(format!("fixtures for `{}` must be a list", name))
                })?;
                source.seed(name, records.iter().filter_map(|r| r.as_object().cloned()))?;
            }
        }
        Ok(source)
    }

    /// Declare a schema for `source`, used by `describe`.
    pub fn define(&self, source: impl Into<String>, schema: Schema) -> Result<(), SourceError> {
        self.schemas_mut()?.insert(source.into(), schema);
        Ok(())
    }

    /// Insert raw records, bypassing id generation for records that carry one.
    pub fn seed<I>(&self, source: &str, records: I) -> Result<(), SourceError>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut tables = self.tables_mut()?;
        let table = tables.entry(source.to_string()).or_default();
        for record in records {
            if let Some(id) = record.get(&self.key) {
                table.bump(id);
            }
            table.rows.push(record);
        }
        Ok(())
    }

    /// Snapshot of every stored record of `source`.
    pub fn rows(&self, source: &str) -> Result<Vec<Record>, SourceError> {
        Ok(self
            .tables()?
            .get(source)
            .map(|t| t.rows.clone())
            .unwrap_or_default())
    }

    /// Drop every table and schema.
    pub fn clear(&self) -> Result<(), SourceError> {
        self.tables_mut()?.clear();
        self.schemas_mut()?.clear();
        Ok(())
    }

    fn tables(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Table>>, SourceError> {
        self.tables
            .read()
            .map_err(|e| SourceError::Lock(format!("Failed to lock tables: {e}")))
    }

    fn tables_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Table>>, SourceError> {
        self.tables
            .write()
            .map_err(|e| SourceError::Lock(format!("Failed to lock tables: {e}")))
    }

    fn schemas_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Schema>>, SourceError> {
        self.schemas
            .write()
            .map_err(|e| SourceError::Lock(format!("Failed to lock schemas: {e}")))
    }

    fn generate_id(&self, table: &mut Table) -> JsonValue {
        match self.ids {
            IdStrategy::AutoIncrement => {
                table.next_id += 1;
                JsonValue::from(table.next_id)
            }
            IdStrategy::Uuid => JsonValue::String(uuid::Uuid::new_v4().to_string()),
        }
    }

    fn key_fields(&self, query: &Query<'_>) -> Vec<String> {
        if query.key.is_empty() {
            vec![self.key.clone()]
        } else {
            query.key.clone()
        }
    }
}

fn source_name<'q>(query: &'q Query<'_>) -> Result<&'q str, SourceError> {
    query.source.as_deref().ok_or(SourceError::MissingSource)
}

/// Whether `record` satisfies every condition.
pub(crate) fn matches(record: &Record, conditions: &Options) -> bool {
    conditions.iter().all(|(field, expected)| {
        if field == "or" {
            return match expected {
                JsonValue::Array(groups) => groups
                    .iter()
                    .filter_map(JsonValue::as_object)
                    .any(|group| matches(record, group)),
                JsonValue::Object(group) => group
                    .iter()
                    .any(|(f, v)| matches_value(record.get(f), v)),
                _ => false,
            };
        }
        matches_value(record.get(field), expected)
    })
}

fn is_operator(op: &str) -> bool {
    matches!(op, "<" | "<=" | ">" | ">=" | "!=" | "<>" | "=")
}

fn matches_value(actual: Option<&JsonValue>, expected: &JsonValue) -> bool {
    match expected {
        JsonValue::Array(options) => options.iter().any(|o| loose_eq(actual, o)),
        JsonValue::Object(ops) if !ops.is_empty() && ops.keys().all(|k| is_operator(k)) => {
            ops.iter().all(|(op, operand)| compare(op, actual, operand))
        }
        other => loose_eq(actual, other),
    }
}

fn loose_eq(actual: Option<&JsonValue>, expected: &JsonValue) -> bool {
    let Some(actual) = actual else {
        return expected.is_null();
    };
    if actual.is_number() || expected.is_number() {
        if let (Some(a), Some(b)) = (Numeric::of(actual), Numeric::of(expected)) {
            return a.as_f64() == b.as_f64();
        }
    }
    actual == expected
}

fn compare(op: &str, actual: Option<&JsonValue>, operand: &JsonValue) -> bool {
    let ordering = || match (actual.and_then(Numeric::of), Numeric::of(operand)) {
        (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        _ => match (actual, operand) {
            (Some(JsonValue::String(a)), JsonValue::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    match op {
        "=" => loose_eq(actual, operand),
        "!=" | "<>" => !loose_eq(actual, operand),
        "<" => ordering() == Some(Ordering::Less),
        "<=" => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        ">" => ordering() == Some(Ordering::Greater),
        ">=" => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    }
}

fn key_conditions(record: &Options, key: &[String]) -> Option<Options> {
    key.iter()
        .map(|field| match record.get(field) {
            Some(value) if !value.is_null() => Some((field.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

/// Fields of `record` a write must skip under the query's whitelist.
fn not_allowed(query: &Query<'_>, record: &Record, key: &[String]) -> Vec<String> {
    record
        .keys()
        .filter(|field| !query.allows(field) && !key.contains(field))
        .cloned()
        .collect()
}

impl Source for MemorySource {
    fn read(&self, query: &Query<'_>, _options: &Options) -> Result<Vec<Record>, SourceError> {
        let source = source_name(query)?;
        let tables = self.tables()?;
        let Some(table) = tables.get(source) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<&Record> = table
            .rows
            .iter()
            .filter(|row| matches(row, &query.conditions))
            .collect();
        if !query.order.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .order
                    .iter()
                    .map(|(field, direction)| {
                        let ord = compare_json(a.get(field), b.get(field));
                        match direction {
                            Direction::Asc => ord,
                            Direction::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                if query.fields.is_empty() {
                    row.clone()
                } else {
                    query
                        .fields
                        .iter()
                        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
                        .collect()
                }
            })
            .collect())
    }

    fn create(&self, query: &mut Query<'_>, _options: &Options) -> Result<bool, SourceError> {
        let source = source_name(query)?.to_string();
        let key = self.key_fields(query);
        let mut record: Record = match query.entity.as_deref() {
            Some(entity) => entity.fields_json(),
            None => query.data.clone(),
        };
        let dropped = not_allowed(query, &record, &key);
        record.retain(|field, _| !dropped.contains(field));

        let generated = {
            let mut tables = self.tables_mut()?;
            let table = tables.entry(source.clone()).or_default();
            let generated = match key_conditions(&record, &key) {
                Some(values) => {
                    if table.rows.iter().any(|row| matches(row, &values)) {
                        return Err(SourceError::DuplicateKey(format!(
                            "`{}` already holds {}",
                            source,
                            JsonValue::Object(values)
                        )));
                    }
                    if let Some(id) = values.get(&key[0]) {
                        table.bump(id);
                    }
                    None
                }
                None if key.len() == 1 => {
                    let id = self.generate_id(table);
                    record.insert(key[0].clone(), id.clone());
                    Some(id)
                }
                None => {
                    return Err(SourceError::MissingKey(format!(
                        "composite key ({}) must be supplied on insert",
                        key.join(", ")
                    )))
                }
            };
            table.rows.push(record);
            generated
        };
        debug!("memory source: inserted into `{}`", source);

        if let Some(entity) = query.entity_mut() {
            entity.sync(generated, BTreeMap::new(), SyncOptions::default())?;
            entity.keep_pending(&dropped);
        }
        Ok(true)
    }

    fn update(&self, query: &mut Query<'_>, _options: &Options) -> Result<bool, SourceError> {
        let source = source_name(query)?.to_string();
        let key = self.key_fields(query);

        let Some(entity) = query.entity.as_deref() else {
            let mut tables = self.tables_mut()?;
            let Some(table) = tables.get_mut(&source) else {
                return Ok(true);
            };
            for row in table.rows.iter_mut().filter(|row| matches(row, &query.conditions)) {
                for (field, value) in &query.data {
                    if query.allows(field) {
                        row.insert(field.clone(), value.clone());
                    }
                }
            }
            return Ok(true);
        };

        let fields = entity.fields_json();
        let dropped = not_allowed(query, &fields, &key);
        let conditions = key_conditions(&fields, &key).ok_or_else(|| {
            SourceError::MissingKey(format!("cannot update `{}` without ({})", source, key.join(", ")))
        })?;
        let increments = entity.increments().clone();

        let stored = {
            let mut tables = self.tables_mut()?;
            let Some(row) = tables
                .get_mut(&source)
                .and_then(|t| t.rows.iter_mut().find(|row| matches(row, &conditions)))
            else {
                return Ok(false);
            };
            let mut stored = BTreeMap::new();
            for (field, value) in fields {
                if !query.allows(&field) || key.contains(&field) {
                    continue;
                }
                let value = match increments.get(&field) {
                    Some(delta) => {
                        let current = row.get(&field).cloned().unwrap_or_else(|| JsonValue::from(0));
                        let next = numeric_add(&current, delta).unwrap_or(value);
                        stored.insert(field.clone(), Value::Json(next.clone()));
                        next
                    }
                    None => value,
                };
                row.insert(field, value);
            }
            stored
        };

        if let Some(entity) = query.entity_mut() {
            entity.sync(None, stored, SyncOptions::default())?;
            entity.keep_pending(&dropped);
        }
        Ok(true)
    }

    fn delete(&self, query: &mut Query<'_>, _options: &Options) -> Result<bool, SourceError> {
        let source = source_name(query)?.to_string();
        let key = self.key_fields(query);
        let conditions = match query.entity.as_deref() {
            Some(entity) => key_conditions(&entity.fields_json(), &key).ok_or_else(|| {
                SourceError::MissingKey(format!("cannot delete from `{}` without ({})", source, key.join(", ")))
            })?,
            None => query.conditions.clone(),
        };

        let removed = {
            let mut tables = self.tables_mut()?;
            match tables.get_mut(&source) {
                Some(table) => {
                    let before = table.rows.len();
                    table.rows.retain(|row| !matches(row, &conditions));
                    before - table.rows.len()
                }
                None => 0,
            }
        };
        debug!("memory source: removed {} record(s) from `{}`", removed, source);

        match query.entity_mut() {
            Some(entity) => {
                entity.sync(None, BTreeMap::new(), SyncOptions::dematerialize())?;
                Ok(removed > 0)
            }
            None => Ok(true),
        }
    }

    fn calculation(&self, name: &str, query: &Query<'_>, _options: &Options) -> Result<JsonValue, SourceError> {
        match name {
            "count" => {
                let source = source_name(query)?;
                let count = self
                    .tables()?
                    .get(source)
                    .map_or(0, |t| t.rows.iter().filter(|row| matches(row, &query.conditions)).count());
                Ok(JsonValue::from(count))
            }
            other => Err(SourceError::Unsupported(format!("calculation `{}`", other))),
        }
    }

    fn describe(&self, source: &str, hints: &BTreeMap<String, Field>, meta: &Meta) -> Result<Schema, SourceError> {
        let defined = self
            .schemas
            .read()
            .map_err(|e| SourceError::Lock(format!("Failed to lock schemas: {e}")))?
            .get(source)
            .cloned();
        let mut schema = match defined {
            Some(mut schema) => {
                if !schema.locked() {
                    schema
                        .append(hints.iter().map(|(k, v)| (k.clone(), v.clone())))
                        .map_err(|e| SourceError::Backend(e.to_string()))?;
                }
                schema
            }
            None => Schema::with_fields(hints.iter().map(|(k, v)| (k.clone(), v.clone()))),
        };
        schema.set_key(&meta.key);
        Ok(schema)
    }

    fn enabled(&self, feature: &str) -> bool {
        matches!(feature, "relationships" | "arrays" | "booleans")
    }

    fn configure_class(&self, _model: &str) -> ClassConfig {
        let mut meta = Options::new();
        meta.insert("key".into(), JsonValue::String(self.key.clone()));
        if let Some(locked) = self.locked {
            meta.insert("locked".into(), JsonValue::Bool(locked));
        }
        ClassConfig {
            meta,
            ..ClassConfig::default()
        }
    }

    fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        if let Ok(schemas) = self.schemas.read() {
            names.extend(schemas.keys().cloned());
        }
        names.sort();
        names.dedup();
        names
    }
}
