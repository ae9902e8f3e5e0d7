//! Finders: named query strategies run as the last filter of `find`.
//!
//! Built-ins:
//!
//! | name    | behaviour |
//! |---------|-----------|
//! | `all`   | pass-through; the terminal read returns a set |
//! | `first` | forces `limit: 1`, yields the single entity or nothing |
//! | `list`  | reduces the set to `(key, title)` pairs |
//! | `count` | unknown options become conditions; asks the source to count |
//!
//! Custom finders are either static option sets ([`FinderDef::Options`]),
//! deep-merged into the caller's options before delegating onward, or any
//! [`Filter`].

use crate::filters::{Chain, Filter, Outcome, Params};
use crate::model::ModelError;
use crate::query::{merge, Options, Query, QueryKind, QUERY_OPTION_NAMES};
use crate::source::{Source, SourceError};
use crate::value::Value;
use convert_case::{Case, Casing};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// What `Model::find` is asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Find {
    /// A finder name; names no finder knows are treated as key values
    Named(String),
    /// A key value (scalar, list for composite keys, or key map)
    Key(JsonValue),
}

impl From<&str> for Find {
    fn from(name: &str) -> Self {
        Find::Named(name.to_string())
    }
}

impl From<String> for Find {
    fn from(name: String) -> Self {
        Find::Named(name)
    }
}

impl From<JsonValue> for Find {
    fn from(key: JsonValue) -> Self {
        Find::Key(key)
    }
}

impl From<i64> for Find {
    fn from(key: i64) -> Self {
        Find::Key(key.into())
    }
}

impl From<i32> for Find {
    fn from(key: i32) -> Self {
        Find::Key(key.into())
    }
}

/// A declared finder.
#[derive(Clone)]
pub enum FinderDef {
    /// Static options merged into the caller's
    Options(Options),
    Filter(Arc<dyn Filter>),
}

impl fmt::Debug for FinderDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinderDef::Options(options) => f.debug_tuple("Options").field(options).finish(),
            FinderDef::Filter(_) => f.write_str("Filter(..)"),
        }
    }
}

impl From<Options> for FinderDef {
    fn from(options: Options) -> Self {
        FinderDef::Options(options)
    }
}

impl From<Arc<dyn Filter>> for FinderDef {
    fn from(filter: Arc<dyn Filter>) -> Self {
        FinderDef::Filter(filter)
    }
}

impl FinderDef {
    pub(crate) fn into_filter(self) -> Arc<dyn Filter> {
        match self {
            FinderDef::Options(options) => Arc::new(OptionsFinder { options }),
            FinderDef::Filter(filter) => filter,
        }
    }
}

fn find_options<'p>(params: &'p mut Params<'_>) -> Option<&'p mut Options> {
    match params {
        Params::Find { options, .. } => Some(options),
        _ => None,
    }
}

/// Deep-merges static options, then delegates.
pub(crate) struct OptionsFinder {
    options: Options,
}

impl Filter for OptionsFinder {
    fn apply<'a>(&self, params: &mut Params<'a>, chain: &mut Chain<'_, 'a>) -> Result<Outcome, ModelError> {
        if let Some(options) = find_options(params) {
            let caller = std::mem::take(options);
            *options = merge(self.options.clone(), caller);
        }
        chain.next(params)
    }
}

pub(crate) struct AllFinder;

impl Filter for AllFinder {
    fn apply<'a>(&self, params: &mut Params<'a>, chain: &mut Chain<'_, 'a>) -> Result<Outcome, ModelError> {
        chain.next(params)
    }
}

pub(crate) struct FirstFinder;

impl Filter for FirstFinder {
    fn apply<'a>(&self, params: &mut Params<'a>, chain: &mut Chain<'_, 'a>) -> Result<Outcome, ModelError> {
        if let Some(options) = find_options(params) {
            options.insert("limit".into(), JsonValue::from(1));
        }
        Ok(match chain.next(params)? {
            Outcome::Set(set) => set
                .into_iter()
                .find_map(Value::into_entity)
                .map_or(Outcome::None, Outcome::Entity),
            other => other,
        })
    }
}

pub(crate) struct ListFinder {
    pub(crate) key: Vec<String>,
    pub(crate) title: String,
}

impl Filter for ListFinder {
    fn apply<'a>(&self, params: &mut Params<'a>, chain: &mut Chain<'_, 'a>) -> Result<Outcome, ModelError> {
        let Outcome::Set(set) = chain.next(params)? else {
            return Ok(Outcome::List(Vec::new()));
        };
        let list = set
            .entities()
            .map(|entity| {
                let key = match self.key.as_slice() {
                    [single] => entity.get_json(single).cloned().unwrap_or_default(),
                    many => JsonValue::Object(
                        many.iter()
                            .map(|k| (k.clone(), entity.get_json(k).cloned().unwrap_or_default()))
                            .collect(),
                    ),
                };
                let title = entity.get_json(&self.title).cloned().unwrap_or_default();
                (key, title)
            })
            .collect();
        Ok(Outcome::List(list))
    }
}

pub(crate) struct CountFinder {
    pub(crate) source: Arc<dyn Source>,
    pub(crate) model: String,
    pub(crate) table: String,
    pub(crate) key: Vec<String>,
}

impl Filter for CountFinder {
    fn apply<'a>(&self, params: &mut Params<'a>, _chain: &mut Chain<'_, 'a>) -> Result<Outcome, ModelError> {
        let Some(options) = find_options(params) else {
            return Ok(Outcome::Count(0));
        };
        let mut extra = Options::new();
        options.retain(|name, value| {
            if QUERY_OPTION_NAMES.contains(&name.as_str()) {
                true
            } else {
                extra.insert(name.clone(), value.clone());
                false
            }
        });
        if !extra.is_empty() {
            let mut conditions = Options::new();
            conditions.insert("conditions".into(), JsonValue::Object(extra));
            *options = merge(std::mem::take(options), conditions);
        }
        let query = Query::from_options(QueryKind::Read, options)?
            .model(self.model.clone())
            .source(self.table.clone())
            .key(&self.key);
        let count = self.source.calculation("count", &query, options)?;
        count_outcome(&self.table, count)
    }
}

/// A count calculation must come back as a non-negative integer.
fn count_outcome(table: &str, count: JsonValue) -> Result<Outcome, ModelError> {
    match count.as_u64() {
        Some(n) => Ok(Outcome::Count(n)),
        None => Err(SourceError::Backend(format!(
            "`count` on `{}` returned {}, expected a non-negative integer",
            table, count
        ))
        .into()),
    }
}

static MAGIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^findBy(?P<field>\w+)$|^find(?P<kind>\w+?)By(?P<fields>\w+)$")
        .expect("magic finder pattern is valid")
});

/// Parse `findByTitle` / `findAllByTitle` into `(finder, field)`.
pub(crate) fn parse_magic(method: &str) -> Option<(String, String)> {
    let captures = MAGIC.captures(method)?;
    if let Some(field) = captures.name("field") {
        return Some(("first".to_string(), field.as_str().to_case(Case::Snake)));
    }
    let kind = captures.name("kind")?.as_str();
    let field = captures.name("fields")?.as_str();
    Some((kind.to_case(Case::Camel), field.to_case(Case::Snake)))
}
