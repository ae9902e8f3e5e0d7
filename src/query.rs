//! Query value objects and option merging.
//!
//! Every model operation that reaches a source is described by a [`Query`]:
//! its kind (read/create/update/delete), the target source, conditions,
//! projection, ordering and paging, and for writes the data or the entity
//! being written. Queries are built from loosely-typed [`Options`] maps so
//! finders can layer option sets on top of each other with [`merge`].

use crate::entity::Entity;
use serde_json::Value as JsonValue;
use std::fmt;

/// Loosely-typed option map (`conditions`, `order`, `limit`, ...).
pub type Options = serde_json::Map<String, JsonValue>;

/// One raw row or document as returned by a source.
pub type Record = Options;

/// Option names consumed by [`Query::from_options`]; anything else is a
/// condition candidate for finders such as `count`.
pub const QUERY_OPTION_NAMES: &[&str] = &[
    "conditions",
    "fields",
    "order",
    "limit",
    "offset",
    "page",
    "with",
    "whitelist",
    "data",
];

/// Error type for query construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// An option has the wrong shape
    InvalidOption { option: String, reason: String },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::InvalidOption { option, reason } => {
                write!(f, "Invalid query option `{}`: {}", option, reason)
            }
        }
    }
}

impl std::error::Error for QueryError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Read,
    Create,
    Update,
    Delete,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Read => "read",
            QueryKind::Create => "create",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    fn parse(option: &str, raw: &str) -> Result<Self, QueryError> {
        match raw.to_ascii_lowercase().as_str() {
            "" | "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(invalid(option, format!("unknown direction `{}`", other))),
        }
    }
}

fn invalid(option: &str, reason: impl Into<String>) -> QueryError {
    QueryError::InvalidOption {
        option: option.to_string(),
        reason: reason.into(),
    }
}

/// A single operation against a source.
///
/// Writes carry the entity being persisted so the source can sync generated
/// ids back onto it; that borrow is the `'a` lifetime.
#[derive(Debug, Default)]
pub struct Query<'a> {
    pub kind: Option<QueryKind>,
    /// Model the query runs for
    pub model: Option<String>,
    /// Table/collection name
    pub source: Option<String>,
    pub conditions: Options,
    /// Projection; empty means every field
    pub fields: Vec<String>,
    pub order: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub page: Option<usize>,
    /// Relations to eager-load after a read
    pub with: Vec<String>,
    /// Field values for bulk updates
    pub data: Options,
    /// Fields a write may persist; `None` means all
    pub whitelist: Option<Vec<String>>,
    /// Key field name(s) of the model
    pub key: Vec<String>,
    pub entity: Option<&'a mut Entity>,
}

impl<'a> Query<'a> {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Build a query from an options map.
    ///
    /// Accepted shapes:
    /// - `conditions`, `data`: objects
    /// - `fields`, `with`, `whitelist`: a list of names or one comma-separated string
    /// - `order`: `"title DESC, id"`, `["title DESC", {"id": "asc"}]` or `{"title": "desc"}`
    /// - `limit`, `offset`, `page`: non-negative integers; `page` (1-based)
    ///   derives `offset` from `limit`
    ///
    /// Other keys are ignored.
    pub fn from_options(kind: QueryKind, options: &Options) -> Result<Self, QueryError> {
        let mut query = Self::new(kind);
        for (name, value) in options {
            if value.is_null() {
                continue;
            }
            match name.as_str() {
                "conditions" => query.conditions = object(name, value)?,
                "data" => query.data = object(name, value)?,
                "fields" => query.fields = names(name, value)?,
                "with" => query.with = names(name, value)?,
                "whitelist" => query.whitelist = Some(names(name, value)?),
                "order" => query.order = order(name, value)?,
                "limit" => query.limit = Some(count(name, value)?),
                "offset" => query.offset = Some(count(name, value)?),
                "page" => query.page = Some(count(name, value)?),
                _ => {}
            }
        }
        // Pages past the addressable range read nothing.
        if let (Some(page), Some(limit)) = (query.page, query.limit) {
            query.offset = Some(page.saturating_sub(1).saturating_mul(limit));
        }
        Ok(query)
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn key(mut self, key: &[String]) -> Self {
        self.key = key.to_vec();
        self
    }

    pub fn conditions(mut self, conditions: Options) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn data(mut self, data: Options) -> Self {
        self.data = data;
        self
    }

    pub fn whitelist(mut self, whitelist: Option<Vec<String>>) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn entity(mut self, entity: &'a mut Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn entity_mut(&mut self) -> Option<&mut Entity> {
        self.entity.as_deref_mut()
    }

    /// Whether `field` may be written under the current whitelist.
    pub fn allows(&self, field: &str) -> bool {
        self.whitelist
            .as_ref()
            .map_or(true, |list| list.iter().any(|f| f == field))
    }
}

fn object(option: &str, value: &JsonValue) -> Result<Options, QueryError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| invalid(option, "expected an object"))
}

fn names(option: &str, value: &JsonValue) -> Result<Vec<String>, QueryError> {
    match value {
        JsonValue::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(option, "expected a list of names"))
            })
            .collect(),
        _ => Err(invalid(option, "expected a name or a list of names")),
    }
}

fn count(option: &str, value: &JsonValue) -> Result<usize, QueryError> {
    let n = match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let n = n.ok_or_else(|| invalid(option, "expected a non-negative integer"))?;
    Ok(usize::try_from(n).unwrap_or(usize::MAX))
}

fn order(option: &str, value: &JsonValue) -> Result<Vec<(String, Direction)>, QueryError> {
    let mut out = Vec::new();
    match value {
        JsonValue::String(s) => {
            for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                out.push(order_clause(option, part)?);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                out.extend(order(option, item)?);
            }
        }
        JsonValue::Object(map) => {
            for (field, direction) in map {
                let direction = direction
                    .as_str()
                    .ok_or_else(|| invalid(option, "direction must be a string"))?;
                out.push((field.clone(), Direction::parse(option, direction)?));
            }
        }
        _ => return Err(invalid(option, "expected a string, list or object")),
    }
    Ok(out)
}

fn order_clause(option: &str, clause: &str) -> Result<(String, Direction), QueryError> {
    let mut parts = clause.split_whitespace();
    let field = parts.next().unwrap_or_default().to_string();
    let direction = Direction::parse(option, parts.next().unwrap_or_default())?;
    Ok((field, direction))
}

/// Recursive merge of two option maps.
///
/// Objects merge key by key, lists are concatenated, and any other value in
/// `overlay` replaces the one in `base`.
pub fn merge(mut base: Options, overlay: Options) -> Options {
    for (key, value) in overlay {
        let merged = match base.remove(&key) {
            Some(existing) => merge_value(existing, value),
            None => value,
        };
        base.insert(key, merged);
    }
    base
}

pub fn merge_value(base: JsonValue, overlay: JsonValue) -> JsonValue {
    match (base, overlay) {
        (JsonValue::Object(a), JsonValue::Object(b)) => JsonValue::Object(merge(a, b)),
        (JsonValue::Array(mut a), JsonValue::Array(b)) => {
            a.extend(b);
            JsonValue::Array(a)
        }
        (_, overlay) => overlay,
    }
}

/// Build an [`Options`] map from a `json!` object literal.
///
/// Non-object input yields an empty map.
pub fn options(value: JsonValue) -> Options {
    match value {
        JsonValue::Object(map) => map,
        _ => Options::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_options_parses_every_shape() {
        let query = Query::from_options(
            QueryKind::Read,
            &options(json!({
                "conditions": {"title": "Hello"},
                "fields": "id, title",
                "order": "title DESC, id",
                "limit": 10,
                "page": 3,
                "with": ["author"],
                "unknown": 1
            })),
        )
        .expect("valid options");

        assert_eq!(query.kind, Some(QueryKind::Read));
        assert_eq!(query.conditions.get("title"), Some(&json!("Hello")));
        assert_eq!(query.fields, vec!["id", "title"]);
        assert_eq!(
            query.order,
            vec![("title".to_string(), Direction::Desc), ("id".to_string(), Direction::Asc)]
        );
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(20));
        assert_eq!(query.with, vec!["author"]);
        assert!(query.whitelist.is_none());
    }

    fn paging(opts: JsonValue) -> (Option<usize>, Option<usize>) {
        let query = Query::from_options(QueryKind::Read, &options(opts)).expect("valid paging");
        (query.limit, query.offset)
    }

    #[test]
    fn test_page_boundaries() {
        assert_eq!(paging(json!({"limit": 5, "page": 0})), (Some(5), Some(0)));
        assert_eq!(paging(json!({"limit": 5, "page": 1})), (Some(5), Some(0)));
        assert_eq!(paging(json!({"limit": 5, "page": 2})), (Some(5), Some(5)));
        assert_eq!(paging(json!({"page": 4})), (None, None));
        assert_eq!(paging(json!({"limit": 5, "offset": 7})), (Some(5), Some(7)));
        // page wins over an explicit offset
        assert_eq!(paging(json!({"limit": 5, "offset": 7, "page": 3})), (Some(5), Some(10)));
    }

    #[test]
    fn test_page_overflow_saturates() {
        assert_eq!(
            paging(json!({"page": u64::MAX, "limit": 10})),
            (Some(10), Some(usize::MAX))
        );
        assert_eq!(paging(json!({"page": 2, "limit": u64::MAX})).1, Some(usize::MAX));
        assert!(Query::from_options(QueryKind::Read, &options(json!({"page": -1}))).is_err());
    }

    #[test]
    fn test_order_accepts_lists_and_objects() {
        let query = Query::from_options(
            QueryKind::Read,
            &options(json!({"order": ["title desc", {"id": "asc"}]})),
        )
        .expect("valid order");
        assert_eq!(query.order.len(), 2);
        assert_eq!(query.order[0], ("title".to_string(), Direction::Desc));
    }

    #[test]
    fn test_invalid_options_are_reported() {
        let err = Query::from_options(QueryKind::Read, &options(json!({"limit": -1})));
        assert!(matches!(err, Err(QueryError::InvalidOption { ref option, .. }) if option == "limit"));
        assert!(Query::from_options(QueryKind::Read, &options(json!({"conditions": [1]}))).is_err());
        assert!(Query::from_options(QueryKind::Read, &options(json!({"order": "id sideways"}))).is_err());
    }

    #[test]
    fn test_whitelist_allows() {
        let query = Query::new(QueryKind::Create).whitelist(Some(vec!["title".into()]));
        assert!(query.allows("title"));
        assert!(!query.allows("admin"));
        assert!(Query::new(QueryKind::Create).allows("anything"));
    }

    #[test]
    fn test_merge_is_recursive() {
        let merged = merge(
            options(json!({"conditions": {"a": 1, "b": {"x": 1}}, "order": ["a"], "limit": 5})),
            options(json!({"conditions": {"b": {"y": 2}, "c": 3}, "order": ["b"], "limit": 1})),
        );
        assert_eq!(
            JsonValue::Object(merged),
            json!({
                "conditions": {"a": 1, "b": {"x": 1, "y": 2}, "c": 3},
                "order": ["a", "b"],
                "limit": 1
            })
        );
    }
}
