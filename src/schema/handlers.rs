//! Built-in per-type value handlers.
//!
//! A handler turns a raw scalar coming out of a store (or set by a caller)
//! into the canonical representation for its declared type. Values a
//! handler cannot interpret are returned unchanged rather than dropped.

use super::Handler;
use crate::value::{is_truthy, Numeric};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) fn defaults() -> HashMap<String, Handler> {
    let mut handlers: HashMap<String, Handler> = HashMap::new();
    handlers.insert("id".into(), Arc::new(cast_id));
    handlers.insert("string".into(), Arc::new(cast_string));
    handlers.insert("integer".into(), Arc::new(cast_integer));
    handlers.insert("float".into(), Arc::new(cast_float));
    handlers.insert("boolean".into(), Arc::new(cast_boolean));
    handlers.insert("date".into(), Arc::new(cast_date));
    handlers.insert("decimal".into(), Arc::new(cast_decimal));
    handlers
}

fn cast_id(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => match s.parse::<i64>() {
            Ok(i) if i.to_string() == *s => JsonValue::from(i),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn cast_string(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Number(n) => JsonValue::String(n.to_string()),
        JsonValue::Bool(b) => JsonValue::String(b.to_string()),
        _ => value.clone(),
    }
}

fn cast_integer(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Bool(b) => JsonValue::from(i64::from(*b)),
        _ => match Numeric::of(value) {
            Some(Numeric::Int(i)) => JsonValue::from(i),
            Some(Numeric::Float(f)) => JsonValue::from(f.trunc() as i64),
            None => value.clone(),
        },
    }
}

fn cast_float(value: &JsonValue) -> JsonValue {
    match Numeric::of(value) {
        Some(n) => Numeric::Float(n.as_f64()).into_json(),
        None => value.clone(),
    }
}

fn cast_boolean(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Null => JsonValue::Null,
        other => JsonValue::Bool(is_truthy(other)),
    }
}

/// Dates normalise to RFC 3339 in UTC; integers are read as unix seconds.
fn cast_date(value: &JsonValue) -> JsonValue {
    let parsed: Option<DateTime<Utc>> = match value {
        JsonValue::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        JsonValue::String(s) => parse_date(s),
        _ => None,
    };
    match parsed {
        Some(date) => JsonValue::String(date.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => value.clone(),
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Decimals are kept as normalised strings so no precision is lost to `f64`.
fn cast_decimal(value: &JsonValue) -> JsonValue {
    let parsed = match value {
        JsonValue::String(s) => Decimal::from_str(s.trim()).ok(),
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };
    match parsed {
        Some(decimal) => JsonValue::String(decimal.normalize().to_string()),
        None => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_and_float() {
        assert_eq!(cast_integer(&json!("42")), json!(42));
        assert_eq!(cast_integer(&json!(3.9)), json!(3));
        assert_eq!(cast_integer(&json!(true)), json!(1));
        assert_eq!(cast_integer(&json!("n/a")), json!("n/a"));
        assert_eq!(cast_float(&json!("1.5")), json!(1.5));
        assert_eq!(cast_float(&json!(2)), json!(2.0));
    }

    #[test]
    fn test_boolean_and_string() {
        assert_eq!(cast_boolean(&json!("0")), json!(false));
        assert_eq!(cast_boolean(&json!("yes")), json!(true));
        assert_eq!(cast_boolean(&json!(null)), json!(null));
        assert_eq!(cast_string(&json!(12)), json!("12"));
    }

    #[test]
    fn test_date_normalisation() {
        assert_eq!(cast_date(&json!("2024-03-01")), json!("2024-03-01T00:00:00Z"));
        assert_eq!(cast_date(&json!("2024-03-01 10:30:00")), json!("2024-03-01T10:30:00Z"));
        assert_eq!(cast_date(&json!(0)), json!("1970-01-01T00:00:00Z"));
        assert_eq!(cast_date(&json!("someday")), json!("someday"));
    }

    #[test]
    fn test_decimal_normalisation() {
        assert_eq!(cast_decimal(&json!("10.500")), json!("10.5"));
        assert_eq!(cast_decimal(&json!(3)), json!("3"));
        assert_eq!(cast_decimal(&json!("abc")), json!("abc"));
    }

    #[test]
    fn test_id_keeps_strings_that_are_not_integers() {
        assert_eq!(cast_id(&json!("17")), json!(17));
        assert_eq!(cast_id(&json!("017")), json!("017"));
        assert_eq!(cast_id(&json!("5f2b")), json!("5f2b"));
    }
}
