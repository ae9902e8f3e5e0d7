//! Validation rules and the validator collaborator.
//!
//! Models hold [`Rules`] per field; `Model::validates` hands the entity's
//! data and those rules to a [`Validator`], which returns the failed
//! messages per field. [`RuleValidator`] is the built-in implementation.

use crate::entity::Errors;
use crate::query::Options;
use crate::value::{is_truthy, Numeric};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Validation rules keyed by field name.
pub type Rules = BTreeMap<String, Vec<Rule>>;

/// Predicate for [`RuleKind::Custom`]: the field value and the full record.
pub type Check = Arc<dyn Fn(&JsonValue, &Options) -> bool + Send + Sync>;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern is valid")
});

/// What a rule checks.
#[derive(Clone)]
pub enum RuleKind {
    /// Present and not blank
    NotEmpty,
    /// A number or numeric string
    Numeric,
    Integer,
    /// `true`/`false`, `0`/`1` or their string forms
    Boolean,
    Email,
    AlphaNumeric,
    /// String length in characters, inclusive
    LengthBetween { min: usize, max: usize },
    /// Numeric value, inclusive
    InRange { min: Option<f64>, max: Option<f64> },
    InList(Vec<JsonValue>),
    Pattern(Regex),
    Custom(Check),
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::NotEmpty => f.write_str("NotEmpty"),
            RuleKind::Numeric => f.write_str("Numeric"),
            RuleKind::Integer => f.write_str("Integer"),
            RuleKind::Boolean => f.write_str("Boolean"),
            RuleKind::Email => f.write_str("Email"),
            RuleKind::AlphaNumeric => f.write_str("AlphaNumeric"),
            RuleKind::LengthBetween { min, max } => {
                f.debug_struct("LengthBetween").field("min", min).field("max", max).finish()
            }
            RuleKind::InRange { min, max } => {
                f.debug_struct("InRange").field("min", min).field("max", max).finish()
            }
            RuleKind::InList(list) => f.debug_tuple("InList").field(list).finish(),
            RuleKind::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            RuleKind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl RuleKind {
    fn default_message(&self) -> &'static str {
        match self {
            RuleKind::NotEmpty => "This field cannot be empty",
            RuleKind::Numeric => "This field must be numeric",
            RuleKind::Integer => "This field must be an integer",
            RuleKind::Boolean => "This field must be a boolean",
            RuleKind::Email => "This field must be an email address",
            RuleKind::AlphaNumeric => "This field must be alphanumeric",
            RuleKind::LengthBetween { .. } => "This field has an invalid length",
            RuleKind::InRange { .. } => "This field is out of range",
            RuleKind::InList(_) => "This field must be one of the allowed values",
            RuleKind::Pattern(_) => "This field has an invalid format",
            RuleKind::Custom(_) => "This field is invalid",
        }
    }

    /// Whether `value` passes, given the whole record.
    pub fn check(&self, value: &JsonValue, data: &Options) -> bool {
        match self {
            RuleKind::NotEmpty => !is_empty(value),
            RuleKind::Numeric => Numeric::of(value).is_some(),
            RuleKind::Integer => matches!(Numeric::of(value), Some(Numeric::Int(_))),
            RuleKind::Boolean => {
                value.is_boolean()
                    || matches!(as_text(value).as_deref(), Some("0" | "1" | "true" | "false"))
            }
            RuleKind::Email => value.as_str().map_or(false, |s| EMAIL.is_match(s)),
            RuleKind::AlphaNumeric => as_text(value)
                .map_or(false, |s| !s.is_empty() && s.chars().all(char::is_alphanumeric)),
            RuleKind::LengthBetween { min, max } => as_text(value).map_or(false, |s| {
                let len = s.chars().count();
                len >= *min && len <= *max
            }),
            RuleKind::InRange { min, max } => Numeric::of(value).map_or(false, |n| {
                let n = n.as_f64();
                min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m)
            }),
            RuleKind::InList(list) => list.iter().any(|allowed| {
                allowed == value || (as_text(allowed).is_some() && as_text(allowed) == as_text(value))
            }),
            RuleKind::Pattern(re) => as_text(value).map_or(false, |s| re.is_match(&s)),
            RuleKind::Custom(check) => check(value, data),
        }
    }
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => !is_truthy(value),
        _ => false,
    }
}

/// One rule on one field.
#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: RuleKind,
    pub message: String,
    /// Whether a missing field fails; `None` follows the check's default
    pub required: Option<bool>,
    /// Skip the rule when the value is empty
    pub skip_empty: bool,
    /// Events the rule applies to (`create`, `update`, ...); empty means all
    pub on: Vec<String>,
    /// Stop checking the field after this rule fails
    pub last: bool,
}

impl Rule {
    pub fn new(kind: RuleKind) -> Self {
        Self {
            message: kind.default_message().to_string(),
            kind,
            required: None,
            skip_empty: false,
            on: Vec::new(),
            last: false,
        }
    }

    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&JsonValue, &Options) -> bool + Send + Sync + 'static,
    {
        Self::new(RuleKind::Custom(Arc::new(check)))
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn skip_empty(mut self) -> Self {
        self.skip_empty = true;
        self
    }

    pub fn on(mut self, event: impl Into<String>) -> Self {
        self.on.push(event.into());
        self
    }

    pub fn last(mut self) -> Self {
        self.last = true;
        self
    }

    fn applies_to(&self, events: &[String]) -> bool {
        self.on.is_empty() || self.on.iter().any(|e| events.contains(e))
    }
}

impl From<RuleKind> for Rule {
    fn from(kind: RuleKind) -> Self {
        Rule::new(kind)
    }
}

/// Options for [`Validator::check`].
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Events of the current operation
    pub events: Vec<String>,
    /// Whether missing fields fail by default
    pub required: bool,
}

/// Validator collaborator: returns failed messages per field.
pub trait Validator: Send + Sync {
    fn check(&self, data: &Options, rules: &Rules, options: &CheckOptions) -> Errors;
}

/// Rule-by-rule validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl Validator for RuleValidator {
    fn check(&self, data: &Options, rules: &Rules, options: &CheckOptions) -> Errors {
        let mut errors = Errors::new();
        for (field, field_rules) in rules {
            for rule in field_rules.iter().filter(|r| r.applies_to(&options.events)) {
                let passed = match data.get(field) {
                    None => !rule.required.unwrap_or(options.required),
                    Some(value) if rule.skip_empty && is_empty(value) => true,
                    Some(value) => rule.kind.check(value, data),
                };
                if !passed {
                    errors.entry(field.clone()).or_default().push(rule.message.clone());
                    if rule.last {
                        break;
                    }
                }
            }
        }
        errors
    }
}
