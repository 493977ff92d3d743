//! Tagged value model for discovered resource data.
//!
//! Everything that flows out of a provider API call and into the template
//! resolver or condition evaluator is a [`Value`]: the explicit union of the
//! shapes cloud SDKs return. Using one tagged type keeps resolution and
//! comparison total functions - a missing field is `Null`, never a panic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically-shaped value: `Null`, scalar, list, or string-keyed map.
///
/// Maps use [`BTreeMap`] so key iteration (and therefore serialized output)
/// is deterministic across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Absence as the `exists` operator sees it: `Null`, `""`, and `[]`
    /// count as absent; everything else (including `{}` and `false`) exists.
    pub fn is_absent(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Map field lookup; `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// List element lookup; `None` for non-lists and out-of-range indices.
    pub fn index(&self, idx: usize) -> Option<&Value> {
        self.as_list().and_then(|items| items.get(idx))
    }

    /// Strict numeric view: only `Number` qualifies.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Lenient numeric view used by comparisons: a `Number`, or a string
    /// consisting solely of digits with an optional sign and at most one
    /// decimal point (`"42"`, `"-3.5"`). Booleans never coerce here.
    pub fn coerce_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) if is_numeric_literal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Equality with the documented numeric coercion: when both sides have a
    /// lenient numeric view they compare as numbers (`"5"` equals `5`);
    /// otherwise comparison is strict structural equality. `"true"` does not
    /// equal `true` - boolean literals coerce only at interpolation time.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self.coerce_number(), other.coerce_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// The string form used when a value is substituted into a larger
    /// template string: `Null` renders empty, integral numbers render without
    /// a trailing `.0`, and lists/maps render as JSON.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 9e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// `[+-]?digits[.digits]` - the only string shape that coerces to a number.
fn is_numeric_literal(s: &str) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    if body.is_empty() {
        return false;
    }
    let mut seen_point = false;
    let mut digits_before = 0usize;
    let mut digits_after = 0usize;
    for c in body.chars() {
        match c {
            '0'..='9' => {
                if seen_point {
                    digits_after += 1;
                } else {
                    digits_before += 1;
                }
            }
            '.' if !seen_point => seen_point = true,
            _ => return false,
        }
    }
    digits_before > 0 && (!seen_point || digits_after > 0)
}
