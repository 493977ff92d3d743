//! Condition evaluation.
//!
//! A check's condition tree is compiled once at catalog load (operator
//! names parsed, regexes built, paths compiled) and evaluated per item at
//! scan time. Evaluation is three-valued: a condition is satisfied,
//! violated, or errored - and an error is never collapsed into either of
//! the other two.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::template::{ExprError, PathExpr};
use super::value::Value;

/// Condition tree as written in a rule document. Composites nest
/// arbitrarily; a bare sequence is shorthand for `all`; anything that is
/// not an `all`/`any` wrapper or a sequence is a leaf.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCondition {
    All {
        all: Vec<RawCondition>,
    },
    Any {
        any: Vec<RawCondition>,
    },
    Leaf {
        var: String,
        operator: String,
        #[serde(default)]
        expected: Value,
    },
    Sequence(Vec<RawCondition>),
}

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid path '{expr}': {source}")]
    BadPath {
        expr: String,
        #[source]
        source: ExprError,
    },

    #[error("operator '{0}' requires an expected value")]
    MissingExpected(&'static str),

    #[error("operator '{operator}' requires {requirement}, got {got}")]
    ExpectedType {
        operator: &'static str,
        requirement: &'static str,
        got: &'static str,
    },

    #[error("invalid regex '{pattern}': {source}")]
    BadRegex {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    Exists,
    NotExists,
    Gt,
    Lt,
    Gte,
    Lte,
    Regex,
    NotRegex,
    AgeDays,
    NotExpired,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "exists" => Operator::Exists,
            "not_exists" => Operator::NotExists,
            "gt" => Operator::Gt,
            "lt" => Operator::Lt,
            "gte" => Operator::Gte,
            "lte" => Operator::Lte,
            "regex" => Operator::Regex,
            "not_regex" => Operator::NotRegex,
            "age_days" => Operator::AgeDays,
            "not_expired" => Operator::NotExpired,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Regex => "regex",
            Operator::NotRegex => "not_regex",
            Operator::AgeDays => "age_days",
            Operator::NotExpired => "not_expired",
        }
    }
}

/// A single `var operator expected` test.
#[derive(Debug, Clone)]
pub struct LeafCondition {
    pub var: PathExpr,
    pub operator: Operator,
    pub expected: Value,
    /// Present exactly when `operator` is `regex`/`not_regex`.
    regex: Option<Regex>,
}

#[derive(Debug, Clone)]
pub enum ConditionNode {
    All(Vec<ConditionNode>),
    Any(Vec<ConditionNode>),
    Leaf(LeafCondition),
}

/// Three-valued outcome of evaluating a condition against one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionResult {
    Satisfied,
    Violated,
    Error(String),
}

impl ConditionResult {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, ConditionResult::Satisfied)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConditionResult::Error(_))
    }

    /// Swap satisfied and violated; errors stay errors.
    fn invert(self) -> Self {
        match self {
            ConditionResult::Satisfied => ConditionResult::Violated,
            ConditionResult::Violated => ConditionResult::Satisfied,
            err => err,
        }
    }
}

fn decide(satisfied: bool) -> ConditionResult {
    if satisfied {
        ConditionResult::Satisfied
    } else {
        ConditionResult::Violated
    }
}

impl ConditionNode {
    /// Compile a raw condition tree, rejecting unknown operators, malformed
    /// paths, bad regexes, and expected values of the wrong shape. Nothing
    /// here is deferred to scan time.
    pub fn compile(raw: &RawCondition) -> Result<Self, ConditionError> {
        match raw {
            RawCondition::All { all } => Ok(ConditionNode::All(
                all.iter().map(Self::compile).collect::<Result<_, _>>()?,
            )),
            RawCondition::Any { any } => Ok(ConditionNode::Any(
                any.iter().map(Self::compile).collect::<Result<_, _>>()?,
            )),
            RawCondition::Sequence(children) => Ok(ConditionNode::All(
                children.iter().map(Self::compile).collect::<Result<_, _>>()?,
            )),
            RawCondition::Leaf {
                var,
                operator,
                expected,
            } => {
                let operator = Operator::parse(operator)
                    .ok_or_else(|| ConditionError::UnknownOperator(operator.clone()))?;
                let var = PathExpr::compile(var).map_err(|source| ConditionError::BadPath {
                    expr: var.clone(),
                    source,
                })?;
                let regex = validate_expected(operator, expected)?;
                Ok(ConditionNode::Leaf(LeafCondition {
                    var,
                    operator,
                    expected: expected.clone(),
                    regex,
                }))
            }
        }
    }

    /// Evaluate against `context` (conventionally `{ item: ... }`).
    ///
    /// `all` short-circuits on the first violated child and reports an
    /// errored child only when no sibling is definitively violated; with
    /// no children it is satisfied. `any` is the dual: first satisfied
    /// child wins, an error surfaces only when nothing satisfied, and no
    /// children means violated.
    pub fn evaluate(&self, context: &Value) -> ConditionResult {
        match self {
            ConditionNode::All(children) => {
                let mut first_error = None;
                for child in children {
                    match child.evaluate(context) {
                        ConditionResult::Satisfied => {}
                        violated @ ConditionResult::Violated => return violated,
                        error @ ConditionResult::Error(_) => {
                            if first_error.is_none() {
                                first_error = Some(error);
                            }
                        }
                    }
                }
                first_error.unwrap_or(ConditionResult::Satisfied)
            }
            ConditionNode::Any(children) => {
                let mut first_error = None;
                for child in children {
                    match child.evaluate(context) {
                        satisfied @ ConditionResult::Satisfied => return satisfied,
                        ConditionResult::Violated => {}
                        error @ ConditionResult::Error(_) => {
                            if first_error.is_none() {
                                first_error = Some(error);
                            }
                        }
                    }
                }
                first_error.unwrap_or(ConditionResult::Violated)
            }
            ConditionNode::Leaf(leaf) => evaluate_leaf(leaf, context),
        }
    }

    /// First leaf path in document order; reports record its resolved
    /// value as the evaluated value.
    pub fn primary_var(&self) -> Option<&PathExpr> {
        match self {
            ConditionNode::Leaf(leaf) => Some(&leaf.var),
            ConditionNode::All(children) | ConditionNode::Any(children) => {
                children.iter().find_map(ConditionNode::primary_var)
            }
        }
    }
}

fn validate_expected(
    operator: Operator,
    expected: &Value,
) -> Result<Option<Regex>, ConditionError> {
    match operator {
        Operator::Exists | Operator::NotExists | Operator::NotExpired => Ok(None),
        Operator::In | Operator::NotIn => match expected {
            Value::List(_) => Ok(None),
            other => Err(ConditionError::ExpectedType {
                operator: operator.name(),
                requirement: "a list",
                got: other.type_name(),
            }),
        },
        Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte | Operator::AgeDays => {
            if expected.coerce_number().is_some() {
                Ok(None)
            } else {
                Err(ConditionError::ExpectedType {
                    operator: operator.name(),
                    requirement: "a number",
                    got: expected.type_name(),
                })
            }
        }
        Operator::Regex | Operator::NotRegex => match expected {
            Value::String(pattern) => {
                let regex = Regex::new(pattern).map_err(|source| ConditionError::BadRegex {
                    pattern: pattern.clone(),
                    source: Box::new(source),
                })?;
                Ok(Some(regex))
            }
            other => Err(ConditionError::ExpectedType {
                operator: operator.name(),
                requirement: "a string pattern",
                got: other.type_name(),
            }),
        },
        Operator::Equals | Operator::NotEquals | Operator::Contains | Operator::NotContains => {
            if expected.is_null() {
                Err(ConditionError::MissingExpected(operator.name()))
            } else {
                Ok(None)
            }
        }
    }
}

fn evaluate_leaf(leaf: &LeafCondition, context: &Value) -> ConditionResult {
    let resolved = leaf.var.resolve(context);
    match leaf.operator {
        // Existence treats Null, "", and [] as absent and never errors.
        Operator::Exists => decide(!resolved.is_absent()),
        Operator::NotExists => decide(resolved.is_absent()),
        _ if resolved.is_null() => ConditionResult::Error(format!(
            "'{}' did not resolve against the discovered item",
            leaf.var.raw()
        )),
        Operator::Equals => decide(resolved.loosely_equals(&leaf.expected)),
        Operator::NotEquals => decide(resolved.loosely_equals(&leaf.expected)).invert(),
        Operator::Contains => contains(&leaf.var, &resolved, &leaf.expected),
        Operator::NotContains => contains(&leaf.var, &resolved, &leaf.expected).invert(),
        Operator::In => decide(membership(&resolved, &leaf.expected)),
        Operator::NotIn => decide(membership(&resolved, &leaf.expected)).invert(),
        Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
            numeric_compare(leaf, &resolved)
        }
        Operator::Regex => regex_match(leaf, &resolved),
        Operator::NotRegex => regex_match(leaf, &resolved).invert(),
        Operator::AgeDays => age_days(leaf, &resolved),
        Operator::NotExpired => match parse_timestamp(&resolved) {
            Some(ts) => decide(ts > Utc::now()),
            None => not_a_timestamp(leaf, &resolved),
        },
    }
}

fn contains(var: &PathExpr, resolved: &Value, expected: &Value) -> ConditionResult {
    match resolved {
        Value::String(s) => match expected {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                decide(s.contains(&expected.render()))
            }
            other => ConditionResult::Error(format!(
                "'contains' on the string at '{}' needs a scalar expected value, got {}",
                var.raw(),
                other.type_name()
            )),
        },
        Value::List(items) => decide(items.iter().any(|item| item.loosely_equals(expected))),
        Value::Map(map) => match expected.as_str() {
            Some(key) => decide(map.contains_key(key)),
            None => ConditionResult::Error(format!(
                "'contains' on the map at '{}' needs a string key, got {}",
                var.raw(),
                expected.type_name()
            )),
        },
        other => ConditionResult::Error(format!(
            "'contains' cannot be applied to the {} at '{}'",
            other.type_name(),
            var.raw()
        )),
    }
}

fn membership(resolved: &Value, expected: &Value) -> bool {
    match expected.as_list() {
        Some(candidates) => candidates
            .iter()
            .any(|candidate| resolved.loosely_equals(candidate)),
        // Unreachable after load-time validation.
        None => false,
    }
}

fn numeric_compare(leaf: &LeafCondition, resolved: &Value) -> ConditionResult {
    let Some(lhs) = resolved.coerce_number() else {
        return ConditionResult::Error(format!(
            "'{}' resolved to non-numeric {} '{}'",
            leaf.var.raw(),
            resolved.type_name(),
            resolved.render()
        ));
    };
    let Some(rhs) = leaf.expected.coerce_number() else {
        return ConditionResult::Error(format!(
            "'{}' compared against non-numeric expected value",
            leaf.operator.name()
        ));
    };
    decide(match leaf.operator {
        Operator::Gt => lhs > rhs,
        Operator::Lt => lhs < rhs,
        Operator::Gte => lhs >= rhs,
        Operator::Lte => lhs <= rhs,
        _ => unreachable!("numeric_compare called for comparison operators only"),
    })
}

fn regex_match(leaf: &LeafCondition, resolved: &Value) -> ConditionResult {
    let haystack = match resolved {
        Value::String(s) => s.clone(),
        Value::Number(_) | Value::Bool(_) => resolved.render(),
        other => {
            return ConditionResult::Error(format!(
                "'regex' needs a scalar at '{}', got {}",
                leaf.var.raw(),
                other.type_name()
            ))
        }
    };
    match &leaf.regex {
        Some(regex) => decide(regex.is_match(&haystack)),
        // Unreachable after load-time validation.
        None => ConditionResult::Error("regex pattern was not compiled".to_string()),
    }
}

/// Satisfied when the timestamp is at most `expected` days old. Future
/// timestamps have negative age and therefore satisfy any bound.
fn age_days(leaf: &LeafCondition, resolved: &Value) -> ConditionResult {
    let Some(ts) = parse_timestamp(resolved) else {
        return not_a_timestamp(leaf, resolved);
    };
    let Some(max_days) = leaf.expected.coerce_number() else {
        return ConditionResult::Error("'age_days' compared against non-numeric expected value".to_string());
    };
    let age = Utc::now().signed_duration_since(ts).num_days();
    decide((age as f64) <= max_days)
}

fn not_a_timestamp(leaf: &LeafCondition, resolved: &Value) -> ConditionResult {
    ConditionResult::Error(format!(
        "'{}' resolved to '{}', which is not an ISO-8601 timestamp",
        leaf.var.raw(),
        resolved.render()
    ))
}

/// Parse the timestamp shapes cloud APIs actually return: RFC 3339 with
/// offset, naive date-times (assumed UTC), and bare dates.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}
