//! Path and template expression resolution.
//!
//! Rule documents embed two expression shapes: bare dot-paths with optional
//! list indexing and flatten markers (`tags[0].key`, `buckets[].name`), and
//! `{{ expr }}` interpolation inside strings. Both are compiled once at rule
//! load time and resolved infallibly afterwards - a path that walks off the
//! data yields [`Value::Null`], never an error.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::value::Value;

/// Compile-time failure in a path or template expression.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("empty path expression")]
    Empty,

    #[error("empty segment in path expression '{0}'")]
    EmptySegment(String),

    #[error("invalid list index '{index}' in path expression '{expr}'")]
    BadIndex { expr: String, index: String },

    #[error("unterminated '[' in path expression '{0}'")]
    UnterminatedBracket(String),

    #[error("unexpected character '{ch}' in path expression '{expr}'")]
    UnexpectedChar { expr: String, ch: char },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    /// Map field access (`.name`).
    Field(String),
    /// List element access (`[2]`).
    Index(usize),
    /// List projection (`[]`): flattens one level of nested lists, then
    /// applies the remaining segments per element, dropping elements that
    /// resolve to `Null`.
    Flatten,
}

/// A compiled dot-path expression.
#[derive(Debug, Clone)]
pub struct PathExpr {
    raw: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    pub fn compile(src: &str) -> Result<Self, ExprError> {
        let trimmed = src.trim();
        let segments = parse_segments(trimmed)?;
        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// The source text the expression was compiled from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Walk the expression against `context`. Total: missing fields,
    /// out-of-range indices, and type mismatches all yield `Null`.
    pub fn resolve(&self, context: &Value) -> Value {
        resolve_segments(&self.segments, context)
    }
}

fn resolve_segments(segments: &[Segment], context: &Value) -> Value {
    let mut current = context.clone();
    // Once a `[]` has been walked, later segments map over the projected
    // list instead of descending into it.
    let mut projecting = false;
    for segment in segments {
        match segment {
            Segment::Field(name) => {
                current = if projecting {
                    let Value::List(items) = &current else {
                        return Value::Null;
                    };
                    Value::List(
                        items
                            .iter()
                            .filter_map(|item| item.get(name))
                            .filter(|v| !v.is_null())
                            .cloned()
                            .collect(),
                    )
                } else {
                    match current.get(name) {
                        Some(next) => next.clone(),
                        None => return Value::Null,
                    }
                };
            }
            Segment::Index(idx) => {
                current = if projecting {
                    let Value::List(items) = &current else {
                        return Value::Null;
                    };
                    Value::List(
                        items
                            .iter()
                            .filter_map(|item| item.index(*idx))
                            .filter(|v| !v.is_null())
                            .cloned()
                            .collect(),
                    )
                } else {
                    match current.index(*idx) {
                        Some(next) => next.clone(),
                        None => return Value::Null,
                    }
                };
            }
            Segment::Flatten => {
                let Value::List(items) = &current else {
                    return Value::Null;
                };
                let mut flat = Vec::new();
                for item in items {
                    match item {
                        Value::List(inner) => flat.extend(inner.iter().cloned()),
                        other => flat.push(other.clone()),
                    }
                }
                current = Value::List(flat);
                projecting = true;
            }
        }
    }
    current
}

fn parse_segments(src: &str) -> Result<Vec<Segment>, ExprError> {
    if src.is_empty() {
        return Err(ExprError::Empty);
    }

    let mut segments = Vec::new();
    let mut buf = String::new();
    let mut pending_dot = false;
    let mut chars = src.chars();

    let after_bracket =
        |segments: &[Segment]| matches!(segments.last(), Some(Segment::Index(_) | Segment::Flatten));

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !buf.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut buf)));
                } else if !after_bracket(&segments) {
                    return Err(ExprError::EmptySegment(src.to_string()));
                }
                pending_dot = true;
            }
            '[' => {
                if !buf.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut buf)));
                } else if !after_bracket(&segments) {
                    return Err(ExprError::EmptySegment(src.to_string()));
                }
                pending_dot = false;

                let mut idx = String::new();
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == ']' {
                        closed = true;
                        break;
                    }
                    idx.push(c2);
                }
                if !closed {
                    return Err(ExprError::UnterminatedBracket(src.to_string()));
                }
                let idx = idx.trim();
                if idx.is_empty() {
                    segments.push(Segment::Flatten);
                } else {
                    let parsed = idx.parse::<usize>().map_err(|_| ExprError::BadIndex {
                        expr: src.to_string(),
                        index: idx.to_string(),
                    })?;
                    segments.push(Segment::Index(parsed));
                }
            }
            ']' => {
                return Err(ExprError::UnexpectedChar {
                    expr: src.to_string(),
                    ch: c,
                })
            }
            c if c.is_whitespace() => {
                return Err(ExprError::UnexpectedChar {
                    expr: src.to_string(),
                    ch: c,
                })
            }
            _ => {
                buf.push(c);
                pending_dot = false;
            }
        }
    }

    if !buf.is_empty() {
        segments.push(Segment::Field(buf));
        pending_dot = false;
    }
    if pending_dot {
        return Err(ExprError::EmptySegment(src.to_string()));
    }
    if segments.is_empty() {
        return Err(ExprError::Empty);
    }
    Ok(segments)
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder regex"));

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Expr(PathExpr),
}

/// A compiled string template with `{{ expr }}` placeholders.
///
/// A string that is exactly one placeholder resolves to the expression's
/// native value. Anything else resolves each placeholder, substitutes its
/// rendered form, and returns a string - except that a final result of
/// `"true"`/`"false"` (case-insensitive) coerces to a boolean, which is the
/// only point in the engine where boolean literals coerce.
#[derive(Debug, Clone)]
pub struct Template {
    raw: String,
    parts: Vec<Part>,
}

impl Template {
    /// Whether `src` contains at least one `{{ expr }}` placeholder.
    pub fn has_placeholders(src: &str) -> bool {
        PLACEHOLDER.is_match(src)
    }

    pub fn compile(src: &str) -> Result<Self, ExprError> {
        let mut parts = Vec::new();
        let mut last = 0usize;
        for caps in PLACEHOLDER.captures_iter(src) {
            let whole = caps.get(0).expect("match group 0");
            if whole.start() > last {
                parts.push(Part::Literal(src[last..whole.start()].to_string()));
            }
            let expr = caps.get(1).expect("match group 1").as_str();
            parts.push(Part::Expr(PathExpr::compile(expr)?));
            last = whole.end();
        }
        if last < src.len() {
            parts.push(Part::Literal(src[last..].to_string()));
        }
        Ok(Self {
            raw: src.to_string(),
            parts,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn resolve(&self, context: &Value) -> Value {
        if let [Part::Expr(expr)] = self.parts.as_slice() {
            return expr.resolve(context);
        }
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&expr.resolve(context).render()),
            }
        }
        if out.eq_ignore_ascii_case("true") {
            Value::Bool(true)
        } else if out.eq_ignore_ascii_case("false") {
            Value::Bool(false)
        } else {
            Value::String(out)
        }
    }
}

/// A rule-document value with its embedded templates compiled in place.
///
/// `params:` blocks are arbitrary YAML trees; strings containing placeholders
/// become [`Template`]s, everything else stays literal.
#[derive(Debug, Clone)]
pub enum TemplateValue {
    Literal(Value),
    Template(Template),
    List(Vec<TemplateValue>),
    Map(BTreeMap<String, TemplateValue>),
}

impl TemplateValue {
    pub fn compile(raw: &Value) -> Result<Self, ExprError> {
        Ok(match raw {
            Value::String(s) if Template::has_placeholders(s) => {
                TemplateValue::Template(Template::compile(s)?)
            }
            Value::List(items) => TemplateValue::List(
                items.iter().map(Self::compile).collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => {
                let mut compiled = BTreeMap::new();
                for (key, value) in map {
                    compiled.insert(key.clone(), Self::compile(value)?);
                }
                TemplateValue::Map(compiled)
            }
            other => TemplateValue::Literal(other.clone()),
        })
    }

    pub fn resolve(&self, context: &Value) -> Value {
        match self {
            TemplateValue::Literal(value) => value.clone(),
            TemplateValue::Template(template) => template.resolve(context),
            TemplateValue::List(items) => {
                Value::List(items.iter().map(|item| item.resolve(context)).collect())
            }
            TemplateValue::Map(map) => {
                let mut resolved = BTreeMap::new();
                for (key, value) in map {
                    resolved.insert(key.clone(), value.resolve(context));
                }
                Value::Map(resolved)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx(yaml: &str) -> Value {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn dot_path_reaches_nested_fields() {
        let context = ctx("{a: {b: {c: 5}}}");
        let expr = PathExpr::compile("a.b.c").unwrap();
        assert_eq!(expr.resolve(&context), Value::Number(5.0));
    }

    #[test]
    fn missing_segment_yields_null_not_error() {
        let context = ctx("{a: {b: {c: 5}}}");
        let expr = PathExpr::compile("a.x.c").unwrap();
        assert_eq!(expr.resolve(&context), Value::Null);
    }

    #[test]
    fn index_and_out_of_range() {
        let context = ctx("{a: [{n: 1}, {n: 2}]}");
        assert_eq!(
            PathExpr::compile("a[1].n").unwrap().resolve(&context),
            Value::Number(2.0)
        );
        assert_eq!(
            PathExpr::compile("a[9].n").unwrap().resolve(&context),
            Value::Null
        );
    }

    #[test]
    fn flatten_projects_and_drops_nulls() {
        let context = ctx("{a: {b: [{c: 1}, {d: 9}, {c: 3}]}}");
        assert_eq!(
            PathExpr::compile("a.b[].c").unwrap().resolve(&context),
            Value::List(vec![Value::Number(1.0), Value::Number(3.0)])
        );
    }

    #[test]
    fn terminal_flatten_keeps_elements() {
        let context = ctx("{a: {b: [1, 2]}}");
        assert_eq!(
            PathExpr::compile("a.b[]").unwrap().resolve(&context),
            Value::List(vec![Value::Number(1.0), Value::Number(2.0)])
        );
        // Flatten over a non-list cannot project.
        assert_eq!(
            PathExpr::compile("a[].b").unwrap().resolve(&context),
            Value::Null
        );
    }

    #[test]
    fn chained_flatten_splices_nested_lists() {
        // EC2-shaped nesting: reservations each carry an instances list.
        let context = ctx(
            "{reservations: [{instances: [{id: i-1}, {id: i-2}]}, {instances: [{id: i-3}]}]}",
        );
        assert_eq!(
            PathExpr::compile("reservations[].instances[]")
                .unwrap()
                .resolve(&context),
            ctx("[{id: i-1}, {id: i-2}, {id: i-3}]")
        );
        assert_eq!(
            PathExpr::compile("reservations[].instances[].id")
                .unwrap()
                .resolve(&context),
            ctx("[i-1, i-2, i-3]")
        );
    }

    #[test]
    fn compile_rejects_malformed_paths() {
        assert!(PathExpr::compile("").is_err());
        assert!(PathExpr::compile("a..b").is_err());
        assert!(PathExpr::compile("a.").is_err());
        assert!(PathExpr::compile("a[x]").is_err());
        assert!(PathExpr::compile("a[1").is_err());
        assert!(PathExpr::compile("a]b").is_err());
        assert!(PathExpr::compile("a b").is_err());
    }

    #[test]
    fn whole_string_placeholder_returns_native_type() {
        let context = ctx("{flag: true, count: 3, names: [x, y]}");
        assert_eq!(
            Template::compile("{{ flag }}").unwrap().resolve(&context),
            Value::Bool(true)
        );
        assert_eq!(
            Template::compile("{{ count }}").unwrap().resolve(&context),
            Value::Number(3.0)
        );
        assert_eq!(
            Template::compile("{{ names }}").unwrap().resolve(&context),
            Value::List(vec![Value::from("x"), Value::from("y")])
        );
    }

    #[test]
    fn embedded_placeholders_substitute_into_string() {
        let context = ctx("{bucket: logs, region: eu-west-1}");
        let template = Template::compile("arn:aws:s3:::{{ bucket }}-{{ region }}").unwrap();
        assert_eq!(
            template.resolve(&context),
            Value::String("arn:aws:s3:::logs-eu-west-1".to_string())
        );
    }

    #[test]
    fn unresolved_placeholder_renders_empty() {
        let context = ctx("{bucket: logs}");
        let template = Template::compile("{{ bucket }}/{{ missing }}").unwrap();
        assert_eq!(template.resolve(&context), Value::String("logs/".to_string()));
    }

    #[test]
    fn interpolated_boolean_literal_coerces() {
        let context = ctx("{a: tr, b: ue}");
        let template = Template::compile("{{ a }}{{ b }}").unwrap();
        assert_eq!(template.resolve(&context), Value::Bool(true));
    }

    #[test]
    fn template_value_compiles_nested_params() {
        let raw = ctx("{bucket: '{{ parent.id }}', max_keys: 100, tags: ['{{ parent.env }}']}");
        let compiled = TemplateValue::compile(&raw).unwrap();
        let context = ctx("{parent: {id: b-1, env: prod}}");
        assert_eq!(
            compiled.resolve(&context),
            ctx("{bucket: b-1, max_keys: 100, tags: [prod]}")
        );
    }
}
