//! Binding expressions: placeholder-bearing templates resolved at run time.
//!
//! An expression like `"Search for {{ user_text }}"` is parsed into literal
//! and reference segments when a workflow is loaded, so reference checking
//! can happen at compile time rather than mid-run. Resolution is a pure
//! function of the expression and the run context.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::run::RunContext;

/// A reference inside a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A declared workflow parameter, e.g. `{{ user_text }}`
    Param { name: String },

    /// An output field of a prior step, e.g. `{{ steps.step_01.url }}`
    StepField { step_id: String, field: String },
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Param { name } => write!(f, "{}", name),
            Reference::StepField { step_id, field } => {
                write!(f, "steps.{}.{}", step_id, field)
            }
        }
    }
}

/// One parsed segment of a template.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Ref(Reference),
}

/// A parsed binding expression.
///
/// Serializes to and from its raw template string, so the wire format of
/// a workflow stays plain JSON strings with `{{ ... }}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BindingExpr {
    raw: String,
    segments: Vec<Segment>,
}

/// Error parsing a template string
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unclosed placeholder starting at byte {offset} in '{raw}'")]
    Unclosed { raw: String, offset: usize },

    #[error("empty placeholder in '{raw}'")]
    Empty { raw: String },

    #[error("malformed reference '{reference}' in '{raw}'")]
    BadReference { raw: String, reference: String },
}

/// Error resolving an expression against a run context.
///
/// A missing reference indicates a defect in the compiled workflow (or
/// out-of-order execution), never a transient condition, so callers must
/// not retry it.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unresolvable reference '{reference}'")]
    MissingReference { reference: String },
}

fn valid_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_reference(raw: &str, inner: &str) -> Result<Reference, ParseError> {
    let bad = || ParseError::BadReference {
        raw: raw.to_string(),
        reference: inner.to_string(),
    };

    if let Some(rest) = inner.strip_prefix("steps.") {
        let mut parts = rest.splitn(2, '.');
        let step_id = parts.next().unwrap_or_default();
        let field = parts.next().ok_or_else(bad)?;
        if !valid_ident(step_id) || !valid_ident(field) {
            return Err(bad());
        }
        return Ok(Reference::StepField {
            step_id: step_id.to_string(),
            field: field.to_string(),
        });
    }

    if !valid_ident(inner) {
        return Err(bad());
    }
    Ok(Reference::Param {
        name: inner.to_string(),
    })
}

impl BindingExpr {
    /// Parse a raw template string
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let mut segments = Vec::new();
        let mut rest = raw;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| ParseError::Unclosed {
                raw: raw.to_string(),
                offset: offset + start,
            })?;

            let inner = after[..end].trim();
            if inner.is_empty() {
                return Err(ParseError::Empty {
                    raw: raw.to_string(),
                });
            }
            segments.push(Segment::Ref(parse_reference(raw, inner)?));

            offset += start + 2 + end + 2;
            rest = &after[end + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Build a literal expression with no placeholders
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            segments: if text.is_empty() {
                Vec::new()
            } else {
                vec![Segment::Literal(text.clone())]
            },
            raw: text,
        }
    }

    /// The raw template string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// All references this expression contains, in order of appearance
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Ref(r) => Some(r),
            Segment::Literal(_) => None,
        })
    }

    /// Resolve against a run context.
    ///
    /// An expression that is exactly one placeholder yields the referenced
    /// value with its original type; anything else renders to a string.
    pub fn resolve(&self, ctx: &RunContext) -> Result<Value, ResolutionError> {
        if let [Segment::Ref(r)] = self.segments.as_slice() {
            return lookup(r, ctx).cloned();
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Ref(r) => out.push_str(&render(lookup(r, ctx)?)),
            }
        }
        Ok(Value::String(out))
    }
}

fn lookup<'a>(r: &Reference, ctx: &'a RunContext) -> Result<&'a Value, ResolutionError> {
    let missing = || ResolutionError::MissingReference {
        reference: r.to_string(),
    };
    match r {
        Reference::Param { name } => ctx.params.get(name).ok_or_else(missing),
        Reference::StepField { step_id, field } => ctx
            .steps
            .get(step_id)
            .and_then(|outputs| outputs.get(field))
            .ok_or_else(missing),
    }
}

/// Render a value for string splicing (strings stay unquoted)
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

impl TryFrom<String> for BindingExpr {
    type Error = ParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<BindingExpr> for String {
    fn from(expr: BindingExpr) -> Self {
        expr.raw
    }
}

impl fmt::Display for BindingExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(params: &[(&str, Value)]) -> RunContext {
        let mut ctx = RunContext::default();
        for (k, v) in params {
            ctx.params.insert(k.to_string(), v.clone());
        }
        ctx
    }

    #[test]
    fn test_parse_references() {
        let expr = BindingExpr::parse("go to {{ steps.step_01.url }} for {{ user_text }}").unwrap();
        let refs: Vec<String> = expr.references().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["steps.step_01.url", "user_text"]);
    }

    #[test]
    fn test_parse_rejects_unclosed() {
        assert!(BindingExpr::parse("hello {{ user_text").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed_path() {
        assert!(BindingExpr::parse("{{ steps.only_id }}").is_err());
        assert!(BindingExpr::parse("{{ bad name }}").is_err());
    }

    #[test]
    fn test_single_placeholder_keeps_type() {
        let ctx = ctx_with(&[("count", Value::from(3.5))]);
        let expr = BindingExpr::parse("{{ count }}").unwrap();
        assert_eq!(expr.resolve(&ctx).unwrap(), Value::from(3.5));
    }

    #[test]
    fn test_mixed_template_renders_string() {
        let ctx = ctx_with(&[("user_text", Value::from("pizza"))]);
        let expr = BindingExpr::parse("search for {{ user_text }} now").unwrap();
        assert_eq!(
            expr.resolve(&ctx).unwrap(),
            Value::from("search for pizza now")
        );
    }

    #[test]
    fn test_missing_reference() {
        let ctx = RunContext::default();
        let expr = BindingExpr::parse("{{ user_text }}").unwrap();
        let err = expr.resolve(&ctx).unwrap_err();
        assert!(err.to_string().contains("user_text"));
    }

    #[test]
    fn test_roundtrip_through_serde() {
        let raw = "\"fetch {{ steps.a.url }}\"";
        let expr: BindingExpr = serde_json::from_str(raw).unwrap();
        assert_eq!(serde_json::to_string(&expr).unwrap(), raw);
    }
}
