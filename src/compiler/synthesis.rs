//! Workflow synthesis: aligned segments to a validated Workflow.
//!
//! The generation capability proposes the workflow JSON; everything
//! deterministic happens here: single-brace template normalization,
//! forcing the canonical `user_text` parameter, structural validation,
//! and the supported-kind check against the catalog. A validation
//! failure is fed back through the bounded repair loop.

use std::sync::OnceLock;

use chrono::Utc;
use regex::{Captures, Regex};
use serde_json::{json, Value};

use crate::adapters::{
    call_structured, Catalog, GenerationError, GenerationRequest, Generator, StructuredCallConfig,
};
use crate::domain::{ParamSpec, ValueType, Workflow};
use crate::evidence::TraceDigest;

use super::segmenter::AlignedSegment;

const SYSTEM_SYNTHESIZE: &str = "\
You are a workflow compiler.

You MUST output ONLY a JSON object that validates against the provided \
workflow schema.

You will be given (in the user message):
- executor_catalog_text: executor capabilities/constraints (source of truth \
for step kinds plus realistic inputs/outputs)
- aligned_segments: executor-sized segments of the demonstration
- trace_digest: evidence excerpts (window titles, typed text, transcript)
- workflow_name and created_at

CRITICAL INPUT BINDING RULE:
- The workflow MUST declare a top-level parameter named 'user_text' of type \
'string'. At runtime the engine supplies exactly one user text input.

CRITICAL TEMPLATE RULE:
- Placeholders MUST use double braces: {{ ... }}.
- Valid: {{ user_text }}, {{ steps.step_01.some_field }}
- Only these placeholder forms are allowed.

PLANNING RULES:
- Prefer fewer executor-aligned steps (typically 5-12 for a 3-minute demo).
- Combine adjacent micro-actions into one bounded executor task when feasible.
- Segments with surface AUTO must be given a concrete step kind.
- Postconditions must be checkable from step outputs; do not require checks \
on unobservable fields.
- Return JSON only (no markdown, no commentary, no extra top-level keys).";

fn workflow_schema() -> Value {
    let value_type = json!({"type": "string", "enum": ["string", "number", "path", "boolean"]});
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["name", "created_at", "params", "steps"],
        "properties": {
            "name": {"type": "string"},
            "created_at": {"type": "string"},
            "params": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "type"],
                    "properties": {
                        "name": {"type": "string"},
                        "type": value_type,
                        "default": {},
                    },
                },
            },
            "steps": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["id", "kind", "goal", "inputs", "output_schema", "postconditions"],
                    "properties": {
                        "id": {"type": "string"},
                        "kind": {"type": "string", "enum": ["WEB", "DESKTOP", "WAIT", "APP_ACTION"]},
                        "goal": {"type": "string"},
                        "inputs": {"type": "object", "additionalProperties": {"type": "string"}},
                        "output_schema": {"type": "object", "additionalProperties": value_type},
                        "postconditions": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["kind"],
                                "properties": {
                                    "kind": {"type": "string", "enum": ["nonempty", "url_contains_any", "rating_range"]},
                                    "field": {"type": "string"},
                                    "values": {"type": "array", "items": {"type": "string"}},
                                    "min": {"type": "number"},
                                    "max": {"type": "number"},
                                },
                            },
                        },
                        "timeout_seconds": {"type": "number"},
                    },
                },
            },
        },
    })
}

static SINGLE_BRACE: OnceLock<Regex> = OnceLock::new();

/// Rewrite single-brace placeholders to double braces, leaving existing
/// double-brace placeholders untouched. Deterministic cleanup for a
/// mistake generation services make often enough to be worth handling.
fn normalize_template(s: &str) -> String {
    let re = SINGLE_BRACE.get_or_init(|| {
        Regex::new(
            r"\{\{[^{}]*\}\}|\{\s*(user_text|steps\.[A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)+)\s*\}",
        )
        .expect("static regex")
    });
    re.replace_all(s, |caps: &Captures<'_>| match caps.get(1) {
        Some(inner) => format!("{{{{ {} }}}}", inner.as_str()),
        None => caps[0].to_string(),
    })
    .into_owned()
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_template(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Options fixed by the caller rather than proposed by generation
pub struct SynthesisContext<'a> {
    pub workflow_name: &'a str,
    pub trace_sha256: Option<String>,
    pub annotation: Option<&'a str>,
}

fn validate_workflow(
    raw: Value,
    catalog: &Catalog,
    ctx: &SynthesisContext<'_>,
) -> anyhow::Result<Workflow> {
    let normalized = normalize_value(raw);
    let mut workflow: Workflow = serde_json::from_value(normalized)?;

    // Caller-fixed metadata wins over whatever the generator proposed
    workflow.name = ctx.workflow_name.to_string();
    workflow.created_at = Utc::now();
    workflow.trace_sha256 = ctx.trace_sha256.clone();

    // The canonical runtime parameter is non-negotiable
    if !workflow.params.iter().any(|p| p.name == "user_text") {
        workflow.params.push(ParamSpec {
            name: "user_text".to_string(),
            value_type: ValueType::String,
            default: None,
        });
    }

    workflow.validate()?;

    for step in &workflow.steps {
        if !catalog.supports(step.kind) {
            anyhow::bail!(
                "step '{}' has kind {} with no executor capability in the catalog",
                step.id,
                step.kind
            );
        }
    }

    Ok(workflow)
}

/// Synthesize a validated workflow from aligned segments
pub async fn synthesize(
    generator: &dyn Generator,
    cfg: &StructuredCallConfig,
    aligned: &[AlignedSegment],
    catalog: &Catalog,
    digest: &TraceDigest,
    ctx: SynthesisContext<'_>,
) -> Result<Workflow, GenerationError> {
    let request = GenerationRequest {
        system: SYSTEM_SYNTHESIZE.to_string(),
        payload: json!({
            "workflow_name": ctx.workflow_name,
            "created_at": Utc::now(),
            "annotation": ctx.annotation,
            "executor_catalog_text": catalog.text(),
            "aligned_segments": aligned,
            "trace_digest": digest,
        }),
        schema_name: "Workflow".to_string(),
        schema: workflow_schema(),
    };

    call_structured(generator, cfg, &request, |raw| {
        validate_workflow(raw, catalog, &ctx)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::default_catalog;

    fn ctx() -> SynthesisContext<'static> {
        SynthesisContext {
            workflow_name: "demo",
            trace_sha256: Some("abc123".to_string()),
            annotation: None,
        }
    }

    fn raw_workflow(steps: Value) -> Value {
        json!({
            "name": "ignored",
            "created_at": "2026-01-01T00:00:00Z",
            "params": [{"name": "user_text", "type": "string"}],
            "steps": steps,
        })
    }

    #[test]
    fn test_normalize_single_braces() {
        assert_eq!(
            normalize_template("search { user_text } on {steps.a.url}"),
            "search {{ user_text }} on {{ steps.a.url }}"
        );
        // Already-correct templates stay put
        assert_eq!(
            normalize_template("{{ user_text }}"),
            "{{ user_text }}"
        );
        // Arbitrary braces that are not references stay put
        assert_eq!(normalize_template("json {x}"), "json {x}");
    }

    #[test]
    fn test_validate_accepts_and_stamps_metadata() {
        let raw = raw_workflow(json!([{
            "id": "step_01",
            "kind": "WAIT",
            "goal": "pause briefly",
            "inputs": {"seconds": "2"},
            "output_schema": {"waited_seconds": "number"},
            "postconditions": [],
        }]));
        let workflow = validate_workflow(raw, &default_catalog(), &ctx()).unwrap();
        assert_eq!(workflow.name, "demo");
        assert_eq!(workflow.trace_sha256.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_validate_rejects_forward_reference() {
        let raw = raw_workflow(json!([{
            "id": "step_01",
            "kind": "WEB",
            "goal": "open {{ steps.step_02.url }}",
            "inputs": {},
            "output_schema": {},
            "postconditions": [],
        }, {
            "id": "step_02",
            "kind": "WEB",
            "goal": "search",
            "inputs": {},
            "output_schema": {"url": "string"},
            "postconditions": [],
        }]));
        assert!(validate_workflow(raw, &default_catalog(), &ctx()).is_err());
    }

    #[test]
    fn test_validate_injects_user_text_param() {
        let raw = json!({
            "name": "x",
            "created_at": "2026-01-01T00:00:00Z",
            "params": [],
            "steps": [{
                "id": "step_01",
                "kind": "WAIT",
                "goal": "pause",
                "inputs": {},
                "output_schema": {},
                "postconditions": [],
            }],
        });
        let workflow = validate_workflow(raw, &default_catalog(), &ctx()).unwrap();
        assert!(workflow.params.iter().any(|p| p.name == "user_text"));
    }

    #[test]
    fn test_validate_rejects_unsupported_kind() {
        let raw = raw_workflow(json!([{
            "id": "step_01",
            "kind": "APP_ACTION",
            "goal": "save",
            "inputs": {},
            "output_schema": {},
            "postconditions": [],
        }]));
        let web_only = Catalog::new(
            default_catalog()
                .specs()
                .iter()
                .filter(|s| s.kind == crate::domain::StepKind::Web)
                .cloned()
                .collect(),
        );
        let err = validate_workflow(raw, &web_only, &ctx()).unwrap_err();
        assert!(err.to_string().contains("APP_ACTION"));
    }
}
