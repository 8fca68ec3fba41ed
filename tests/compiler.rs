//! Compiler Integration Tests
//!
//! Full compile pipeline over a scripted generator: segmentation,
//! alignment, synthesis, validation, and the repair retry path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use demoflow::adapters::{
    default_catalog, GenerationError, GenerationRequest, Generator, StructuredCallConfig,
};
use demoflow::compiler::{CompileError, CompileOptions, Compiler};
use demoflow::evidence::{DemoTrace, EventKind, RawEvent};

/// Generator scripted per schema name, with an optional number of bad
/// synthesis outputs before the good one
struct ScriptedGenerator {
    bad_workflows_first: u32,
    workflow_calls: AtomicU32,
}

impl ScriptedGenerator {
    fn new(bad_workflows_first: u32) -> Self {
        Self {
            bad_workflows_first,
            workflow_calls: AtomicU32::new(0),
        }
    }

    fn visual_response() -> Value {
        json!({"segments": [
            {"id": "v1", "t_start": 0.0, "t_end": 8.0,
             "summary": "search for pizza places", "key_timestamps": [2.0]},
            {"id": "v2", "t_start": 8.0, "t_end": 12.0,
             "summary": "wait for results to settle", "key_timestamps": []},
        ]})
    }

    fn aligned_response() -> Value {
        json!({"segments": [
            {"id": "a1", "t_start": 0.0, "t_end": 8.0, "surface": "WEB",
             "summary": "search for pizza places", "key_timestamps": [2.0],
             "merge_of": ["v1"]},
            {"id": "a2", "t_start": 8.0, "t_end": 12.0, "surface": "WAIT",
             "summary": "wait for results", "key_timestamps": [],
             "merge_of": ["v2"]},
        ]})
    }

    fn good_workflow() -> Value {
        json!({
            "name": "proposed-name",
            "created_at": "2026-01-10T12:00:00Z",
            "params": [{"name": "user_text", "type": "string"}],
            "steps": [
                {
                    "id": "search",
                    "kind": "WEB",
                    // Single braces on purpose: normalization must fix them
                    "goal": "search the web for { user_text }",
                    "inputs": {"task": "find {user_text} nearby"},
                    "output_schema": {"url": "string", "top_result": "string"},
                    "postconditions": [
                        {"kind": "url_contains_any", "field": "url", "values": ["results"]}
                    ],
                },
                {
                    "id": "settle",
                    "kind": "WAIT",
                    "goal": "let the page settle",
                    "inputs": {"seconds": "2"},
                    "output_schema": {"waited_seconds": "number"},
                    "postconditions": [],
                },
            ],
        })
    }

    fn bad_workflow() -> Value {
        // Forward reference: 'search' reads a later step's output
        json!({
            "name": "proposed-name",
            "created_at": "2026-01-10T12:00:00Z",
            "params": [{"name": "user_text", "type": "string"}],
            "steps": [
                {
                    "id": "search",
                    "kind": "WEB",
                    "goal": "open {{ steps.settle.waited_seconds }}",
                    "inputs": {},
                    "output_schema": {},
                    "postconditions": [],
                },
                {
                    "id": "settle",
                    "kind": "WAIT",
                    "goal": "wait",
                    "inputs": {},
                    "output_schema": {"waited_seconds": "number"},
                    "postconditions": [],
                },
            ],
        })
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _timeout: Duration,
    ) -> Result<Value, GenerationError> {
        match request.schema_name.as_str() {
            "VisualSegments" => Ok(Self::visual_response()),
            "AlignedSegments" => Ok(Self::aligned_response()),
            "Workflow" => {
                let call = self.workflow_calls.fetch_add(1, Ordering::SeqCst);
                if call < self.bad_workflows_first {
                    Ok(Self::bad_workflow())
                } else {
                    if call > 0 {
                        // Retries must carry repair context
                        assert!(request.payload.get("repair").is_some());
                    }
                    Ok(Self::good_workflow())
                }
            }
            other => Err(GenerationError::Malformed {
                detail: format!("unexpected schema: {}", other),
            }),
        }
    }
}

fn trace() -> DemoTrace {
    DemoTrace {
        name: "pizza-demo".to_string(),
        started_at: Utc::now(),
        screen_size: [1920, 1080],
        events: vec![
            RawEvent {
                t: 0.5,
                kind: EventKind::WindowTitle,
                data: json!({"title": "Safari"}),
            },
            RawEvent {
                t: 2.0,
                kind: EventKind::Text,
                data: json!({"text": "pizza near me"}),
            },
            RawEvent {
                t: 12.0,
                kind: EventKind::MouseClick,
                data: json!({"x": 100, "y": 200}),
            },
        ],
        media_path: None,
        transcript: None,
        transcript_file: None,
    }
}

fn call_config() -> StructuredCallConfig {
    StructuredCallConfig {
        retries: 2,
        timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn test_compile_produces_validated_workflow() {
    let generator = ScriptedGenerator::new(0);
    let compiler = Compiler::new(&generator, default_catalog(), call_config());

    let workflow = compiler
        .compile(&trace(), &CompileOptions::default())
        .await
        .unwrap();

    // Caller-fixed metadata wins over the proposed name
    assert_eq!(workflow.name, "pizza-demo");
    assert!(workflow.trace_sha256.is_some());
    assert!(workflow.params.iter().any(|p| p.name == "user_text"));

    assert_eq!(workflow.steps.len(), 2);
    let search = workflow.get_step("search").unwrap();
    // Single-brace placeholders were normalized before validation
    assert_eq!(search.goal.as_str(), "search the web for {{ user_text }}");
    assert_eq!(
        search.inputs["task"].as_str(),
        "find {{ user_text }} nearby"
    );

    // The compiled workflow passes its own structural validation
    workflow.validate().unwrap();
}

#[tokio::test]
async fn test_compile_name_override() {
    let generator = ScriptedGenerator::new(0);
    let compiler = Compiler::new(&generator, default_catalog(), call_config());

    let options = CompileOptions {
        workflow_name: Some("order-pizza".to_string()),
        annotation: Some("ordering a large pepperoni".to_string()),
    };
    let workflow = compiler.compile(&trace(), &options).await.unwrap();
    assert_eq!(workflow.name, "order-pizza");
}

#[tokio::test]
async fn test_invalid_synthesis_is_repaired() {
    let generator = ScriptedGenerator::new(1);
    let compiler = Compiler::new(&generator, default_catalog(), call_config());

    let workflow = compiler
        .compile(&trace(), &CompileOptions::default())
        .await
        .unwrap();

    assert_eq!(generator.workflow_calls.load(Ordering::SeqCst), 2);
    workflow.validate().unwrap();
}

#[tokio::test]
async fn test_synthesis_exhaustion_fails_compilation() {
    // More bad outputs than the configured retries allow
    let generator = ScriptedGenerator::new(10);
    let compiler = Compiler::new(&generator, default_catalog(), call_config());

    let err = compiler
        .compile(&trace(), &CompileOptions::default())
        .await
        .unwrap_err();

    match err {
        CompileError::Generation { stage, source } => {
            assert_eq!(stage, "synthesis");
            assert!(matches!(source, GenerationError::Exhausted { attempts: 3, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_trace_is_rejected() {
    let generator = ScriptedGenerator::new(0);
    let compiler = Compiler::new(&generator, default_catalog(), call_config());

    let empty = DemoTrace {
        events: Vec::new(),
        ..trace()
    };
    let err = compiler
        .compile(&empty, &CompileOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::EmptyTrace));
}
