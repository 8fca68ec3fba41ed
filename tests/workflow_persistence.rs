//! Workflow Persistence Integration Tests
//!
//! A compiled workflow is the persisted unit of reuse: it must survive a
//! save/load cycle unchanged and execute identically after reload.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use demoflow::adapters::{ExecutionError, Executor, ExecutorRegistry};
use demoflow::core::{CancelFlag, Orchestrator};
use demoflow::domain::{RetryPolicy, StepKind, Workflow};

const WORKFLOW_JSON: &str = r#"{
  "name": "find-pizza",
  "created_at": "2026-01-10T12:00:00Z",
  "trace_sha256": "0f3a",
  "params": [
    {"name": "user_text", "type": "string"},
    {"name": "max_results", "type": "number", "default": 5}
  ],
  "steps": [
    {
      "id": "search",
      "kind": "WEB",
      "goal": "search for {{ user_text }}",
      "inputs": {"task": "find the top {{ max_results }} places"},
      "output_schema": {"url": "string", "top_result": "string"},
      "postconditions": [
        {"kind": "url_contains_any", "field": "url", "values": ["results", "search"]},
        {"kind": "nonempty", "field": "top_result"}
      ],
      "retry_policy": {
        "max_attempts": 2,
        "initial_delay_ms": 1,
        "max_delay_ms": 5,
        "backoff_multiplier": 2.0
      },
      "timeout_seconds": 30
    },
    {
      "id": "open",
      "kind": "WEB",
      "goal": "open {{ steps.search.url }}",
      "inputs": {},
      "output_schema": {"title": "string"},
      "postconditions": []
    }
  ]
}"#;

struct CannedExecutor;

#[async_trait]
impl Executor for CannedExecutor {
    fn name(&self) -> &str {
        "canned"
    }

    async fn execute(
        &self,
        goal: &str,
        _inputs: &BTreeMap<String, Value>,
        _attempt: u32,
        _timeout: Duration,
    ) -> Result<Value, ExecutionError> {
        if goal.starts_with("search") {
            Ok(json!({
                "url": "https://maps.example/results?q=pizza",
                "top_result": "Pizzeria Uno",
            }))
        } else {
            Ok(json!({"title": "Pizzeria Uno - Maps"}))
        }
    }
}

#[test]
fn test_workflow_survives_save_load_unchanged() {
    let workflow: Workflow = serde_json::from_str(WORKFLOW_JSON).unwrap();
    workflow.validate().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("find-pizza.workflow.json");
    workflow.to_file(&path).unwrap();
    let reloaded = Workflow::from_file(&path).unwrap();

    assert_eq!(
        serde_json::to_value(&workflow).unwrap(),
        serde_json::to_value(&reloaded).unwrap()
    );
}

#[test]
fn test_defaults_fill_omitted_retry_policy() {
    let workflow: Workflow = serde_json::from_str(WORKFLOW_JSON).unwrap();

    // 'open' declares no retry_policy, so it gets the defaults
    let open = workflow.get_step("open").unwrap();
    assert_eq!(open.retry_policy, RetryPolicy::default());
    assert_eq!(open.timeout_seconds, None);

    // 'search' keeps its explicit settings
    let search = workflow.get_step("search").unwrap();
    assert_eq!(search.retry_policy.max_attempts, 2);
    assert_eq!(search.timeout(Duration::from_secs(90)), Duration::from_secs(30));
    assert_eq!(open.timeout(Duration::from_secs(90)), Duration::from_secs(90));
}

#[test]
fn test_invalid_workflow_file_is_rejected_on_load() {
    // Remove 'search' from the steps so 'open' forward-references nothing
    let mut raw: Value = serde_json::from_str(WORKFLOW_JSON).unwrap();
    let steps = raw["steps"].as_array_mut().unwrap();
    steps.remove(0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.workflow.json");
    std::fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

    let err = Workflow::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("search"));
}

#[tokio::test]
async fn test_reloaded_workflow_executes_identically() {
    let original: Workflow = serde_json::from_str(WORKFLOW_JSON).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("find-pizza.workflow.json");
    original.to_file(&path).unwrap();
    let reloaded = Workflow::from_file(&path).unwrap();

    let params: BTreeMap<String, Value> =
        [("user_text".to_string(), json!("pizza near me"))]
            .into_iter()
            .collect();

    let mut results = Vec::new();
    for workflow in [&original, &reloaded] {
        let registry =
            ExecutorRegistry::new().register(StepKind::Web, Arc::new(CannedExecutor));
        let orchestrator = Orchestrator::new(Arc::new(registry), Duration::from_secs(5));
        let result = orchestrator
            .run(workflow, params.clone(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(result.is_succeeded());
        results.push(result);
    }

    let [first, second] = &results[..] else {
        unreachable!()
    };

    // Defaults were applied identically
    assert_eq!(first.params["max_results"], json!(5));
    assert_eq!(first.params, second.params);

    // Same resolved goals and outputs both times
    for (a, b) in first.steps.iter().zip(&second.steps) {
        assert_eq!(a.resolved_goal, b.resolved_goal);
        assert_eq!(a.resolved_inputs, b.resolved_inputs);
        assert_eq!(a.output, b.output);
    }
    assert_eq!(
        first.step_record("open").unwrap().resolved_goal,
        "open https://maps.example/results?q=pizza"
    );
    assert_eq!(
        first.step_record("search").unwrap().resolved_inputs["task"],
        json!("find the top 5 places")
    );
}
