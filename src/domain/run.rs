//! Run records: the context accumulated during one execution and the
//! persisted result produced when it ends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::postcondition::FailureDetail;
use super::workflow::StepKind;

/// Accumulated parameter values and prior step outputs for one run.
///
/// Owned exclusively by the orchestrator for the lifetime of a run and
/// never shared across concurrent runs. Entries are only ever appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// Bound parameter values
    pub params: BTreeMap<String, Value>,

    /// Conformed output record per completed step
    pub steps: BTreeMap<String, BTreeMap<String, Value>>,
}

impl RunContext {
    pub fn new(params: BTreeMap<String, Value>) -> Self {
        Self {
            params,
            steps: BTreeMap::new(),
        }
    }

    /// Record a completed step's output
    pub fn record_step(&mut self, step_id: impl Into<String>, output: BTreeMap<String, Value>) {
        self.steps.insert(step_id.into(), output);
    }
}

/// Final status of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    FailedPermanently,
}

/// Failures observed during one attempt, kept for auditing even when a
/// later attempt succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub attempt: u32,

    /// Executor/timeout/schema error, if that is what failed the attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Postcondition failures, if verification is what failed the attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_failures: Vec<FailureDetail>,
}

/// Per-step execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,

    pub kind: StepKind,

    /// Attempts actually made
    pub attempts: u32,

    /// Resolved goal from the last attempt
    pub resolved_goal: String,

    /// Resolved inputs from the last attempt
    pub resolved_inputs: BTreeMap<String, Value>,

    /// Conformed output (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<BTreeMap<String, Value>>,

    /// Full failure history across attempts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<AttemptFailure>,

    pub status: StepStatus,

    pub duration_ms: u64,
}

/// Overall status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Every step reached Succeeded
    Succeeded,

    /// Halted at `step_id` after exhausting its retry policy
    Failed { step_id: String, error: String },

    /// Cooperatively cancelled between steps
    Cancelled,
}

/// Persisted record of one workflow execution. Created once per run,
/// never mutated after the run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub id: Uuid,

    pub workflow_name: String,

    /// Parameter values the run was bound with (defaults applied)
    pub params: BTreeMap<String, Value>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// One record per step that was started, in execution order
    pub steps: Vec<StepRecord>,

    pub status: RunStatus,
}

impl RunResult {
    pub fn new(workflow_name: impl Into<String>, params: BTreeMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow_name.into(),
            params,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            status: RunStatus::Succeeded,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Record of a specific step, if it was started
    pub fn step_record(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step_id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_append() {
        let mut ctx = RunContext::default();
        ctx.params.insert("user_text".to_string(), json!("pizza"));
        ctx.record_step(
            "a",
            [("url".to_string(), json!("https://x.com"))]
                .into_iter()
                .collect(),
        );
        assert_eq!(ctx.steps["a"]["url"], json!("https://x.com"));
    }

    #[test]
    fn test_run_status_serialization() {
        let status = RunStatus::Failed {
            step_id: "search".to_string(),
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["step_id"], "search");
    }
}
