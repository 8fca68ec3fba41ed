//! Workflow intermediate representation.
//!
//! A workflow is the persisted unit of reuse: declared parameters plus an
//! ordered list of typed steps. It is immutable once compiled and must
//! stay loadable and executable without the trace that produced it.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::binding::{BindingExpr, Reference};
use super::postcondition::Postcondition;

/// Primitive value types for parameters and output fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Path,
    Boolean,
}

impl ValueType {
    /// Default value used when an executor omits a declared field
    pub fn default_value(self) -> Value {
        match self {
            ValueType::String | ValueType::Path => Value::String(String::new()),
            ValueType::Number => Value::from(0.0),
            ValueType::Boolean => Value::Bool(false),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Path => "path",
            ValueType::Boolean => "boolean",
        }
    }

    /// Coerce a raw value into this type, if compatible
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ValueType::String | ValueType::Path, Value::String(_)) => Some(value.clone()),
            (ValueType::Number, Value::Number(_)) => Some(value.clone()),
            (ValueType::Number, Value::String(s)) => {
                s.trim().parse::<f64>().ok().map(Value::from)
            }
            (ValueType::Boolean, Value::Bool(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step kinds, each mapped to exactly one executor capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Web,
    Desktop,
    Wait,
    AppAction,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Web => "WEB",
            StepKind::Desktop => "DESKTOP",
            StepKind::Wait => "WAIT",
            StepKind::AppAction => "APP_ACTION",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared top-level workflow parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub value_type: ValueType,

    /// Applied when the caller supplies no value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Retry policy for failed step attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    300
}
fn default_max_delay() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay before the retry following `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if another attempt is allowed after `attempt` failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Debug-only provenance for how a step was inferred from the demo.
/// Serialized with the workflow, ignored by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepEvidence {
    /// Seconds from trace start
    pub t: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typed_text_nearby: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_nearby: Option<String>,
}

/// A single automation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the workflow, stable across recompiles when possible
    pub id: String,

    pub kind: StepKind,

    /// Intent/instructions for the executor; may carry placeholders
    pub goal: BindingExpr,

    /// Named parameters passed to the executor
    #[serde(default)]
    pub inputs: BTreeMap<String, BindingExpr>,

    /// Declared shape of this step's output record
    #[serde(default)]
    pub output_schema: BTreeMap<String, ValueType>,

    /// Rules checked after every execution attempt
    #[serde(default)]
    pub postconditions: Vec<Postcondition>,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Per-attempt timeout override (config default otherwise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<StepEvidence>,
}

impl Step {
    /// Effective per-attempt timeout
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Conform a raw executor output to this step's declared schema.
    ///
    /// Undeclared fields are dropped, declared-but-missing fields get type
    /// defaults, and a type-incompatible value is a mismatch. Callers treat
    /// a mismatch like an executor failure (usually a transient malformed
    /// response) and retry it.
    pub fn conform_output(&self, raw: &Value) -> Result<BTreeMap<String, Value>, OutputMismatch> {
        let raw = raw.as_object().ok_or_else(|| OutputMismatch {
            step_id: self.id.clone(),
            detail: format!("executor returned {}, expected an object", type_name(raw)),
        })?;

        let mut conformed = BTreeMap::new();
        for (field, value_type) in &self.output_schema {
            match raw.get(field) {
                None | Some(Value::Null) => {
                    conformed.insert(field.clone(), value_type.default_value());
                }
                Some(value) => {
                    let coerced = value_type.coerce(value).ok_or_else(|| OutputMismatch {
                        step_id: self.id.clone(),
                        detail: format!(
                            "field '{}' expected {:?}, got {}",
                            field,
                            value_type,
                            type_name(value)
                        ),
                    })?;
                    conformed.insert(field.clone(), coerced);
                }
            }
        }
        Ok(conformed)
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Executor output does not fit the step's declared schema
#[derive(Debug, Error)]
#[error("step '{step_id}': output schema mismatch: {detail}")]
pub struct OutputMismatch {
    pub step_id: String,
    pub detail: String,
}

/// A compiled, parameterized, re-executable workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,

    pub created_at: DateTime<Utc>,

    /// Content digest of the trace this workflow was compiled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_sha256: Option<String>,

    /// Declared top-level parameters
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    /// Ordered steps; execution is strictly sequential
    pub steps: Vec<Step>,
}

/// Structural validation failure in a workflow
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow name cannot be empty")]
    EmptyName,

    #[error("workflow must have at least one step")]
    NoSteps,

    #[error("step {index} has an empty id")]
    EmptyStepId { index: usize },

    #[error("duplicate step id '{id}'")]
    DuplicateStepId { id: String },

    #[error("duplicate parameter '{name}'")]
    DuplicateParam { name: String },

    #[error("step '{step_id}' references undeclared parameter '{name}'")]
    UndeclaredParam { step_id: String, name: String },

    #[error("step '{step_id}' references '{reference}' which does not precede it")]
    ForwardReference { step_id: String, reference: String },

    #[error("step '{step_id}' references unknown step '{referenced_step}'")]
    UnknownStep {
        step_id: String,
        referenced_step: String,
    },

    #[error(
        "step '{step_id}' references field '{field}' absent from step '{referenced_step}' output schema"
    )]
    UnknownField {
        step_id: String,
        referenced_step: String,
        field: String,
    },
}

impl Workflow {
    /// Load a workflow from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
        let workflow: Workflow =
            serde_json::from_str(&content).context("Failed to parse workflow JSON")?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Write the workflow as pretty JSON
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write workflow file: {}", path.display()))
    }

    /// Look up a step by id
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Enforce the structural invariants: unique ids, and every binding
    /// reference naming either a declared parameter or an output field of
    /// a strictly earlier step.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.name.is_empty() {
            return Err(WorkflowError::EmptyName);
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::NoSteps);
        }

        let mut param_names = HashSet::new();
        for param in &self.params {
            if !param_names.insert(param.name.as_str()) {
                return Err(WorkflowError::DuplicateParam {
                    name: param.name.clone(),
                });
            }
        }

        let mut seen: BTreeMap<&str, &Step> = BTreeMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.id.is_empty() {
                return Err(WorkflowError::EmptyStepId { index });
            }
            if seen.contains_key(step.id.as_str()) {
                return Err(WorkflowError::DuplicateStepId {
                    id: step.id.clone(),
                });
            }

            let exprs = std::iter::once(&step.goal).chain(step.inputs.values());
            for expr in exprs {
                for reference in expr.references() {
                    self.check_reference(step, reference, &seen, &param_names)?;
                }
            }

            seen.insert(&step.id, step);
        }

        Ok(())
    }

    fn check_reference(
        &self,
        step: &Step,
        reference: &Reference,
        preceding: &BTreeMap<&str, &Step>,
        params: &HashSet<&str>,
    ) -> Result<(), WorkflowError> {
        match reference {
            Reference::Param { name } => {
                if !params.contains(name.as_str()) {
                    return Err(WorkflowError::UndeclaredParam {
                        step_id: step.id.clone(),
                        name: name.clone(),
                    });
                }
            }
            Reference::StepField { step_id, field } => {
                let Some(producer) = preceding.get(step_id.as_str()) else {
                    // Self or forward references are rejected with the more
                    // specific error when the target exists later in order.
                    return if self.get_step(step_id).is_some() {
                        Err(WorkflowError::ForwardReference {
                            step_id: step.id.clone(),
                            reference: reference.to_string(),
                        })
                    } else {
                        Err(WorkflowError::UnknownStep {
                            step_id: step.id.clone(),
                            referenced_step: step_id.clone(),
                        })
                    };
                };
                if !producer.output_schema.contains_key(field) {
                    return Err(WorkflowError::UnknownField {
                        step_id: step.id.clone(),
                        referenced_step: step_id.clone(),
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, kind: StepKind, goal: &str) -> Step {
        Step {
            id: id.to_string(),
            kind,
            goal: BindingExpr::parse(goal).unwrap(),
            inputs: BTreeMap::new(),
            output_schema: BTreeMap::new(),
            postconditions: Vec::new(),
            retry_policy: RetryPolicy::default(),
            timeout_seconds: None,
            evidence: None,
        }
    }

    fn workflow(steps: Vec<Step>) -> Workflow {
        Workflow {
            name: "test".to_string(),
            created_at: Utc::now(),
            trace_sha256: None,
            params: vec![ParamSpec {
                name: "user_text".to_string(),
                value_type: ValueType::String,
                default: None,
            }],
            steps,
        }
    }

    #[test]
    fn test_valid_chain() {
        let mut a = step("a", StepKind::Web, "search {{ user_text }}");
        a.output_schema.insert("url".to_string(), ValueType::String);
        let mut b = step("b", StepKind::Web, "open {{ steps.a.url }}");
        b.inputs.insert(
            "task".to_string(),
            BindingExpr::parse("open {{ steps.a.url }}").unwrap(),
        );
        assert!(workflow(vec![a, b]).validate().is_ok());
    }

    #[test]
    fn test_forward_reference_rejected() {
        let a = step("a", StepKind::Web, "open {{ steps.b.url }}");
        let mut b = step("b", StepKind::Web, "later");
        b.output_schema.insert("url".to_string(), ValueType::String);
        let err = workflow(vec![a, b]).validate().unwrap_err();
        assert!(matches!(err, WorkflowError::ForwardReference { .. }));
    }

    #[test]
    fn test_missing_field_named_in_error() {
        let a = step("a", StepKind::Web, "search");
        let b = step("b", StepKind::Web, "use {{ steps.a.title }}");
        let err = workflow(vec![a, b]).validate().unwrap_err();
        match err {
            WorkflowError::UnknownField {
                step_id,
                referenced_step,
                field,
            } => {
                assert_eq!(step_id, "b");
                assert_eq!(referenced_step, "a");
                assert_eq!(field, "title");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let err = workflow(vec![
            step("a", StepKind::Wait, "wait"),
            step("a", StepKind::Wait, "wait again"),
        ])
        .validate()
        .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateStepId { .. }));
    }

    #[test]
    fn test_undeclared_param_rejected() {
        let err = workflow(vec![step("a", StepKind::Web, "use {{ missing }}")])
            .validate()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UndeclaredParam { .. }));
    }

    #[test]
    fn test_conform_output_fills_defaults_and_drops_extras() {
        let mut s = step("a", StepKind::Web, "go");
        s.output_schema.insert("url".to_string(), ValueType::String);
        s.output_schema
            .insert("rating".to_string(), ValueType::Number);

        let conformed = s
            .conform_output(&json!({"url": "https://x.com", "debug": "extra"}))
            .unwrap();
        assert_eq!(conformed.get("url"), Some(&json!("https://x.com")));
        assert_eq!(conformed.get("rating"), Some(&json!(0.0)));
        assert!(!conformed.contains_key("debug"));
    }

    #[test]
    fn test_conform_output_rejects_type_mismatch() {
        let mut s = step("a", StepKind::Web, "go");
        s.output_schema
            .insert("rating".to_string(), ValueType::Number);
        assert!(s.conform_output(&json!({"rating": "not a number at all"})).is_err());
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000)); // Capped
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }
}
