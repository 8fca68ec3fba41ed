//! Workflow orchestrator.
//!
//! Drives each step through its lifecycle: resolve bindings, dispatch to
//! the registered executor, conform the output, verify postconditions,
//! retry per policy, record. Steps run strictly in declaration order;
//! the first permanent failure halts the run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ExecutionError, ExecutorRegistry, UnsupportedKind};
use crate::domain::{
    postcondition, AttemptFailure, BindingExpr, ResolutionError, RunContext, RunResult, RunStatus,
    Step, StepRecord, StepStatus, Workflow,
};

use super::store::RunStore;

/// Cooperative cancellation flag, checked at step boundaries only.
/// External automation actions are generally not safely interruptible,
/// so a cancelled run finishes its in-flight step first.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fatal run errors: defects in the workflow, parameters, or environment.
/// Unlike executor failures these are never retried; the run aborts and
/// the error surfaces to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("required parameter '{name}' has neither a supplied value nor a default")]
    MissingParameter { name: String },

    #[error("parameter '{name}' rejects value {value}: expected {expected}")]
    ParameterType {
        name: String,
        value: Value,
        expected: &'static str,
    },

    #[error("step '{step_id}': {source}")]
    Resolution {
        step_id: String,
        #[source]
        source: ResolutionError,
    },

    #[error("step '{step_id}': {source}")]
    Dispatch {
        step_id: String,
        #[source]
        source: UnsupportedKind,
    },

    #[error("failed to persist run result: {0:#}")]
    Store(#[source] anyhow::Error),
}

/// What one execution attempt produced
enum AttemptOutcome {
    Success(BTreeMap<String, Value>),
    Failure(AttemptFailure),
}

/// Main workflow orchestrator
pub struct Orchestrator {
    registry: Arc<ExecutorRegistry>,
    store: Option<RunStore>,
    default_step_timeout: Duration,
}

impl Orchestrator {
    pub fn new(registry: Arc<ExecutorRegistry>, default_step_timeout: Duration) -> Self {
        Self {
            registry,
            store: None,
            default_step_timeout,
        }
    }

    /// Persist run results through the given store when runs end
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Execute a workflow with the given parameter values.
    ///
    /// Returns the run result for any run that got to execute steps,
    /// including failed and cancelled ones; only pre-flight and defect
    /// errors surface as `Err`.
    #[instrument(skip(self, workflow, supplied, cancel), fields(workflow = %workflow.name))]
    pub async fn run(
        &self,
        workflow: &Workflow,
        supplied: BTreeMap<String, Value>,
        cancel: &CancelFlag,
    ) -> Result<RunResult, EngineError> {
        let params = bind_params(workflow, supplied)?;
        let mut result = RunResult::new(workflow.name.clone(), params.clone());
        let mut ctx = RunContext::new(params);

        info!(run_id = %result.id, steps = workflow.steps.len(), "Starting run");

        for step in &workflow.steps {
            if cancel.is_cancelled() {
                info!(run_id = %result.id, step = %step.id, "Run cancelled before step");
                result.status = RunStatus::Cancelled;
                break;
            }

            let record = self.run_step(step, &mut ctx, &result.id.to_string()).await?;
            let failed = record.status == StepStatus::FailedPermanently;
            let step_id = record.step_id.clone();
            let last_error = record
                .failures
                .last()
                .map(describe_failure)
                .unwrap_or_else(|| "unknown failure".to_string());
            result.steps.push(record);

            if failed {
                error!(run_id = %result.id, step = %step_id, error = %last_error, "Run halted");
                result.status = RunStatus::Failed {
                    step_id,
                    error: last_error,
                };
                break;
            }
        }

        result.completed_at = Some(Utc::now());

        if result.is_succeeded() {
            info!(run_id = %result.id, "Run completed successfully");
        }

        if let Some(store) = &self.store {
            store.save(&result).await.map_err(EngineError::Store)?;
        }

        Ok(result)
    }

    /// Drive one step to Succeeded or FailedPermanently
    async fn run_step(
        &self,
        step: &Step,
        ctx: &mut RunContext,
        run_id: &str,
    ) -> Result<StepRecord, EngineError> {
        // Dispatch is checked at execution time as well as compile time:
        // the executing environment may lack a capability the compiling
        // one had.
        let executor = self
            .registry
            .get(step.kind)
            .map_err(|source| EngineError::Dispatch {
                step_id: step.id.clone(),
                source,
            })?;

        let timeout = step.timeout(self.default_step_timeout);
        let step_start = Instant::now();

        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            // Resolving: a missing reference is a workflow defect, fatal
            // to the whole run
            let resolved_goal = resolve_to_text(&step.goal, ctx, &step.id)?;
            let mut resolved_inputs = BTreeMap::new();
            for (name, expr) in &step.inputs {
                let value = expr
                    .resolve(ctx)
                    .map_err(|source| EngineError::Resolution {
                        step_id: step.id.clone(),
                        source,
                    })?;
                resolved_inputs.insert(name.clone(), value);
            }

            debug!(run_id, step = %step.id, attempt, "Dispatching step");

            let outcome = self
                .attempt_step(step, executor.as_ref(), &resolved_goal, &resolved_inputs, attempt, timeout)
                .await;

            match outcome {
                AttemptOutcome::Success(output) => {
                    info!(
                        run_id,
                        step = %step.id,
                        attempt,
                        duration_ms = step_start.elapsed().as_millis() as u64,
                        "Step succeeded"
                    );
                    ctx.record_step(step.id.clone(), output.clone());
                    return Ok(StepRecord {
                        step_id: step.id.clone(),
                        kind: step.kind,
                        attempts: attempt,
                        resolved_goal,
                        resolved_inputs,
                        output: Some(output),
                        failures,
                        status: StepStatus::Succeeded,
                        duration_ms: step_start.elapsed().as_millis() as u64,
                    });
                }
                AttemptOutcome::Failure(failure) => {
                    let description = describe_failure(&failure);
                    failures.push(failure);

                    if step.retry_policy.should_retry(attempt) {
                        let delay = step.retry_policy.delay_for_attempt(attempt);
                        warn!(
                            run_id,
                            step = %step.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %description,
                            "Step failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!(
                        run_id,
                        step = %step.id,
                        attempt,
                        error = %description,
                        "Step failed permanently"
                    );
                    return Ok(StepRecord {
                        step_id: step.id.clone(),
                        kind: step.kind,
                        attempts: attempt,
                        resolved_goal,
                        resolved_inputs,
                        output: None,
                        failures,
                        status: StepStatus::FailedPermanently,
                        duration_ms: step_start.elapsed().as_millis() as u64,
                    });
                }
            }
        }
    }

    /// One attempt: dispatch, conform output, verify postconditions
    async fn attempt_step(
        &self,
        step: &Step,
        executor: &dyn crate::adapters::Executor,
        goal: &str,
        inputs: &BTreeMap<String, Value>,
        attempt: u32,
        timeout: Duration,
    ) -> AttemptOutcome {
        let execution = tokio::time::timeout(
            timeout,
            executor.execute(goal, inputs, attempt, timeout),
        )
        .await
        .unwrap_or(Err(ExecutionError::Timeout { timeout }));

        let raw = match execution {
            Ok(raw) => raw,
            Err(e) => {
                return AttemptOutcome::Failure(AttemptFailure {
                    attempt,
                    error: Some(e.to_string()),
                    verification_failures: Vec::new(),
                });
            }
        };

        // A structural mismatch most often means a transient malformed
        // executor response, so it is retried like an execution error
        let output = match step.conform_output(&raw) {
            Ok(output) => output,
            Err(e) => {
                return AttemptOutcome::Failure(AttemptFailure {
                    attempt,
                    error: Some(e.to_string()),
                    verification_failures: Vec::new(),
                });
            }
        };

        let verification = postcondition::verify(&output, &step.postconditions);
        if !verification.passed {
            return AttemptOutcome::Failure(AttemptFailure {
                attempt,
                error: None,
                verification_failures: verification.failures,
            });
        }

        AttemptOutcome::Success(output)
    }
}

/// Bind supplied parameter values against the workflow's declarations,
/// applying defaults and checking types. Undeclared extras are ignored.
pub fn bind_params(
    workflow: &Workflow,
    supplied: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>, EngineError> {
    let mut bound = BTreeMap::new();

    for param in &workflow.params {
        let value = supplied
            .get(&param.name)
            .cloned()
            .or_else(|| param.default.clone())
            .ok_or_else(|| EngineError::MissingParameter {
                name: param.name.clone(),
            })?;

        let coerced =
            param
                .value_type
                .coerce(&value)
                .ok_or_else(|| EngineError::ParameterType {
                    name: param.name.clone(),
                    value: value.clone(),
                    expected: param.value_type.as_str(),
                })?;

        bound.insert(param.name.clone(), coerced);
    }

    Ok(bound)
}

fn resolve_to_text(
    expr: &BindingExpr,
    ctx: &RunContext,
    step_id: &str,
) -> Result<String, EngineError> {
    let value = expr.resolve(ctx).map_err(|source| EngineError::Resolution {
        step_id: step_id.to_string(),
        source,
    })?;
    Ok(match value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn describe_failure(failure: &AttemptFailure) -> String {
    if let Some(error) = &failure.error {
        return error.clone();
    }
    let details: Vec<String> = failure
        .verification_failures
        .iter()
        .map(|f| format!("{}({}): {}", f.rule, f.field, f.reason))
        .collect();
    format!("postconditions failed: {}", details.join("; "))
}
