//! Capability interfaces for external systems.
//!
//! Two seams live here: the `Generator` used during compilation, and the
//! `Executor` capabilities the engine dispatches steps to. Both are
//! trait objects so tests can substitute deterministic fakes.

pub mod catalog;
pub mod command;
pub mod generation;
pub mod registry;
pub mod wait;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use catalog::{default_catalog, Catalog, ExecutorSpec};
pub use command::CommandExecutor;
pub use generation::{
    call_structured, GenerationError, GenerationRequest, Generator, HttpGenerator,
    StructuredCallConfig,
};
pub use registry::{ExecutorRegistry, UnsupportedKind};
pub use wait::WaitExecutor;

/// Executor-reported failure. Retryable per the step's policy; the
/// dispatch layer never interprets it.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("executor failed: {reason}")]
    Failed { reason: String },

    #[error("execution timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("failed to launch executor: {detail}")]
    Launch { detail: String },

    #[error("executor produced invalid output: {detail}")]
    InvalidOutput { detail: String },
}

/// External capability performing the actual action for one step kind
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Perform the resolved step.
    ///
    /// `attempt` is 1-indexed so an executor can vary its behavior on
    /// retries (e.g. try an alternate UI path). The returned value should
    /// be an object conforming to the step's declared output schema; the
    /// engine validates that, not the executor.
    async fn execute(
        &self,
        goal: &str,
        inputs: &BTreeMap<String, Value>,
        attempt: u32,
        timeout: Duration,
    ) -> Result<Value, ExecutionError>;
}

impl std::fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("name", &self.name()).finish()
    }
}
