//! Workflow intermediate representation.
//!
//! This module contains the core data structures:
//! - `Workflow` / `Step`: the compiled, parameterized step graph
//! - `BindingExpr`: placeholder templates resolved against a run context
//! - `Postcondition`: deterministic rules gating step success
//! - `RunContext` / `RunResult`: per-execution state and record

pub mod binding;
pub mod postcondition;
pub mod run;
pub mod workflow;

pub use binding::{BindingExpr, Reference, ResolutionError};
pub use postcondition::{verify, FailureDetail, Postcondition, VerificationResult};
pub use run::{AttemptFailure, RunContext, RunResult, RunStatus, StepRecord, StepStatus};
pub use workflow::{
    OutputMismatch, ParamSpec, RetryPolicy, Step, StepEvidence, StepKind, ValueType, Workflow,
    WorkflowError,
};
