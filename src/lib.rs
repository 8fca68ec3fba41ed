//! demoflow - Workflow compiler and execution engine for recorded
//! demonstrations.
//!
//! A recorded demonstration (screen events, typed text, narration) is
//! compiled into a parameterized workflow: an ordered list of typed
//! steps with binding expressions, output schemas, and postconditions.
//! The workflow is then replayable with fresh parameter values, without
//! the trace that produced it.
//!
//! # Architecture
//!
//! Compilation happens in phases behind a single generation seam:
//! visual segmentation, executor alignment, workflow synthesis. Every
//! generated artifact passes deterministic validation before it is
//! accepted; no partial workflow ever escapes the compiler.
//!
//! Execution is a step lifecycle machine: resolve bindings, dispatch to
//! the registered executor, conform the output against the declared
//! schema, verify postconditions, retry per policy. The first permanent
//! failure halts the run; every run produces a persisted result.
//!
//! # Modules
//!
//! - `evidence`: recorded trace model and compiler-facing digest
//! - `compiler`: trace to validated workflow
//! - `domain`: workflow IR, bindings, postconditions, run records
//! - `core`: orchestrator and run persistence
//! - `adapters`: generation and executor capability seams
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Compile a recorded trace
//! demoflow compile --trace demo.json --name order-pizza
//!
//! # Run it with fresh input
//! demoflow run --workflow demo.workflow.json --text "large pepperoni"
//!
//! # Inspect a persisted run
//! demoflow show-run <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod core;
pub mod domain;
pub mod evidence;

// Re-export main types at crate root for convenience
pub use compiler::{CompileError, CompileOptions, Compiler};
pub use crate::core::{CancelFlag, Orchestrator, RunStore};
pub use domain::{
    BindingExpr, Postcondition, RetryPolicy, RunResult, RunStatus, Step, StepKind, Workflow,
};
pub use evidence::{DemoTrace, TraceDigest};
