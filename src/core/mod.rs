//! Core execution engine.
//!
//! This module contains:
//! - `Orchestrator`: the step lifecycle state machine
//! - `RunStore`: file-based persistence for run results

pub mod orchestrator;
pub mod store;

pub use orchestrator::{bind_params, CancelFlag, EngineError, Orchestrator};
pub use store::RunStore;
