//! Executor registry: the routing boundary between the engine and
//! capability implementations.
//!
//! Built once at process start and read-only afterwards, so it can be
//! shared across concurrent runs without locking. Dispatch does not
//! retry or interpret errors; policy lives in the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::{CommandExecutor, Executor, WaitExecutor};
use crate::config::ResolvedConfig;
use crate::domain::StepKind;

/// A workflow references a kind with no registered capability.
///
/// Checked at execution time as well as compile time, since the set of
/// available capabilities may differ between the compiling and executing
/// environment.
#[derive(Debug, Error)]
#[error("no executor registered for step kind {kind}")]
pub struct UnsupportedKind {
    pub kind: StepKind,
}

/// Maps each step kind to exactly one capability implementation
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability for a kind, replacing any previous one
    pub fn register(mut self, kind: StepKind, executor: Arc<dyn Executor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Build the registry from configuration: the built-in wait executor
    /// plus a command-backed executor per configured helper program.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let mut registry = Self::new().register(StepKind::Wait, Arc::new(WaitExecutor));

        for (kind, command) in [
            (StepKind::Web, &config.executors.web),
            (StepKind::Desktop, &config.executors.desktop),
            (StepKind::AppAction, &config.executors.app_action),
        ] {
            if let Some(command) = command {
                registry = registry.register(
                    kind,
                    Arc::new(CommandExecutor::new(
                        kind.as_str().to_ascii_lowercase(),
                        command.clone(),
                    )),
                );
            }
        }

        registry
    }

    /// Route a step kind to its capability
    pub fn get(&self, kind: StepKind) -> Result<Arc<dyn Executor>, UnsupportedKind> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or(UnsupportedKind { kind })
    }

    /// Kinds with a registered capability
    pub fn supported_kinds(&self) -> Vec<StepKind> {
        let mut kinds: Vec<StepKind> = self.executors.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_kind_fails_fast() {
        let registry = ExecutorRegistry::new().register(StepKind::Wait, Arc::new(WaitExecutor));
        assert!(registry.get(StepKind::Wait).is_ok());
        let err = registry.get(StepKind::Web).unwrap_err();
        assert_eq!(err.kind, StepKind::Web);
    }
}
