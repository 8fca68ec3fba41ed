//! Built-in executor for WAIT steps.
//!
//! Pauses for a fixed duration to absorb UI latency (page loads, app
//! launches, animations). The only executor that ships with the engine
//! rather than living in an external helper.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{ExecutionError, Executor};

pub struct WaitExecutor;

#[async_trait]
impl Executor for WaitExecutor {
    fn name(&self) -> &str {
        "wait"
    }

    async fn execute(
        &self,
        _goal: &str,
        inputs: &BTreeMap<String, Value>,
        _attempt: u32,
        timeout: Duration,
    ) -> Result<Value, ExecutionError> {
        let seconds = match inputs.get("seconds") {
            Some(v) => v
                .as_f64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| ExecutionError::Failed {
                    reason: format!("inputs.seconds is not numeric: {}", v),
                })?,
            None => 1.0,
        };

        // Clamp into [0, timeout] so a wait can never outlive its attempt
        let seconds = seconds.max(0.0).min(timeout.as_secs_f64());

        debug!(seconds, "Waiting");
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;

        Ok(json!({ "waited_seconds": seconds }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_reports_duration() {
        let inputs: BTreeMap<String, Value> =
            [("seconds".to_string(), json!(0.01))].into_iter().collect();
        let out = WaitExecutor
            .execute("pause", &inputs, 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out["waited_seconds"], json!(0.01));
    }

    #[tokio::test]
    async fn test_wait_rejects_non_numeric() {
        let inputs: BTreeMap<String, Value> =
            [("seconds".to_string(), json!({"nested": true}))]
                .into_iter()
                .collect();
        let err = WaitExecutor
            .execute("pause", &inputs, 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Failed { .. }));
    }
}
