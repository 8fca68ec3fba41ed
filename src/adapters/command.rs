//! Subprocess-backed executor.
//!
//! Browser and desktop automation live in external helper programs. The
//! wire contract is one JSON request on stdin and one JSON object on
//! stdout: `{goal, inputs, attempt, timeout_seconds}` in, output record
//! out. Non-zero exit or unparseable output is an execution failure with
//! a stderr excerpt attached.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{ExecutionError, Executor};

pub struct CommandExecutor {
    name: String,

    /// Program plus leading arguments
    program: Vec<String>,
}

impl CommandExecutor {
    /// Build from a name and a command line (program + args)
    pub fn new(name: impl Into<String>, program: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program,
        }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        goal: &str,
        inputs: &BTreeMap<String, Value>,
        attempt: u32,
        step_timeout: Duration,
    ) -> Result<Value, ExecutionError> {
        let (program, args) = self.program.split_first().ok_or_else(|| {
            ExecutionError::Launch {
                detail: format!("no command configured for executor '{}'", self.name),
            }
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Launch {
                detail: format!("failed to spawn '{}': {}", program, e),
            })?;

        let request = json!({
            "goal": goal,
            "inputs": inputs,
            "attempt": attempt,
            "timeout_seconds": step_timeout.as_secs(),
        });

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.to_string().as_bytes())
                .await
                .map_err(|e| ExecutionError::Launch {
                    detail: format!("failed to write executor request: {}", e),
                })?;
            // Drop stdin to signal EOF
        }

        let output = timeout(step_timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutionError::Timeout {
                timeout: step_timeout,
            })?
            .map_err(|e| ExecutionError::Launch {
                detail: format!("failed to wait for '{}': {}", program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutionError::Failed {
                reason: format!(
                    "'{}' exited with {}: {}",
                    program,
                    output.status.code().unwrap_or(-1),
                    stderr.trim().chars().take(500).collect::<String>()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(stdout.trim()).map_err(|e| ExecutionError::InvalidOutput {
            detail: format!("stdout is not valid JSON: {}", e),
        })
    }
}
