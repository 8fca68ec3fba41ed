//! Generation capability: the single seam through which the compiler
//! talks to a reasoning service.
//!
//! The contract is narrow on purpose: given a task description, a JSON
//! schema to populate, and a context payload, return structured data or
//! fail. All non-determinism lives behind this trait, which keeps the
//! compiler deterministic and the seam mockable in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// One structured-generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Task description (system prompt)
    pub system: String,

    /// Context payload, serialized into the user message
    pub payload: Value,

    /// Name of the schema being populated
    pub schema_name: String,

    /// JSON schema the response must conform to
    pub schema: Value,
}

/// Failure of a generation call
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("malformed generation response: {detail}")]
    Malformed { detail: String },

    #[error("no valid output after {attempts} attempts, last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// External structured-generation capability
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable generator name
    fn name(&self) -> &str;

    /// Produce data intended to conform to the request schema
    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<Value, GenerationError>;
}

/// Retry settings for structured calls
#[derive(Debug, Clone)]
pub struct StructuredCallConfig {
    /// Extra attempts after the first on parse/validation failure
    pub retries: u32,
    pub timeout: Duration,
}

impl Default for StructuredCallConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Call a generator with bounded schema-repair retries.
///
/// On validation failure the next attempt sees the validation error and
/// the previous invalid output alongside the original payload, so the
/// service can correct itself. Exhaustion surfaces the last error.
pub async fn call_structured<T>(
    generator: &dyn Generator,
    cfg: &StructuredCallConfig,
    request: &GenerationRequest,
    validate: impl Fn(Value) -> anyhow::Result<T>,
) -> Result<T, GenerationError> {
    let mut last_error = String::new();
    let mut last_output: Option<Value> = None;

    for attempt in 0..=cfg.retries {
        let attempt_request = if attempt == 0 {
            request.clone()
        } else {
            warn!(
                schema = %request.schema_name,
                attempt,
                error = %last_error,
                "Generation output failed validation, retrying with repair context"
            );
            let mut repaired = request.clone();
            repaired.payload = json!({
                "repair": {
                    "instruction": "Your previous output failed validation. \
                        Return ONLY corrected JSON that matches the schema.",
                    "validation_error": last_error,
                    "previous_output": last_output,
                },
                "payload": request.payload,
            });
            repaired
        };

        let raw = match generator.generate(&attempt_request, cfg.timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                last_error = e.to_string();
                continue;
            }
        };

        debug!(schema = %request.schema_name, attempt, "Generation response received");

        match validate(raw.clone()) {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = e.to_string();
                last_output = Some(raw);
            }
        }
    }

    Err(GenerationError::Exhausted {
        attempts: cfg.retries + 1,
        last_error,
    })
}

/// Generator backed by an OpenAI-style chat completions endpoint
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<Value, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.payload.to_string()},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema,
                },
            },
        });

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| GenerationError::Timeout { timeout })??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: Value = response.json().await?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerationError::Malformed {
                detail: "missing choices[0].message.content".to_string(),
            })?;

        serde_json::from_str(content).map_err(|e| GenerationError::Malformed {
            detail: format!("content is not valid JSON: {}", e),
        })
    }
}
