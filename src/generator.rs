//! Generation provider abstraction and the retry executor.
//!
//! Defines the [`GenerationProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when generation is not configured.
//! - **[`OpenAiProvider`]** — calls an OpenAI-compatible chat-completions API.
//!
//! [`generate_with_retry`] is the single place retry policy lives: it consults
//! the quota tracker before every attempt, dispatches the call, and backs off
//! exponentially on quota-exhaustion signals. Orchestration code never sees a
//! raw 429.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (quota exhausted) → retry with exponential backoff
//! - any other provider failure → fail immediately
//! - attempts exhausted → [`GenerationError::Exhausted`]
//! - Backoff: `min(initial_delay × backoff_factor^(attempt-1), max_delay)`

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::quota::QuotaTracker;

/// One chat-style generation request: a system role and a user instruction.
#[derive(Debug, Clone)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

/// Trait for generation providers.
///
/// Implementations return the raw completion text; fence stripping and JSON
/// parsing happen downstream in [`crate::extract`].
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Dispatch one generation call.
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GenerationError>;
}

// ============ Disabled Provider ============

/// A no-op provider that always returns [`GenerationError::Disabled`].
pub struct DisabledProvider;

#[async_trait]
impl GenerationProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &GenerationPrompt) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ OpenAI-compatible Provider ============

/// Provider calling `POST {api_base}/chat/completions`.
///
/// Requires the `OPENAI_API_KEY` environment variable. The base URL is
/// configurable so compatible gateways can be substituted.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": 0.7,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Provider {
                message: format!("request failed: {}", e),
            })?;

        let status = resp.status();

        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(GenerationError::QuotaExceeded { retry_after });
        }

        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Provider {
                message: format!("{}: {}", status, body_text),
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| GenerationError::Provider {
            message: format!("invalid completion envelope: {}", e),
        })?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerationError::Provider {
                message: "completion has no message content".to_string(),
            })?;

        Ok(content.trim().to_string())
    }
}

/// Create the appropriate [`GenerationProvider`] based on configuration.
pub fn create_provider(config: &GenerationConfig) -> anyhow::Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

// ============ Retry executor ============

/// Retry parameters for quota-exhaustion errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before the retry that follows `attempt` (1-based):
    /// `min(initial_delay × backoff_factor^(attempt-1), max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Execute one generation with quota gating and bounded retries.
///
/// Before every attempt the quota tracker is consulted; while the window is
/// full the task sleeps cooperatively for the reported wait. A quota error
/// from the provider consumes one attempt and backs off; any other error is
/// surfaced unchanged. When all attempts are spent on quota errors the result
/// is [`GenerationError::Exhausted`].
pub async fn generate_with_retry(
    provider: &dyn GenerationProvider,
    quota: &QuotaTracker,
    policy: &RetryPolicy,
    prompt: &GenerationPrompt,
) -> Result<String, GenerationError> {
    let mut last_message = String::new();

    for attempt in 1..=policy.max_attempts {
        // Wait for window headroom before dispatching.
        loop {
            let decision = quota.try_acquire();
            if decision.allowed {
                break;
            }
            debug!(
                wait_ms = decision.wait.as_millis() as u64,
                "rate limit window full, waiting"
            );
            tokio::time::sleep(decision.wait).await;
        }

        match provider.generate(prompt).await {
            Ok(text) => return Ok(text),
            Err(e @ GenerationError::QuotaExceeded { .. }) => {
                last_message = e.to_string();
                if attempt == policy.max_attempts {
                    break;
                }
                let delay = policy.backoff_delay(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "quota exhausted, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(other) => return Err(other),
        }
    }

    Err(GenerationError::Exhausted {
        attempts: policy.max_attempts,
        last: last_message,
    })
}
