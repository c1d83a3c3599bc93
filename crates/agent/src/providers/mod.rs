//! HTTP-backed decision policies and completion clients.

pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use feedloop_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::llm::{DecisionPolicy, LlmClient};
use crate::tools::CapabilityDefinition;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

pub const SYSTEM_PROMPT: &str = "You are an assistant for a product owner. You help turn raw user \
feedback into structured items, spot recurring themes when asked, prioritize features with RICE or \
MoSCoW, and write user stories with acceptance criteria. Use the available functions for that work \
instead of guessing their results, then answer the user concisely based on what they returned. If \
a function reports an error, explain it or try again with corrected arguments.";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned HTTP {status}: {body}")]
    Status { provider: &'static str, status: u16, body: String },
    #[error("{provider} returned an unexpected response: {message}")]
    Malformed { provider: &'static str, message: String },
    #[error("{0}")]
    Configuration(String),
}

impl ProviderError {
    /// Connection problems, rate limits and server errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(16) as i32);
        Duration::from_millis(scaled.min(self.max_delay.as_millis() as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(timeout_secs.min(30)))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(ProviderError::Client)
}

/// POSTs `body` and returns the decoded JSON reply, retrying transient failures.
pub(crate) async fn post_json(
    client: &Client,
    provider: &'static str,
    url: &str,
    headers: &[(&'static str, String)],
    body: &Value,
    retry: RetryPolicy,
) -> Result<Value, ProviderError> {
    let mut attempt = 0;
    loop {
        match send_once(client, provider, url, headers, body).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < retry.max_retries => {
                let delay = retry.delay_for(attempt);
                warn!(
                    event_name = "provider.request.retrying",
                    provider,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient provider failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn send_once(
    client: &Client,
    provider: &'static str,
    url: &str,
    headers: &[(&'static str, String)],
    body: &Value,
) -> Result<Value, ProviderError> {
    let mut request = client.post(url).json(body);
    for (name, value) in headers {
        request = request.header(*name, value);
    }

    let response =
        request.send().await.map_err(|source| ProviderError::Transport { provider, source })?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status { provider, status: status.as_u16(), body });
    }
    response.json::<Value>().await.map_err(|source| ProviderError::Transport { provider, source })
}

/// Tool message content is JSON text; providers want structured values back.
pub(crate) fn tool_content_value(content: &str) -> Value {
    serde_json::from_str(content).unwrap_or_else(|_| Value::String(content.to_string()))
}

pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ProviderError> {
    Ok(match config.provider {
        LlmProvider::Gemini => Arc::new(GeminiClient::from_config(config)?),
        LlmProvider::OpenAi | LlmProvider::Ollama => Arc::new(OpenAiClient::from_config(config)?),
    })
}

pub fn build_decision_policy(
    config: &LlmConfig,
    definitions: Vec<CapabilityDefinition>,
) -> Result<Arc<dyn DecisionPolicy>, ProviderError> {
    Ok(match config.provider {
        LlmProvider::Gemini => {
            Arc::new(GeminiClient::from_config(config)?.with_capabilities(definitions))
        }
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            Arc::new(OpenAiClient::from_config(config)?.with_capabilities(definitions))
        }
    })
}
