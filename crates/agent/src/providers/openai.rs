use anyhow::Result;
use async_trait::async_trait;
use feedloop_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, post_json, ProviderError, RetryPolicy, SYSTEM_PROMPT};
use crate::conversation::{InvocationRequest, Message, Role};
use crate::llm::{DecisionError, DecisionOutcome, DecisionPolicy, LlmClient};
use crate::tools::CapabilityDefinition;

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client. Also serves Ollama through its OpenAI-compatible `/v1` API.
pub struct OpenAiClient {
    http: Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
    capabilities: Vec<CapabilityDefinition>,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (LlmProvider::Ollama, Some(base_url)) => {
                let base_url = base_url.trim_end_matches('/');
                if base_url.ends_with("/v1") {
                    base_url.to_string()
                } else {
                    format!("{base_url}/v1")
                }
            }
            (LlmProvider::Ollama, None) => {
                return Err(ProviderError::Configuration("ollama requires llm.base_url".to_string()))
            }
            (_, Some(base_url)) => base_url.trim_end_matches('/').to_string(),
            (_, None) => DEFAULT_BASE_URL.to_string(),
        };
        if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
            return Err(ProviderError::Configuration("openai requires llm.api_key".to_string()));
        }

        Ok(Self {
            http: http_client(config.timeout_secs)?,
            api_key: config.api_key.clone(),
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            retry: RetryPolicy::with_max_retries(config.max_retries),
            capabilities: Vec::new(),
        })
    }

    pub fn with_capabilities(mut self, capabilities: Vec<CapabilityDefinition>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn chat(&self, body: Value) -> Result<Value, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers: Vec<(&'static str, String)> = self
            .api_key
            .iter()
            .map(|key| ("authorization", format!("Bearer {}", key.expose_secret())))
            .collect();
        post_json(&self.http, PROVIDER, &url, &headers, &body, self.retry).await
    }

    fn decision_body(&self, messages: &[Message]) -> Value {
        let mut wire = vec![json!({"role": "system", "content": SYSTEM_PROMPT})];
        wire.extend(messages.iter().map(wire_message));

        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": wire,
        });
        if !self.capabilities.is_empty() {
            let tools: Vec<Value> = self
                .capabilities
                .iter()
                .map(|definition| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": definition.name,
                            "description": definition.description,
                            "parameters": definition.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::User => json!({"role": "user", "content": message.content}),
        Role::Assistant if message.invocation_requests.is_empty() => {
            json!({"role": "assistant", "content": message.content})
        }
        Role::Assistant => {
            let calls: Vec<Value> = message
                .invocation_requests
                .iter()
                .map(|request| {
                    json!({
                        "id": request.id,
                        "type": "function",
                        "function": {"name": request.name, "arguments": request.arguments.to_string()}
                    })
                })
                .collect();
            let content =
                if message.content.is_empty() { Value::Null } else { json!(message.content) };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.invocation_id,
            "content": message.content,
        }),
    }
}

fn parse_outcome(response: &Value) -> Result<DecisionOutcome, ProviderError> {
    let message = response["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .map(|choice| &choice["message"])
        .ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER,
            message: "no choices in response".to_string(),
        })?;

    let content = message["content"].as_str().unwrap_or_default().to_string();
    let requests: Vec<InvocationRequest> = message["tool_calls"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|call| {
            let raw = call["function"]["arguments"].as_str().unwrap_or("{}");
            // Unparsable arguments stay a string so dispatch reports them as invalid.
            let arguments = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            InvocationRequest::new(
                call["id"].as_str().unwrap_or_default(),
                call["function"]["name"].as_str().unwrap_or_default(),
                arguments,
            )
        })
        .collect();

    if requests.is_empty() {
        Ok(DecisionOutcome::Final(content))
    } else {
        Ok(DecisionOutcome::RequestInvocations { content, requests })
    }
}

#[async_trait]
impl DecisionPolicy for OpenAiClient {
    async fn decide(&self, messages: &[Message]) -> Result<DecisionOutcome, DecisionError> {
        let response = self
            .chat(self.decision_body(messages))
            .await
            .map_err(|error| DecisionError::Unavailable(error.to_string()))?;
        let outcome =
            parse_outcome(&response).map_err(|error| DecisionError::Unavailable(error.to_string()))?;
        debug!(event_name = "provider.openai.decided", is_final = outcome.is_final(), "chat decision received");
        Ok(outcome)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self.chat(body).await?;
        match parse_outcome(&response)? {
            DecisionOutcome::Final(text) => Ok(text),
            DecisionOutcome::RequestInvocations { content, .. } => Ok(content),
        }
    }
}
