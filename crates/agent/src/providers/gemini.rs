use anyhow::Result;
use async_trait::async_trait;
use feedloop_core::config::LlmConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, post_json, tool_content_value, ProviderError, RetryPolicy, SYSTEM_PROMPT};
use crate::conversation::{InvocationRequest, Message, Role};
use crate::llm::{DecisionError, DecisionOutcome, DecisionPolicy, LlmClient};
use crate::tools::CapabilityDefinition;

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
    capabilities: Vec<CapabilityDefinition>,
}

impl GeminiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::Configuration("gemini requires llm.api_key or GEMINI_API_KEY".to_string())
        })?;
        Ok(Self {
            http: http_client(config.timeout_secs)?,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
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

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate(&self, body: Value) -> Result<Value, ProviderError> {
        let headers = [("x-goog-api-key", self.api_key.expose_secret().to_string())];
        post_json(&self.http, PROVIDER, &self.endpoint(), &headers, &body, self.retry).await
    }

    fn decision_body(&self, messages: &[Message]) -> Value {
        let mut body = json!({
            "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
            "contents": contents(messages),
            "generationConfig": {"temperature": self.temperature},
        });
        if !self.capabilities.is_empty() {
            let declarations: Vec<Value> = self
                .capabilities
                .iter()
                .map(|definition| {
                    json!({
                        "name": definition.name,
                        "description": definition.description,
                        "parameters": definition.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }
}

/// Maps the transcript onto Gemini contents. Consecutive tool messages become one turn of
/// `functionResponse` parts, the shape Gemini expects after a multi-call model turn.
fn contents(messages: &[Message]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();
    let mut pending_responses: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == Role::Tool {
            let name = message.capability.clone().unwrap_or_default();
            let response = match tool_content_value(&message.content) {
                Value::Object(object) => Value::Object(object),
                other => json!({ "result": other }),
            };
            pending_responses.push(json!({
                "functionResponse": {"name": name, "response": response}
            }));
            continue;
        }
        if !pending_responses.is_empty() {
            contents.push(json!({"role": "user", "parts": std::mem::take(&mut pending_responses)}));
        }

        match message.role {
            Role::User => contents.push(json!({"role": "user", "parts": [{"text": message.content}]})),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(json!({"text": message.content}));
                }
                for request in &message.invocation_requests {
                    parts.push(json!({
                        "functionCall": {"name": request.name, "args": request.arguments}
                    }));
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
            Role::Tool => {}
        }
    }
    if !pending_responses.is_empty() {
        contents.push(json!({"role": "user", "parts": pending_responses}));
    }
    contents
}

fn parse_outcome(response: &Value) -> Result<DecisionOutcome, ProviderError> {
    let candidate = response["candidates"]
        .as_array()
        .and_then(|candidates| candidates.first())
        .ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER,
            message: "no candidates in response".to_string(),
        })?;

    let mut text = String::new();
    let mut requests = Vec::new();
    for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
        if let Some(fragment) = part["text"].as_str() {
            text.push_str(fragment);
        }
        if let Some(call) = part.get("functionCall") {
            requests.push(InvocationRequest::new(
                call["id"].as_str().unwrap_or_default(),
                call["name"].as_str().unwrap_or_default(),
                call.get("args").cloned().unwrap_or_else(|| json!({})),
            ));
        }
    }

    if requests.is_empty() {
        Ok(DecisionOutcome::Final(text))
    } else {
        Ok(DecisionOutcome::RequestInvocations { content: text, requests })
    }
}

#[async_trait]
impl DecisionPolicy for GeminiClient {
    async fn decide(&self, messages: &[Message]) -> Result<DecisionOutcome, DecisionError> {
        let response = self
            .generate(self.decision_body(messages))
            .await
            .map_err(|error| DecisionError::Unavailable(error.to_string()))?;
        let outcome =
            parse_outcome(&response).map_err(|error| DecisionError::Unavailable(error.to_string()))?;
        debug!(event_name = "provider.gemini.decided", is_final = outcome.is_final(), "gemini decision received");
        Ok(outcome)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": self.temperature},
        });
        let response = self.generate(body).await?;
        match parse_outcome(&response)? {
            DecisionOutcome::Final(text) => Ok(text),
            DecisionOutcome::RequestInvocations { content, .. } => Ok(content),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use feedloop_core::config::AppConfig;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{contents, GeminiClient};
    use crate::conversation::{InvocationRequest, Message};
    use crate::llm::{DecisionError, DecisionOutcome, DecisionPolicy, LlmClient};
    use crate::providers::RetryPolicy;
    use crate::tools::CapabilityDefinition;

    const ENDPOINT: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

    fn client(server: &MockServer) -> GeminiClient {
        let mut config = AppConfig::default().llm;
        config.api_key = Some("test-key".to_string().into());
        config.base_url = Some(server.uri());
        GeminiClient::from_config(&config).expect("client builds").with_retry(RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        })
    }

    fn definitions() -> Vec<CapabilityDefinition> {
        vec![CapabilityDefinition {
            name: "analyze_feedback".to_string(),
            description: "Extracts items".to_string(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }]
    }

    #[tokio::test]
    async fn function_calls_become_invocation_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "tools": [{"functionDeclarations": [{"name": "analyze_feedback"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"functionCall": {"name": "analyze_feedback", "args": {"feedback_text": "slow"}}}
                ]}}]
            })))
            .mount(&server)
            .await;

        let outcome = client(&server)
            .with_capabilities(definitions())
            .decide(&[Message::user("slow")])
            .await
            .expect("decision");

        match outcome {
            DecisionOutcome::RequestInvocations { requests, .. } => {
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].name, "analyze_feedback");
                assert_eq!(requests[0].arguments, json!({"feedback_text": "slow"}));
            }
            other => panic!("expected invocations, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_reply_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello!"}]}}]
            })))
            .mount(&server)
            .await;

        let outcome = client(&server).decide(&[Message::user("hi")]).await.expect("decision");
        assert_eq!(outcome, DecisionOutcome::Final("Hello!".to_string()));
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "{\"items\": []}"}]}}]
            })))
            .mount(&server)
            .await;

        let text = client(&server).complete("analyze").await.expect("completion");
        assert_eq!(text, "{\"items\": []}");
    }

    #[tokio::test]
    async fn auth_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(401).set_body_string("API key not valid"))
            .expect(1)
            .mount(&server)
            .await;

        let error = client(&server).decide(&[Message::user("hi")]).await.err();
        assert!(matches!(error, Some(DecisionError::Unavailable(message)) if message.contains("401")));
    }

    #[test]
    fn consecutive_tool_messages_share_one_turn() {
        let transcript = vec![
            Message::user("go"),
            Message::assistant_requesting(
                "",
                vec![
                    InvocationRequest::new("a", "analyze_feedback", json!({})),
                    InvocationRequest::new("b", "detect_patterns", json!({})),
                ],
            ),
            Message::tool_result("a", "analyze_feedback", "{\"items\":[]}"),
            Message::tool_result("b", "detect_patterns", "[\"x\"]"),
        ];

        let contents = contents(&transcript);

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"].as_array().map(Vec::len), Some(2));
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "analyze_feedback");
        assert_eq!(contents[2]["parts"][1]["functionResponse"]["response"], json!({"result": ["x"]}));
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let config = AppConfig::default().llm;
        assert!(GeminiClient::from_config(&config).is_err());
    }
}
