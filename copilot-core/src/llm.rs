//! Language-model client boundary.
//!
//! `LlmClient` is the seam the intent router talks through. The production
//! implementation calls an OpenAI-compatible `/chat/completions` endpoint with
//! exponential-backoff retries on transient failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LlmConfig;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

// ============================================================================
// LlmClient trait
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Return the assistant text for a chat transcript.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Model name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Model returned no content")]
    EmptyResponse,

    #[error("Missing API key (set OPENAI_API_KEY or llm.api_key)")]
    MissingApiKey,

    #[error("All {attempts} attempts failed")]
    RetryExhausted { attempts: usize },
}

impl LlmError {
    /// Worth retrying: connection trouble, rate limiting, or a server-side error.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => !e.is_decode() && !e.is_builder(),
            LlmError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// OpenAI-compatible wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: LlmConfig,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let api_key = resolve_api_key(&config.api_key, std::env::var("OPENAI_API_KEY").ok())
            .ok_or(LlmError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config, api_key })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(body);
            tracing::warn!(code = status.as_u16(), message = %message, "Chat completion failed");
            return Err(LlmError::Api { code: status.as_u16(), message });
        }

        let body: CompletionResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

/// The configured key wins; otherwise the environment value. Blank counts as missing.
fn resolve_api_key(configured: &str, from_env: Option<String>) -> Option<String> {
    if !configured.trim().is_empty() {
        return Some(configured.trim().to_string());
    }
    from_env.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

/// Delays before each retry: `retry_delay_ms`, then doubling, capped at 10s.
fn retry_delays(config: &LlmConfig) -> impl Iterator<Item = Duration> {
    // from_millis(2) yields 2, 4, 8, ...; the factor scales that to the configured first step
    let factor = (config.retry_delay_ms / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(MAX_RETRY_DELAY)
        .take(config.max_retries)
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let retry_strategy = retry_delays(&self.config).map(jitter);

        let started = std::time::Instant::now();
        let result = RetryIf::start(
            retry_strategy,
            || self.complete_once(messages),
            |e: &LlmError| e.is_transient(),
        )
        .await;

        match result {
            Ok(text) => {
                tracing::debug!(
                    model = %self.config.model,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Chat completion succeeded"
                );
                Ok(text)
            }
            Err(e) if e.is_transient() => {
                let attempts = self.config.max_retries + 1;
                tracing::error!(attempts, error = %e, "All chat completion attempts failed");
                Err(LlmError::RetryExhausted { attempts })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str, api_key: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            model: "gpt-4o".to_string(),
            api_key: api_key.to_string(),
            temperature: 0.0,
            max_retries: 2,
            retry_delay_ms: 10,
            timeout_seconds: 5,
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::system("hi");
        assert_eq!(serde_json::to_value(&msg).unwrap()["role"], "system");
    }

    #[test]
    fn api_key_resolution() {
        assert_eq!(resolve_api_key("sk-config", Some("sk-env".into())).as_deref(), Some("sk-config"));
        assert_eq!(resolve_api_key("", Some("sk-env".into())).as_deref(), Some("sk-env"));
        assert_eq!(resolve_api_key("  ", Some("  ".into())), None);
        assert_eq!(resolve_api_key("", None), None);
    }

    #[test]
    fn retry_delays_double_from_configured_step() {
        let mut config = test_config("http://localhost", "sk-test");
        config.retry_delay_ms = 500;
        config.max_retries = 3;
        let delays: Vec<u64> = retry_delays(&config).map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000]);

        config.retry_delay_ms = 4000;
        config.max_retries = 4;
        let delays: Vec<u64> = retry_delays(&config).map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![4000, 8000, 10_000, 10_000]);
    }

    #[tokio::test]
    async fn test_complete_posts_chat_request_and_returns_content() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "messages": [{ "role": "user", "content": "hello" }],
                "temperature": 0.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("hi there")))
            .mount(&mock_server)
            .await;

        let text = client.complete(&[ChatMessage::user("hello")]).await.unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn test_retries_on_server_error_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("recovered")))
            .mount(&mock_server)
            .await;

        let text = client.complete(&[ChatMessage::user("hello")]).await.unwrap();
        assert_eq!(text, "recovered");
    }

    #[tokio::test]
    async fn test_persistent_500_exhausts_retries() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Internal server error" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        match client.complete(&[ChatMessage::user("hello")]).await {
            Err(LlmError::RetryExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config(&mock_server.uri(), "sk-bad")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Incorrect API key provided" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&[ChatMessage::user("hello")]).await {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert!(message.contains("Incorrect API key"));
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_null_content_is_empty_response() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config(&mock_server.uri(), "sk-test")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": null } }]
            })))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.complete(&[ChatMessage::user("hello")]).await,
            Err(LlmError::EmptyResponse)
        ));
    }
}
