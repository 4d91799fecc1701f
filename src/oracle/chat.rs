//! Chat-completion client for OpenAI-compatible APIs (DeepSeek by default)
//!
//! Sends one user message per call and hands back the raw completion text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{DecisionOracle, OracleError};
use crate::retry::RetryPolicy;

pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_TEMPERATURE: f32 = 0.1; // Near-deterministic answers
const MAX_TOKENS: u32 = 512;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: DEEPSEEK_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

pub struct ChatCompletionClient {
    api_key: String,
    client: reqwest::Client,
    settings: ChatSettings,
}

impl ChatCompletionClient {
    pub fn new(api_key: String, settings: ChatSettings) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            api_key,
            client,
            settings,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    async fn call_once(&self, prompt: &str) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: self.settings.temperature,
            stream: false,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status { status, body });
        }

        // A body that is not a chat completion is content, not transport
        let body = response.text().await?;
        let chat: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| OracleError::Decode(format!("{} in body '{}'", e, truncate(&body))))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(OracleError::EmptyResponse)
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl DecisionOracle for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let retry = RetryPolicy::new(self.settings.max_attempts, self.settings.retry_delay);

        // Only transport failures are retried; whatever text comes back is final
        let text = retry
            .run_if("Oracle call", || self.call_once(prompt), |e| e.is_transient())
            .await?;

        tracing::debug!("Oracle reply: {}", text);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base_url: &str) -> ChatCompletionClient {
        let settings = ChatSettings {
            base_url: base_url.to_string(),
            retry_delay: Duration::ZERO,
            ..ChatSettings::default()
        };
        ChatCompletionClient::new("test-key".to_string(), settings).unwrap()
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "deepseek-chat",
                "stream": false,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"signal\":\"HOLD\"}"}}]}"#)
            .create_async()
            .await;

        let text = client(&server.url()).complete("hello").await.unwrap();

        assert_eq!(text, r#"{"signal":"HOLD"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let err = client(&server.url()).complete("hello").await.unwrap_err();
        assert!(matches!(err, OracleError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("busy")
            .expect(3)
            .create_async()
            .await;

        let err = client(&server.url()).complete("hello").await.unwrap_err();

        assert!(matches!(err, OracleError::Status { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .expect(1)
            .create_async()
            .await;

        let err = client(&server.url()).complete("hello").await.unwrap_err();

        assert!(!err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("<html>not json</html>")
            .expect(1)
            .create_async()
            .await;

        let err = client(&server.url()).complete("hello").await.unwrap_err();

        assert!(matches!(err, OracleError::Decode(_)));
        assert!(!err.is_transient());
        mock.assert_async().await;
    }
}
