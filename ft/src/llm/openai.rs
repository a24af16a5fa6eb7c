//! OpenAI-compatible API client implementation
//!
//! Implements the LlmClient trait for the Chat Completions API spoken by
//! OpenAI, Groq and most hosted open-model providers.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, StopReason, TokenUsage};
use crate::config::LlmConfig;

/// OpenAI-compatible API client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAIClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in the config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(provider = %config.provider, model = %config.model, "from_config: called");
        let api_key = config.get_api_key().map_err(|e| LlmError::Config(e.to_string()))?;

        Self::new(
            &config.base_url,
            api_key,
            &config.model,
            config.max_tokens,
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Create a client with explicit settings
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: model.to_string(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens,
            timeout,
        })
    }

    /// Build the request body for the chat completions endpoint
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];

        messages.extend(self.convert_messages(&request.messages));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.min(self.max_tokens),
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if request.json_mode {
            debug!("build_request_body: requesting json_object response");
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        body
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role.as_str(),
                    "content": msg.content,
                })
            })
            .collect()
    }

    /// Parse the chat completions response envelope
    fn parse_response(&self, api_response: OpenAIResponse) -> CompletionResponse {
        debug!(choice_count = api_response.choices.len(), "parse_response: called");
        let choice = api_response.choices.into_iter().next();

        let (content, stop_reason) = match choice {
            Some(c) => (
                c.message.content,
                StopReason::from_finish_reason(c.finish_reason.as_deref()),
            ),
            None => {
                warn!("parse_response: response carried no choices");
                (None, StopReason::EndTurn)
            }
        };

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        CompletionResponse {
            content,
            stop_reason,
            usage,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "complete: called");
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    debug!("complete: request timed out");
                    LlmError::Timeout(self.timeout)
                } else {
                    debug!(error = %e, "complete: network error");
                    LlmError::Network(e)
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Network)?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "complete: API error");
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }

        let api_response: OpenAIResponse = serde_json::from_str(&text)?;
        let response = self.parse_response(api_response);
        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "complete: success"
        );
        Ok(response)
    }
}

// OpenAI API response types

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base_url: &str) -> OpenAIClient {
        OpenAIClient::new(base_url, "test-key", "llama3-70b-8192", 1024, Duration::from_secs(5)).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "You are a precise information extractor.".to_string(),
            messages: vec![Message::user("Extract")],
            max_tokens: 512,
            temperature: Some(0.0),
            json_mode: true,
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let client = client("https://api.groq.com/openai/");
        let body = client.build_request_body(&request());

        assert_eq!(body["model"], "llama3-70b-8192");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Extract");
        assert_eq!(client.base_url, "https://api.groq.com/openai");
    }

    #[test]
    fn test_build_request_body_plain() {
        let client = client("https://api.openai.com");
        let mut req = request();
        req.temperature = None;
        req.json_mode = false;
        req.max_tokens = 5000;

        let body = client.build_request_body(&req);
        assert!(body.get("temperature").is_none());
        assert!(body.get("response_format").is_none());
        assert_eq!(body["max_tokens"], 1024);
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "temperature": 0.0,
                "response_format": { "type": "json_object" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "choices": [{
                        "message": { "role": "assistant", "content": "{\"title\":\"Call mom\"}" },
                        "finish_reason": "stop"
                    }],
                    "usage": { "prompt_tokens": 90, "completion_tokens": 12 }
                }"#,
            )
            .create_async()
            .await;

        let response = client(&server.url()).complete(request()).await.unwrap();
        assert_eq!(response.content.as_deref(), Some(r#"{"title":"Call mom"}"#));
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.total(), 102);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_api_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("over capacity")
            .expect(1)
            .create_async()
            .await;

        let err = client(&server.url()).complete(request()).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_service_failure());
        assert!(err.to_string().contains("over capacity"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_garbled_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create_async()
            .await;

        let err = client(&server.url()).complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Json(_)));
        assert!(!err.is_service_failure());
    }

    #[tokio::test]
    async fn test_complete_without_choices() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let response = client(&server.url()).complete(request()).await.unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.usage, TokenUsage::default());
    }
}
