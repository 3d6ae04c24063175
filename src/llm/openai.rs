// OpenAI chat-completions adapter
// Also serves OpenRouter and Groq, which expose the same wire format.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, TokenUsage};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAIAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl OpenAIAdapter {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, OPENAI_API_BASE)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LLMAdapter for OpenAIAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_instruction {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.extend(request.messages.iter().map(|m| ChatMessage {
            role: &m.role,
            content: &m.content,
        }));

        let body = ChatRequest {
            model: &request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!(model = %request.model, messages = body.messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LLMApi(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                return Err(AppError::LLMApi(format!(
                    "{} (status {}, code: {})",
                    error_response.error.message,
                    status,
                    error_response
                        .error
                        .code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string())
                )));
            }
            return Err(AppError::LLMApi(format!("status {}: {}", status, error_text)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("failed to parse response: {}", e)))?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("response contained no choices".to_string()))?;

        let usage = chat
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LLMMessage;
    use mockito::Matcher;

    fn request() -> LLMRequest {
        LLMRequest {
            model: "gpt-4".to_string(),
            messages: vec![LLMMessage::user("How many rows?")],
            max_tokens: Some(256),
            temperature: Some(0.0),
            system_instruction: Some("You analyse tables.".to_string()),
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let adapter = OpenAIAdapter::with_base_url("k", "http://localhost:1234/v1/");
        assert_eq!(adapter.endpoint(), "http://localhost:1234/v1/chat/completions");
        assert_eq!(OpenAIAdapter::new("k").endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_chat_completion_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4",
                "temperature": 0.0,
                "messages": [
                    {"role": "system", "content": "You analyse tables."},
                    {"role": "user", "content": "How many rows?"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"42 rows"},"finish_reason":"stop"}],
                    "usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#,
            )
            .create_async()
            .await;

        let adapter = OpenAIAdapter::with_base_url("test-key", &server.url());
        let response = adapter.create_chat_completion(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "42 rows");
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.total_tokens, 12);
    }

    #[tokio::test]
    async fn test_chat_completion_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::with_base_url("bad", &server.url());
        let err = adapter.create_chat_completion(&request()).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Incorrect API key provided"));
        assert!(text.contains("invalid_api_key"));
    }

    #[tokio::test]
    async fn test_chat_completion_without_choices() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::with_base_url("k", &server.url());
        let err = adapter.create_chat_completion(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::LLMApi(msg) if msg.contains("no choices")));
    }
}
