// Type definitions shared across the crate

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::agent::AgentError;
use crate::ingest::IngestError;
use crate::session::SessionError;

/// OpenAI-compatible providers; they differ only in base URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LLMProvider {
    OpenAI,
    OpenRouter,
    Groq,
}

impl LLMProvider {
    pub fn base_url(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI => "https://api.openai.com/v1",
            LLMProvider::OpenRouter => "https://openrouter.ai/api/v1",
            LLMProvider::Groq => "https://api.groq.com/openai/v1",
        }
    }
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Groq => write!(f, "groq"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "openrouter" => Ok(LLMProvider::OpenRouter),
            "groq" => Ok(LLMProvider::Groq),
            other => Err(AppError::InvalidRequest(format!("Unsupported provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMRequest {
    pub model: String,
    pub messages: Vec<LLMMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LLMMessage {
    pub role: String, // "user", "assistant", "system"
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("LLM API error: {0}")]
    LLMApi(String),

    #[error("Error reading file: {0}")]
    Ingest(#[from] IngestError),

    #[error("An error occurred: {0}")]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::LLMApi(_) | AppError::Agent(_) => StatusCode::BAD_GATEWAY,
            AppError::Ingest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Session(e) => e.status_code(),
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        for provider in [LLMProvider::OpenAI, LLMProvider::OpenRouter, LLMProvider::Groq] {
            let parsed: LLMProvider = provider.to_string().parse().unwrap();
            assert_eq!(parsed, provider);
        }
        assert!("anthropic".parse::<LLMProvider>().is_err());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Ingest(IngestError::Empty).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::Agent(AgentError::MaxIterations(3)).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Session(SessionError::Busy).status_code(),
            StatusCode::CONFLICT
        );
    }
}
