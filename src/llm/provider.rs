use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::llm::openai::OpenAIAdapter;
use crate::types::{AppResult, LLMProvider, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Configuration for the language-model client
pub struct LLMProviderConfig {
    pub provider: LLMProvider,
    pub api_key: String,
    /// Overrides the provider's default endpoint
    pub base_url: Option<String>,
}

pub struct LLM {
    adapter: Arc<dyn LLMAdapter>,
    provider: LLMProvider,
}

impl LLM {
    pub fn new(config: LLMProviderConfig) -> Self {
        let base_url = config
            .base_url
            .unwrap_or_else(|| config.provider.base_url().to_string());
        info!(provider = %config.provider, base_url = %base_url, "Creating LLM client");

        let adapter: Arc<dyn LLMAdapter> =
            Arc::new(OpenAIAdapter::with_base_url(&config.api_key, &base_url));

        Self {
            adapter,
            provider: config.provider,
        }
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }

    /// Shared handle to the underlying adapter, handed to agents
    pub fn adapter(&self) -> Arc<dyn LLMAdapter> {
        self.adapter.clone()
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}
