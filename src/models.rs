use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentSettings, AgentStep};
use crate::config::Config;
use crate::llm::LLMAdapter;
use crate::session::{ChatMessage, DatasetPreview, SessionStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub llm: Arc<dyn LLMAdapter>,
    pub agent_settings: AgentSettings,
}

impl AppState {
    pub fn new(config: Config, llm: Arc<dyn LLMAdapter>) -> Self {
        let agent_settings = AgentSettings::from_config(&config);
        Self {
            config,
            sessions: SessionStore::new(),
            llm,
            agent_settings,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub provider: String,
    pub model: String,
    pub sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: Uuid,
    pub filename: String,
    pub preview: DatasetPreview,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: ChatMessage,
    pub steps: Vec<AgentStep>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub session_id: Uuid,
    pub messages: Vec<ChatMessage>,
}
