//! Table Question-Answering Agent
//!
//! Binds a language model to one uploaded table and answers questions about it
//! with a bounded reason/act loop:
//!
//! ```text
//! question
//!    │
//!    ▼
//! ┌──────────────┐   JSON commands   ┌──────────────────┐
//! │   LLM turn   │ ────────────────▶ │ CommandExecutor  │
//! │ (temp = 0)   │ ◀──────────────── │ (read-only)      │
//! └──────────────┘    observation    └──────────────────┘
//!    │
//!    ▼ final command / "Final Answer:"
//! answer
//! ```
//!
//! A command that fails is reported back to the model as an observation so it
//! can correct itself; only LLM failures, unparseable replies and running out of
//! iterations end the loop with an error.

pub mod commands;
pub mod prompts;

use std::sync::Arc;

use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::LLMAdapter;
use crate::types::{LLMMessage, LLMRequest};

pub use commands::{extract_commands, extract_final, Command, CommandError, CommandExecutor, ExecutionResult};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("Agent stopped after {0} iterations without a final answer")]
    MaxIterations(usize),

    #[error("Could not parse LLM output: {0}")]
    UnparseableResponse(String),
}

/// Sampling temperature for every agent call
pub const TEMPERATURE: f32 = 0.0;

/// Model and loop settings shared by every agent built in this process
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub max_iterations: usize,
    pub output_limit: usize,
    pub preview_rows: usize,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            max_iterations: config.agent.max_iterations,
            output_limit: config.agent.output_limit,
            preview_rows: config.agent.preview_rows,
        }
    }
}

/// One reason/act round
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub step: usize,
    pub commands: String,
    pub observation: String,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutput {
    pub output: String,
    pub steps: Vec<AgentStep>,
}

pub struct DataFrameAgent {
    llm: Arc<dyn LLMAdapter>,
    settings: AgentSettings,
    executor: CommandExecutor,
    system_prompt: String,
}

impl DataFrameAgent {
    pub fn new(llm: Arc<dyn LLMAdapter>, settings: AgentSettings, frame: Arc<DataFrame>) -> Self {
        let system_prompt = prompts::system_prompt(&frame, settings.preview_rows);
        Self {
            llm,
            executor: CommandExecutor::new(frame),
            settings,
            system_prompt,
        }
    }

    pub async fn invoke(&self, question: &str) -> Result<AgentOutput, AgentError> {
        info!(question_len = question.len(), model = %self.settings.model, "Agent invoked");

        let mut messages = vec![LLMMessage::user(question)];
        let mut steps: Vec<AgentStep> = Vec::new();

        for iteration in 1..=self.settings.max_iterations {
            let request = LLMRequest {
                model: self.settings.model.clone(),
                messages: messages.clone(),
                max_tokens: self.settings.max_tokens,
                temperature: Some(TEMPERATURE),
                system_instruction: Some(self.system_prompt.clone()),
            };

            let response = self
                .llm
                .create_chat_completion(&request)
                .await
                .map_err(|e| AgentError::Llm(e.to_string()))?;
            let reply = response.content;
            debug!(iteration, reply_len = reply.len(), "Agent received LLM reply");

            let Some(json) = extract_commands(&reply) else {
                if let Some(answer) = extract_final(&reply) {
                    info!(iteration, "Agent finished with plain-text answer");
                    return Ok(AgentOutput { output: answer, steps });
                }
                warn!(iteration, "LLM reply contained neither commands nor a final answer");
                return Err(AgentError::UnparseableResponse(prompts::truncate_output(
                    reply.trim(),
                    200,
                )));
            };

            let (observation, failed) = match self.executor.execute_json(&json) {
                Ok(ExecutionResult::Final { answer }) => {
                    info!(iteration, answer_len = answer.len(), "Agent finished");
                    return Ok(AgentOutput { output: answer, steps });
                }
                Ok(ExecutionResult::Continue { output }) => {
                    let output = prompts::truncate_output(&output, self.settings.output_limit);
                    (prompts::observation(&output), false)
                }
                Err(e) => {
                    debug!(iteration, error = %e, "Agent command failed");
                    (prompts::command_error(&e.to_string()), true)
                }
            };

            info!(iteration, commands = %json, failed, "Agent step");

            steps.push(AgentStep {
                step: iteration,
                commands: json,
                observation: observation.clone(),
                failed,
            });
            messages.push(LLMMessage::assistant(reply));
            messages.push(LLMMessage::user(observation));
        }

        warn!(max_iterations = self.settings.max_iterations, "Agent ran out of iterations");
        Err(AgentError::MaxIterations(self.settings.max_iterations))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted LLM used by agent, session and route tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::llm::LLMAdapter;
    use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, TokenUsage};

    pub struct ScriptedLLM {
        replies: Mutex<VecDeque<AppResult<String>>>,
        pub requests: Mutex<Vec<LLMRequest>>,
    }

    impl ScriptedLLM {
        pub fn new(replies: Vec<AppResult<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }
    }

    #[async_trait]
    impl LLMAdapter for ScriptedLLM {
        async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::LLMApi("script exhausted".to_string())));
            next.map(|content| LLMResponse {
                content,
                finish_reason: "stop".to_string(),
                usage: TokenUsage::default(),
            })
        }
    }
}
