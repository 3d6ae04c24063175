//! Chat sessions
//!
//! A session is one browser page's worth of state: the uploaded table, the
//! agent bound to it, and the conversation log. Each session is driven by one
//! event at a time:
//!
//! ```text
//! Idle ──upload──▶ AwaitingInput ──message──▶ Invoking ──ok──▶ AwaitingInput
//!                                                │
//!                                                └─err/cancel──▶ ErrorDisplayed
//!
//! ErrorDisplayed ──next event──▶ AwaitingInput (or Idle without a dataset)
//! ```
//!
//! The session lock is released while the agent runs, so the page can keep
//! polling; a second message or upload during `Invoking` is refused. If the
//! request driving the agent is dropped, the session leaves `Invoking` anyway.

pub mod store;

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentError, AgentOutput, AgentSettings, AgentStep, DataFrameAgent};
use crate::ingest::{self, FileKind};
use crate::llm::LLMAdapter;
use crate::table;
use crate::types::{AppError, AppResult};

pub use store::{SessionHandle, SessionStore};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("Still analyzing the previous request, please wait")]
    Busy,

    #[error("Please upload a file to begin analysis")]
    NoDataset,

    #[error("Message must not be empty")]
    EmptyMessage,
}

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Busy | SessionError::NoDataset => StatusCode::CONFLICT,
            SessionError::EmptyMessage => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of the exchanges in one session
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    fn push(&mut self, role: ChatRole, content: String) -> &ChatMessage {
        self.messages.push(ChatMessage {
            role,
            content,
            created_at: Utc::now(),
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No dataset loaded
    Idle,
    /// Dataset loaded, waiting for a question
    AwaitingInput,
    Invoking,
    ErrorDisplayed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: String,
}

/// First rows of an uploaded table, as shown above the chat
#[derive(Debug, Clone, Serialize)]
pub struct DatasetPreview {
    pub filename: String,
    pub kind: FileKind,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
    pub total_columns: usize,
}

impl DatasetPreview {
    pub fn build(filename: &str, kind: FileKind, frame: &DataFrame, rows: usize) -> Self {
        let (total_rows, total_columns) = frame.shape();
        Self {
            filename: filename.to_string(),
            kind,
            columns: table::schema(frame)
                .into_iter()
                .map(|(name, dtype)| ColumnInfo { name, dtype })
                .collect(),
            rows: table::text_rows(&frame.head(Some(rows))),
            total_rows,
            total_columns,
        }
    }
}

/// The current upload and the agent bound to it
pub struct LoadedDataset {
    pub preview: DatasetPreview,
    pub agent: Arc<DataFrameAgent>,
}

/// Answer to one question
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub message: ChatMessage,
    pub steps: Vec<AgentStep>,
}

/// Serializable snapshot of a session for the page
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub dataset: Option<DatasetPreview>,
    pub messages: Vec<ChatMessage>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct Session {
    id: Uuid,
    phase: SessionPhase,
    log: ConversationLog,
    dataset: Option<LoadedDataset>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            phase: SessionPhase::Idle,
            log: ConversationLog::default(),
            dataset: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn dataset(&self) -> Option<&LoadedDataset> {
        self.dataset.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id,
            phase: self.phase,
            dataset: self.dataset.as_ref().map(|d| d.preview.clone()),
            messages: self.log.messages().to_vec(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
        }
    }

    /// Phase to rest in between events
    fn ready_phase(&self) -> SessionPhase {
        if self.dataset.is_some() {
            SessionPhase::AwaitingInput
        } else {
            SessionPhase::Idle
        }
    }

    /// Start handling a new UI event
    fn begin_event(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Invoking => Err(SessionError::Busy),
            SessionPhase::ErrorDisplayed => {
                self.phase = self.ready_phase();
                self.last_error = None;
                Ok(())
            }
            SessionPhase::Idle | SessionPhase::AwaitingInput => Ok(()),
        }
    }

    pub fn ensure_ready(&mut self) -> Result<(), SessionError> {
        self.begin_event()
    }

    /// Replace the dataset; the previous agent is dropped with it
    pub fn attach_dataset(&mut self, dataset: LoadedDataset) -> Result<(), SessionError> {
        self.begin_event()?;
        self.dataset = Some(dataset);
        self.last_error = None;
        self.phase = SessionPhase::AwaitingInput;
        Ok(())
    }

    /// A failed upload unloads whatever was loaded before
    pub fn record_upload_failure(&mut self, error: String) -> Result<(), SessionError> {
        self.begin_event()?;
        self.dataset = None;
        self.last_error = Some(error);
        self.phase = SessionPhase::Idle;
        Ok(())
    }

    /// Record the question and hand back the agent to run it with
    pub fn begin_question(&mut self, question: &str) -> Result<Arc<DataFrameAgent>, SessionError> {
        self.begin_event()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let agent = self
            .dataset
            .as_ref()
            .map(|d| d.agent.clone())
            .ok_or(SessionError::NoDataset)?;

        self.log.push(ChatRole::User, question.to_string());
        self.phase = SessionPhase::Invoking;
        Ok(agent)
    }

    /// Record the outcome of the question started by `begin_question`.
    /// Errors are not logged as answers; the question stays unanswered.
    pub fn finish_question(&mut self, result: Result<AgentOutput, AgentError>) -> Result<Answer, AgentError> {
        match result {
            Ok(output) => {
                let message = self.log.push(ChatRole::Assistant, output.output).clone();
                self.phase = SessionPhase::AwaitingInput;
                self.last_error = None;
                Ok(Answer {
                    message,
                    steps: output.steps,
                })
            }
            Err(e) => {
                self.phase = SessionPhase::ErrorDisplayed;
                self.last_error = Some(format!("An error occurred: {}", e));
                Err(e)
            }
        }
    }

    /// Give up on a question whose answer will never be recorded
    fn abandon_question(&mut self) {
        if self.phase == SessionPhase::Invoking {
            warn!(session_id = %self.id, "Question abandoned before the agent finished");
            self.phase = SessionPhase::ErrorDisplayed;
            self.last_error = Some(format!("An error occurred: {}", CANCELLED));
        }
    }
}

const CANCELLED: &str = "Request was cancelled before an answer arrived";

/// Moves the session out of `Invoking` if `ask` is dropped before it records
/// the outcome
struct InvokingGuard {
    handle: Option<SessionHandle>,
}

impl InvokingGuard {
    fn new(handle: &SessionHandle) -> Self {
        Self {
            handle: Some(handle.clone()),
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InvokingGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Ok(mut session) = handle.try_lock() {
            session.abandon_question();
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                handle.lock().await.abandon_question();
            });
        }
    }
}

/// Parse an upload and bind a fresh agent to it
pub async fn upload(
    handle: &SessionHandle,
    filename: &str,
    bytes: bytes::Bytes,
    llm: Arc<dyn LLMAdapter>,
    settings: &AgentSettings,
) -> AppResult<DatasetPreview> {
    let session_id = {
        let mut session = handle.lock().await;
        session.ensure_ready()?;
        session.id()
    };

    let parse_name = filename.to_string();
    let parsed = tokio::task::spawn_blocking(move || {
        let kind = FileKind::from_filename(&parse_name)?;
        ingest::parse_upload(&parse_name, &bytes).map(|frame| (kind, frame))
    })
    .await
    .map_err(|e| AppError::Internal(format!("upload task failed: {}", e)))?;

    let mut session = handle.lock().await;
    match parsed {
        Ok((kind, frame)) => {
            let frame = Arc::new(frame);
            let preview = DatasetPreview::build(filename, kind, &frame, settings.preview_rows);
            let agent = Arc::new(DataFrameAgent::new(llm, settings.clone(), frame));
            session.attach_dataset(LoadedDataset {
                preview: preview.clone(),
                agent,
            })?;
            info!(
                %session_id,
                filename,
                rows = preview.total_rows,
                columns = preview.total_columns,
                "Dataset loaded"
            );
            Ok(preview)
        }
        Err(e) => {
            let error = AppError::Ingest(e);
            warn!(%session_id, filename, error = %error, "Upload rejected");
            session.record_upload_failure(error.to_string())?;
            Err(error)
        }
    }
}

/// Ask the session's agent a question. The agent runs without holding the
/// session lock.
pub async fn ask(handle: &SessionHandle, question: &str) -> AppResult<Answer> {
    let (session_id, agent) = {
        let mut session = handle.lock().await;
        let agent = session.begin_question(question)?;
        (session.id(), agent)
    };
    let guard = InvokingGuard::new(handle);
    info!(%session_id, question_len = question.len(), "Analyzing question");

    let result = agent.invoke(question.trim()).await;

    let mut session = handle.lock().await;
    let finished = session.finish_question(result);
    guard.disarm();
    match finished {
        Ok(answer) => {
            info!(%session_id, messages = session.log().len(), "Question answered");
            Ok(answer)
        }
        Err(e) => {
            warn!(%session_id, error = %e, "Agent invocation failed");
            Err(AppError::Agent(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::agent::testing::ScriptedLLM;
    use crate::types::{AppError, LLMRequest, LLMResponse};

    /// Never answers
    struct PendingLLM;

    #[async_trait]
    impl LLMAdapter for PendingLLM {
        async fn create_chat_completion(&self, _request: &LLMRequest) -> AppResult<LLMResponse> {
            std::future::pending().await
        }
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            model: "gpt-4".to_string(),
            max_tokens: None,
            max_iterations: 4,
            output_limit: 4000,
            preview_rows: 5,
        }
    }

    fn handle() -> SessionHandle {
        Arc::new(Mutex::new(Session::new(Uuid::new_v4())))
    }

    fn csv(rows: usize) -> bytes::Bytes {
        let mut text = String::from("id,value\n");
        for i in 0..rows {
            text.push_str(&format!("{},{}\n", i, i * 10));
        }
        bytes::Bytes::from(text)
    }

    #[tokio::test]
    async fn test_upload_preview_is_capped_at_five_rows() {
        let llm = Arc::new(ScriptedLLM::replying(&[]));
        let h = handle();

        let preview = upload(&h, "big.csv", csv(12), llm.clone(), &settings()).await.unwrap();
        assert_eq!(preview.rows.len(), 5);
        assert_eq!(preview.total_rows, 12);

        let preview = upload(&h, "small.csv", csv(3), llm, &settings()).await.unwrap();
        assert_eq!(preview.rows.len(), 3);
        assert_eq!(preview.rows[0], vec!["0", "0"]);
        assert_eq!(h.lock().await.view().dataset.unwrap().filename, "small.csv");
    }

    #[tokio::test]
    async fn test_failed_upload_disables_chat() {
        let llm = Arc::new(ScriptedLLM::replying(&[]));
        let h = handle();
        upload(&h, "good.csv", csv(2), llm.clone(), &settings()).await.unwrap();

        let err = upload(&h, "notes.txt", bytes::Bytes::from_static(b"hello"), llm, &settings())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Ingest(_)));

        let session = h.lock().await;
        assert!(session.dataset().is_none());
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.last_error().unwrap().contains("Unsupported file type"));
        drop(session);

        let err = ask(&h, "how many rows?").await.unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::NoDataset)));
        assert!(h.lock().await.log().is_empty());
    }

    #[tokio::test]
    async fn test_roles_alternate_for_completed_exchanges() {
        let llm = Arc::new(ScriptedLLM::replying(&[
            "Final Answer: 2 rows",
            "{\"op\": \"aggregate\", \"column\": \"value\", \"func\": \"sum\"}",
            "Final Answer: the sum is 10",
        ]));
        let h = handle();
        upload(&h, "d.csv", csv(2), llm, &settings()).await.unwrap();

        let first = ask(&h, "how many rows?").await.unwrap();
        assert_eq!(first.message.content, "2 rows");
        let second = ask(&h, "  total value?  ").await.unwrap();
        assert_eq!(second.message.role, ChatRole::Assistant);
        assert_eq!(second.steps.len(), 1);

        let session = h.lock().await;
        let roles: Vec<ChatRole> = session.log().messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::User, ChatRole::Assistant]
        );
        assert_eq!(session.log().messages()[2].content, "total value?");
        assert_eq!(session.phase(), SessionPhase::AwaitingInput);
    }

    #[tokio::test]
    async fn test_agent_error_records_no_answer() {
        let llm = Arc::new(ScriptedLLM::new(vec![
            Err(AppError::LLMApi("boom".into())),
            Ok("Final Answer: recovered".to_string()),
        ]));
        let h = handle();
        upload(&h, "d.csv", csv(2), llm, &settings()).await.unwrap();

        let err = ask(&h, "first question").await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        {
            let session = h.lock().await;
            assert_eq!(session.phase(), SessionPhase::ErrorDisplayed);
            assert_eq!(session.log().len(), 1);
            assert_eq!(session.log().messages()[0].role, ChatRole::User);
            assert!(session.last_error().unwrap().contains("boom"));
        }

        // The conversation carries on after an error
        ask(&h, "second question").await.unwrap();
        let session = h.lock().await;
        assert_eq!(session.log().len(), 3);
        assert_eq!(session.phase(), SessionPhase::AwaitingInput);
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_busy_session_rejects_new_events() {
        let llm = Arc::new(ScriptedLLM::replying(&[]));
        let h = handle();
        upload(&h, "d.csv", csv(2), llm.clone(), &settings()).await.unwrap();

        let mut session = h.lock().await;
        session.begin_question("slow question").unwrap();
        assert_eq!(session.phase(), SessionPhase::Invoking);
        assert!(matches!(session.begin_question("again"), Err(SessionError::Busy)));
        drop(session);

        let err = upload(&h, "d.csv", csv(2), llm, &settings()).await.unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::Busy)));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let llm = Arc::new(ScriptedLLM::replying(&[]));
        let h = handle();
        upload(&h, "d.csv", csv(1), llm, &settings()).await.unwrap();
        let err = ask(&h, "   ").await.unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::EmptyMessage)));
        assert!(h.lock().await.log().is_empty());
    }

    #[tokio::test]
    async fn test_phases_follow_dataset_and_questions() {
        let llm = Arc::new(ScriptedLLM::replying(&["Final Answer: ok"]));
        let h = handle();
        assert_eq!(h.lock().await.phase(), SessionPhase::Idle);

        upload(&h, "d.csv", csv(2), llm, &settings()).await.unwrap();
        assert_eq!(h.lock().await.phase(), SessionPhase::AwaitingInput);
        assert_eq!(h.lock().await.view().dataset.unwrap().columns[0].dtype, "i64");

        ask(&h, "anything?").await.unwrap();
        assert_eq!(h.lock().await.phase(), SessionPhase::AwaitingInput);
    }

    #[tokio::test]
    async fn test_cancelled_question_releases_session() {
        let h = handle();
        upload(&h, "d.csv", csv(2), Arc::new(PendingLLM), &settings()).await.unwrap();

        let task = tokio::spawn({
            let h = h.clone();
            async move { ask(&h, "never answered").await }
        });
        for _ in 0..100 {
            if h.lock().await.phase() == SessionPhase::Invoking {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.lock().await.phase(), SessionPhase::Invoking);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let mut session = h.lock().await;
        assert_eq!(session.phase(), SessionPhase::ErrorDisplayed);
        assert!(session.last_error().unwrap().contains("cancelled"));
        assert_eq!(session.log().len(), 1);
        session.begin_question("try again").unwrap();
        assert_eq!(session.phase(), SessionPhase::Invoking);
    }
}
