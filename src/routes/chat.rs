use axum::{
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::models::{AppState, ChatRequest, ChatResponse, MessagesResponse};
use crate::session;
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions/{id}/messages", get(get_messages).post(post_message))
        .with_state(state)
}

async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<ResponseJson<MessagesResponse>> {
    let handle = state.sessions.get(id).await?;
    let messages = handle.lock().await.log().messages().to_vec();
    Ok(Json(MessagesResponse {
        session_id: id,
        messages,
    }))
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> AppResult<ResponseJson<ChatResponse>> {
    let handle = state.sessions.get(id).await?;
    let answer = session::ask(&handle, &request.message).await?;
    let messages = handle.lock().await.log().messages().to_vec();

    Ok(Json(ChatResponse {
        reply: answer.message,
        steps: answer.steps,
        messages,
    }))
}
