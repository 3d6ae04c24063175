use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::models::{AppState, SessionCreated};
use crate::session::SessionView;
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .with_state(state)
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, ResponseJson<SessionCreated>) {
    let (session_id, _) = state.sessions.create().await;
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<ResponseJson<SessionView>> {
    let handle = state.sessions.get(id).await?;
    let view = handle.lock().await.view();
    Ok(Json(view))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.sessions.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
