use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::Json as ResponseJson,
    routing::post,
    Json, Router,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{AppState, UploadResponse};
use crate::session;
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    let limit = state.config.server.max_upload_bytes;
    Router::new()
        .route("/api/sessions/{id}/file", post(upload_file))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<ResponseJson<UploadResponse>> {
    let handle = state.sessions.get(id).await?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidRequest("Uploaded file has no name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("Failed to read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| AppError::InvalidRequest("Missing multipart field 'file'".to_string()))?;
    info!(session_id = %id, filename = %filename, size = bytes.len(), "File upload received");

    let preview = session::upload(
        &handle,
        &filename,
        bytes,
        state.llm.clone(),
        &state.agent_settings,
    )
    .await?;

    Ok(Json(UploadResponse {
        session_id: id,
        filename,
        preview,
    }))
}
