//! API Routes
//!
//! - `/` - The chat page
//! - `/api/health` - Health check
//! - `/api/sessions` - Session lifecycle
//! - `/api/sessions/{id}/file` - File upload and preview
//! - `/api/sessions/{id}/messages` - Conversation

pub mod chat;
pub mod files;
pub mod health;
pub mod sessions;
pub mod ui;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let api_router = Router::new()
        .merge(sessions::router(state.clone()))
        .merge(files::router(state.clone()))
        .merge(chat::router(state.clone()))
        .merge(health::router(state));

    Router::new()
        .merge(api_router)
        .merge(ui::router())
        .layer(TraceLayer::new_for_http())
}
