// tabletalk - chat with a CSV or Excel file through an LLM agent

pub mod agent;
pub mod config;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod routes;
pub mod session;
pub mod table;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
