use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use tabletalk::{
    config::Config,
    llm::{LLMProviderConfig, LLM},
    routes::create_router,
    utils::init_tracing,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // A missing API key stops startup before anything binds
    let config = Config::from_env().inspect_err(|e| error!("Configuration error: {}", e))?;
    info!("Configuration loaded: {:?}", config.server);
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        api_key = %config.llm.masked_api_key(),
        "API key found"
    );

    let llm = LLM::new(LLMProviderConfig {
        provider: config.llm.provider,
        api_key: config.llm.api_key.clone(),
        base_url: config.llm.base_url.clone(),
    });

    let state = AppState::new(config.clone(), llm.adapter());
    state.sessions.spawn_sweeper(config.server.session_ttl);
    info!(ttl_secs = config.server.session_ttl.as_secs(), "Idle session sweeper started");
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
