use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use coach_api_server::config::Settings;
use coach_api_server::services::conversation::{
    CheckpointedEngine, ConversationManager, MemoryCheckpointer, PromptCatalog,
};
use coach_api_server::services::LlmService;
use coach_api_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,coach_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("🏦 Starting financial coach API...");

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "✅ Configuration loaded (model={}, base_url={})",
        settings.llm.model, settings.llm.base_url
    );

    // Initialize services
    let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let engine = Arc::new(CheckpointedEngine::new(llm_service, checkpointer));

    let prompts = PromptCatalog::from_config(&settings.prompts);
    let conversation_manager = Arc::new(ConversationManager::new(
        engine,
        prompts,
        settings.conversation.purge_on_reset,
    ));
    if !settings.conversation.purge_on_reset {
        info!("Cleared conversations keep their checkpoints (conversation.purge_on_reset=false)");
    }

    // Build router
    let app = build_router(AppState::new(conversation_manager));

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
