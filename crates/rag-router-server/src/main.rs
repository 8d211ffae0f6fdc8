use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

use rag_router_server::{build_router, config::Settings, logging, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logger()?;

    info!("🚀 Starting RAG router server...");

    let settings = Settings::load()?;
    info!(
        "✅ Configuration loaded (strategy: {}, knowledge: {})",
        settings.routing.strategy, settings.knowledge.path
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::new(settings);
    info!(
        "✅ Knowledge base loaded: {} items",
        state.rag_service.knowledge_len()
    );

    state.rag_service.start_precompute();
    info!("✅ Embedding precompute started in background");

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
