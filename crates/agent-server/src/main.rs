//! agent-server
//!
//! Axum-based server exposing the veterinary assistant over a REST API.

use std::sync::Arc;

use anyhow::Context;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{LlmProvider, Orchestrator};
use agent_runtime::AnthropicProvider;
use agent_server::{AppState, ProcessLauncher, ServerConfig, SessionManager, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    // Initialize model service
    let provider = Arc::new(AnthropicProvider::from_env().context("configuring the Anthropic provider")?);
    let model = provider.info().model;
    match provider.health_check().await {
        Ok(true) => tracing::info!(%model, "✓ Connected to the Anthropic API"),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Anthropic API not reachable - chat requests will fail");
            tracing::warn!("  Check ANTHROPIC_API_KEY and ANTHROPIC_BASE_URL");
        }
    }

    let orchestrator = Orchestrator::new(provider.clone(), config.orchestrator_config(&model));
    let sessions = SessionManager::new(Arc::new(ProcessLauncher::new(config.session_config())));
    let state = AppState::new(provider, orchestrator, sessions);
    let sessions = Arc::clone(&state.sessions);

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 vet assistant running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Tool server: {}", config.tool_server.program);
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health              - Health check");
    tracing::info!("  POST   /api/chat            - Send message");
    tracing::info!("  DELETE /api/sessions/{{id}}   - End a chat session");
    tracing::info!("  GET    /api/tools           - Tool catalog");
    tracing::info!("  GET    /api/patients[/{{id}}] - Patient records");
    tracing::info!("  POST   /api/patients        - Register a patient");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    tracing::info!("All sessions closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
