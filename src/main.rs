//! Campaign Crew - multi-agent marketing operations service
//!
//! Keeps teams of LLM-driven agents alive across stateless chat requests,
//! drives their turn-taking loop, and exposes the result over HTTP.

mod api;
mod config;
mod context;
mod kinds;
mod llm;
mod session;
mod tools;

#[cfg(test)]
mod testing;

use api::{create_router, AppState};
use config::AppConfig;
use llm::{LlmService, UsageMeter};
use session::{ConversationEngine, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tools::ToolCatalog;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_crew=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env();

    // LLM service stack
    let usage = Arc::new(UsageMeter::default());
    let llm = llm::build_service(&config.llm, usage.clone());
    if config.llm.anthropic_api_key.is_none() && config.llm.gateway.is_none() {
        tracing::warn!("No LLM credentials configured. Set ANTHROPIC_API_KEY or LLM_GATEWAY.");
    } else {
        tracing::info!(model = %llm.model_id(), "LLM service initialized");
    }

    // Session manager with the default kinds
    let engine = ConversationEngine::new(llm, config.engine.clone());
    let manager = SessionManager::new(engine, ToolCatalog::new());
    kinds::register_default_kinds(&manager)?;
    tracing::info!(
        kinds = ?manager.kind_names(),
        max_round = config.engine.max_round,
        message_retry_ceiling = config.engine.message_retry_ceiling,
        session_restart_ceiling = config.engine.session_restart_ceiling,
        "Session manager ready"
    );

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(manager, usage))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Campaign Crew server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
