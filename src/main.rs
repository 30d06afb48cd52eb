//! pagemate - backend for a browser-embedded AI assistant
//!
//! Streams chat-completion replies to the tab that asked for them and keeps
//! conversation history in a local SQLite key-value store.

mod api;
mod channel;
mod chat;
mod config;
mod db;
mod llm;
mod router;
mod settings;
mod store;

#[cfg(test)]
mod testing;

use api::{create_router, AppState};
use channel::TargetRegistry;
use chat::ConversationManager;
use config::ServerConfig;
use db::Database;
use llm::{CompletionService, LoggingService, OpenAIService};
use router::RequestRouter;
use settings::SettingsStore;
use std::net::SocketAddr;
use std::sync::Arc;
use store::ConversationStore;
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
                .unwrap_or_else(|_| "pagemate=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = ServerConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let kv = Arc::new(Database::open(&config.db_path)?);

    let settings = SettingsStore::new(kv.clone(), config.openai_api_key.clone());
    let current = settings.load().await?;
    if current.api_key().is_none() {
        tracing::warn!("No API key configured. Set OPENAI_API_KEY or save one in settings.");
    }
    tracing::info!(model = %current.model(), endpoint = %config.completions_url, "Completion service configured");

    let completions: Arc<dyn CompletionService> = Arc::new(LoggingService::new(Arc::new(
        OpenAIService::new(config.completions_url.clone(), settings.clone())?,
    )));
    let manager = Arc::new(ConversationManager::new(
        ConversationStore::new(kv),
        completions.clone(),
    ));
    let targets = Arc::new(TargetRegistry::new());
    let router = Arc::new(RequestRouter::new(
        manager,
        completions,
        settings,
        targets.clone(),
    ));

    let state = AppState::new(router, targets);

    // Extension pages and content scripts call in from arbitrary origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    tracing::info!("pagemate server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
