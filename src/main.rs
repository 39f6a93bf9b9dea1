//! pagechat - assistant chat panel for the page open in the browser
//!
//! Serves the panel's HTTP API and drives a Chrome instance over CDP so the
//! assistant can read the current page and fill in or click on it.

mod api;
mod browser;
mod conversation;
mod db;
mod instructions;
mod provider;
mod runtime;
mod tools;

use api::{create_router, AppState};
use browser::{BrowserPort, CdpBrowser, CdpConfig};
use db::Database;
use provider::{ProviderConfig, ProviderRegistry};
use runtime::{ChatSession, ConversationStore, DatabaseStorage, SessionConfig, TokenStorage};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::{
    compression::CompressionLayer,
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
                .unwrap_or_else(|_| "pagechat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("PAGECHAT_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.pagechat/pagechat.db")
    });

    let port: u16 = std::env::var("PAGECHAT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let auto_execute = std::env::var("PAGECHAT_AUTO_EXECUTE")
        .is_ok_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize storage
    tracing::info!(path = %db_path, "Opening database");
    let storage = Arc::new(DatabaseStorage::new(Database::open(&db_path)?));
    let tokens = TokenStorage::new(storage.clone());

    // Initialize providers
    let provider_config = ProviderConfig::from_env();
    let registry = ProviderRegistry::new(&provider_config, tokens.clone())?;
    let provider = registry
        .default_provider()
        .ok_or("Configured provider is not available")?;
    tracing::info!(
        provider = provider.name(),
        model = registry.default_model(),
        available = ?registry.available(),
        "Provider registry initialized"
    );

    // Attach to the browser
    let browser: Arc<dyn BrowserPort> = Arc::new(CdpBrowser::start(CdpConfig::from_env()).await?);

    // Start the chat session
    let store: Arc<dyn ConversationStore> = storage;
    let (session, handle) = ChatSession::new(
        SessionConfig {
            model: registry.default_model().to_string(),
            auto_execute,
        },
        store.clone(),
        provider,
        browser.clone(),
        Arc::new(ToolRegistry::page_actions()),
    );
    session.spawn();

    let state = AppState::new(handle, store, tokens, browser);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("pagechat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
