mod api;
mod auth;
mod config;
mod error;
mod machines;
mod routes;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

use api::rest::AppState;
use auth::StaticTokenVerifier;
use config::Config;
use store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Mesh console starting...");

    let store = match &config.seed_file {
        Some(path) => MemoryStore::load(path, config.default_key_expiry_days).await?,
        None => {
            tracing::warn!("No seed file configured, starting with an empty store");
            MemoryStore::new()
        }
    };

    if config.tokens.is_empty() {
        tracing::warn!("No console tokens configured, every request will be rejected");
    }
    let verifier = StaticTokenVerifier::new(
        config
            .tokens
            .iter()
            .map(|entry| (entry.token.clone(), entry.claims())),
    );

    let state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(verifier),
        config.console.clone(),
    ));

    let mut app = api::rest::create_api_router(state);
    if let Some(static_dir) = &config.static_dir {
        tracing::info!("Serving console UI from {}", static_dir.display());
        app = app.nest_service("/console", ServeDir::new(static_dir));
    }

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port).parse()?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  http://{}/api/console/self", addr);
    tracing::info!("  GET  http://{}/api/console/machines", addr);
    tracing::info!("  POST http://{}/api/console/machines/update", addr);
    tracing::info!("  POST http://{}/api/console/machines/remove", addr);
    tracing::info!("  GET  http://{}/api/console/netsettings", addr);
    tracing::info!("  POST http://{}/api/console/netsettings/key-expiry", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
