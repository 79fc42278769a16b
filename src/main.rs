use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use kcbridge::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kcbridge=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("kcbridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);
    if let Some(proxy) = &config.proxy {
        info!("Routing upstream traffic through {proxy}");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state: SharedState = Arc::new(AppState::new(config)?);

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolve on ctrl-c; in-flight connections get a bounded grace period from
/// axum's graceful shutdown before the process exits.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}
