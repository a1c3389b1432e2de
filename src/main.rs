//! Tiered Cache - predictive multi-tier cache server
//!
//! Serves the cache's admin API over HTTP, loading misses from a content
//! directory.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiered_cache::{create_router, AppState, CacheService, Config, ContentDirLoader, ServiceParts};

/// Main entry point for the tiered cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Build the cache service (file-backed when `DATA_DIR` is set)
/// 4. Start the service: re-index tiers, restore patterns, spawn maintenance
/// 5. Serve the Axum router on the configured port
/// 6. On SIGINT/SIGTERM stop accepting requests, then stop the service
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tiered Cache Server");

    let config = Config::from_env();
    config.validate()?;
    info!(
        "Configuration loaded: fast={}B, mid={}B, cold={}B, default_ttl={}s, port={}",
        config.fast_max,
        config.mid_max,
        config.cold_max,
        config.default_ttl.as_secs(),
        config.server_port
    );

    let origin = Arc::new(ContentDirLoader::new(&config.content_dir));
    let parts = ServiceParts::from_config(&config, origin.clone()).await?;
    let port = config.server_port;
    let service = Arc::new(CacheService::new(config, parts)?);
    service.start().await?;

    let app = create_router(AppState::new(service.clone(), origin));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = service.stop().await {
        warn!("Cache service did not stop cleanly: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
