//! Chart Cache - A rendering cache for report chart images
//!
//! Serves chart PNGs from the chart pool, report slots, or the file cache,
//! rendering them through the configured backend when they are stale.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chart_cache::api::create_router;
use chart_cache::{spawn_sweep_task, AppState, Config};

/// Main entry point for the chart cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the chart cache and create the cache directory
/// 4. Start background file cache sweep
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chart_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Chart Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: cache_dir={}, file_cache_ttl={}s, port={}, sweep_interval={}s, render_base_url={}",
        config.cache_dir.display(),
        config.file_cache_ttl,
        config.server_port,
        config.sweep_interval,
        config.render_base_url
    );

    let state = AppState::from_config(&config).context("building chart cache")?;
    state
        .cache
        .files()
        .ensure_root()
        .await
        .context("creating cache directory")?;
    info!("Chart cache initialized");

    let sweep_handle = spawn_sweep_task(
        state.cache.clone(),
        Duration::from_secs(config.file_cache_ttl),
        config.sweep_interval,
    );
    info!("Background sweep task started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep_handle))
        .await
        .context("serving http")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep task and allows graceful shutdown.
async fn shutdown_signal(sweep_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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

    sweep_handle.abort();
    warn!("Sweep task aborted");
}
