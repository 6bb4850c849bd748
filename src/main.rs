//! Remote Torrent Server
//!
//! Keeps a registry of torrent transfers in sync with a transfer session and
//! serves it over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_torrent_server::config::Config;
use remote_torrent_server::engine::Engine;
use remote_torrent_server::routes;
use remote_torrent_server::session::memory::MemorySessionFactory;
use remote_torrent_server::state::AppState;
use remote_torrent_server::store::DescriptorStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remote_torrent_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing::info!("Starting Remote Torrent Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Download directory: {}", config.engine.download_directory.display());
    tracing::info!("Descriptor directory: {}", config.engine.descriptor_directory.display());

    let engine = Engine::new(
        Arc::new(MemorySessionFactory::new()),
        DescriptorStore::new(&config.engine.descriptor_directory),
        config.engine.grace_period(),
    );

    // A failed first session leaves the API up; PUT /api/config can retry
    match engine.reconfigure(config.engine.session_params()).await {
        Ok(_) => {
            let restored = engine.restore().await;
            tracing::info!("Restored {} torrents", restored);
        }
        Err(e) => {
            tracing::warn!("Initial session not started: {}", e);
        }
    }

    if config.engine.refresh_interval_secs > 0 {
        engine.spawn_refresh_task(std::time::Duration::from_secs(
            config.engine.refresh_interval_secs,
        ));
    }

    let app = routes::app(AppState::new(config.clone(), engine));

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Remote Torrent Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
