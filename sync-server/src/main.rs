//! otpsync-server binary entry point.
//!
//! Usage:
//! ```bash
//! otpsync-server --config server.toml
//! OTPSYNC_SIGNING_SECRET=... otpsync-server --bind 127.0.0.1:3000
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use otpsync_server::cleanup::spawn_maintenance_task;
use otpsync_server::config::Config;
use otpsync_server::http::{self, health};
use otpsync_server::server::AppState;
use otpsync_server::storage::SqliteStorage;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Identity-gated sync server for encrypted two-factor vault records.
#[derive(Parser, Debug)]
#[command(name = "otpsync-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "server.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(database) = cli.database {
        config.storage.database = database;
    }

    // RUST_LOG wins over logging.level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    health::init_start_time();
    tracing::info!("otpsync-server v{} starting", env!("CARGO_PKG_VERSION"));

    let storage = SqliteStorage::new(&config.storage.database, config.storage.max_connections)
        .await
        .context("Failed to open database")?;

    let cleanup_config = config.cleanup.clone();
    let bind_address = config.server.bind_address.clone();
    let state = Arc::new(AppState::new(config, storage));

    state
        .bootstrap_admin()
        .await
        .context("Failed to bootstrap admin account")?;

    let maintenance = spawn_maintenance_task(state.rate_limits().clone(), cleanup_config);

    let app = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
