//! batcall-classify - Bat call classification run engine
//!
//! Dispatches segmentations to an external classifier service in batches
//! and persists per-segment call probabilities. Runs are controlled over
//! HTTP (see `api::runs`).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use batcall_common::EngineConfig;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batcall_classify::services::{EngineContext, RunOrchestrator};
use batcall_classify::AppState;

/// Command-line arguments for batcall-classify
#[derive(Parser, Debug)]
#[command(name = "batcall-classify")]
#[command(about = "Bat call classification run engine")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config)
    #[arg(short, long, env = "BATCALL_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and tmp directory
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batcall_classify=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting batcall-classify v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::resolve(args.root_folder.as_deref(), args.config.as_deref())
        .context("Failed to resolve configuration")?;
    config
        .ensure_directories()
        .context("Failed to create root folder directories")?;

    info!("Root folder: {}", config.root_folder.display());
    info!("Database: {}", config.database_path.display());
    info!(
        "Tmp root: {} (classifier sees {})",
        config.path_mapping.local_prefix.display(),
        config.path_mapping.remote_prefix.display()
    );

    let db = batcall_classify::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;

    let stale = batcall_classify::db::runs::fail_stale_runs(&db)
        .await
        .context("Failed to recover interrupted runs")?;
    if stale > 0 {
        warn!(count = stale, "Marked runs interrupted by restart as failed");
    }

    let orchestrator = RunOrchestrator::new(db.clone(), EngineContext::from(&config))
        .context("Failed to build classifier client")?;
    let state = AppState::new(db, orchestrator);
    let app = batcall_classify::build_router(state);

    let port = args.port.unwrap_or(config.listen_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
