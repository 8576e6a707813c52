//! Tandem sync server
//!
//! Runs the sync engine (job workers and the schedule tick) behind a JSON
//! HTTP API.
//!
//! Usage:
//!   TANDEM_TOKEN_KEY=<base64 key> tandem-server --config tandem.toml
//!
//! The token key encrypts stored OAuth tokens and must stay the same across
//! restarts.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tandem_server::{build_registry, build_router, build_service, open_store, AppState, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tandem-server")]
#[command(about = "Cross-service sync engine and HTTP API")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the configured address
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.listen.set_port(port);
    }
    init_logging(&config.log_filter, args.verbose);

    info!("Tandem server starting...");
    let key = config.token_key()?;
    let store = Arc::new(open_store(&config, &key)?);
    let registry = build_registry(&config.adapters)?;
    let service = Arc::new(build_service(&config, registry, store).await?);

    let shutdown = CancellationToken::new();
    let engine = service.start(shutdown.clone());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(
        addr = %listener.local_addr()?,
        workers = config.sync.worker_count,
        services = service.list_services().len(),
        "HTTP API listening"
    );

    axum::serve(listener, build_router(AppState::new(Arc::clone(&service))))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("HTTP server failed")?;

    engine.shutdown().await;
    info!("Tandem server stopped");
    Ok(())
}

fn init_logging(default_filter: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for ctrl-c");
            }
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
}
