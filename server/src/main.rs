mod auth;
mod error;
mod registry;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use drivehub_core::config::AppConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Serve configured drives over HTTP.
#[derive(Parser, Debug)]
#[command(name = "drivehub", version, about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "drivehub.json")]
    config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("drivehub {} starting", VERSION);

    let mut config = AppConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let registry = registry::build_registry();
    let state = Arc::new(state::AppState::new(&config, &registry));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("Listening on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Shutdown requested");
        signal.cancel();
    });

    let sweeper = state::spawn_task_sweeper(state.clone(), SWEEP_INTERVAL, shutdown.clone());

    let app = routes::router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    let _ = sweeper.await;
    state.tasks.cancel_all();
    info!("drivehub stopped");
    Ok(())
}
