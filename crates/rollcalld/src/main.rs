use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::ResolutionEngine;
use rollcall_store::SqliteStore;
use rollcalld::{router, AppState, Config, HttpEmbedder};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcalld", about = "Rollcall face attendance daemon")]
struct Args {
    /// Optional TOML config file; ROLLCALL_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("failed to load config")?;

    tracing::info!(
        listen = %config.listen_addr,
        db = %config.db_path.display(),
        embedder = %config.embedder_url,
        metric = %config.metric,
        threshold = config.match_threshold,
        "rollcalld starting"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    let embedder = HttpEmbedder::new(config.embedder_url.clone(), config.embed_timeout())
        .context("failed to build embedder client")?;

    let engine = ResolutionEngine::new(store, embedder, config.engine_settings());
    let app = router(AppState::new(engine, config.api_limits()));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
