use anyhow::{Context, Result};
use lineup_core::OnnxEngine;
use tracing_subscriber::EnvFilter;

mod adapter;
mod config;
mod gallery;
mod http;
mod orchestrator;
mod store;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lineupd starting");

    let config = config::Config::load()?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        model_dir = %config.model_dir.display(),
        training_dir = %config.training_dir.display(),
        detection_mode = %config.detection_mode,
        training_mode = %config.training_mode,
        match_threshold = config.match_threshold,
        sample_policy = %config.sample_policy,
        "configuration loaded"
    );

    let engine = OnnxEngine::load(&config.model_dir)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))?;
    let adapter = adapter::spawn_engine(engine, config.engine_queue_depth)
        .context("failed to spawn engine thread")?;
    let store = store::SampleStore::open(&config.training_dir).await?;
    tracing::info!(root = %store.root().display(), "sample store opened");

    let state = http::AppState::new(&config, store, adapter);

    if config.rebuild_on_start {
        match state.builder.rebuild().await {
            Ok(report) => tracing::info!(
                version = report.gallery.version(),
                entries = report.gallery.len(),
                "startup gallery ready"
            ),
            Err(e) => tracing::warn!(error = %e, "startup rebuild failed; serving empty gallery"),
        }
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "lineupd ready");

    axum::serve(listener, http::router(state, config.max_body_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("lineupd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
