//! logwarden -- anomaly detection for security log batches.
//!
//! This crate provides the detection engine (entity extraction, rule
//! catalog, finding aggregation, threat level reduction), optional AI
//! augmentation, log compression, and an HTTP API around them.

pub mod api;
pub mod augment;
pub mod compress;
pub mod config;
pub mod detect;

use anyhow::{Context, Result};

pub use config::Config;
pub use detect::{reduce_threat_level, DetectionResult, Detector, ThreatLevel};

/// Start the logwarden daemon: HTTP API on `config.server.bind`.
pub async fn serve(config: config::Config) -> Result<()> {
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;

    let state = api::state::AppState::from_config(config);
    tracing::info!(
        patterns = state.detector.patterns_loaded(),
        ai = state.detector.ai_available(),
        compressor = state.compressor.name(),
        "Detection engine ready"
    );
    let app = api::router(state);

    tracing::info!(%addr, "logwarden listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
