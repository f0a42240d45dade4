//! HTTP front end for the genrelay job engine.

use std::sync::Arc;

use anyhow::{Context, Result};
use genrelay_jobs::{JobEngine, ProcessGenerator};
use tokio_util::sync::CancellationToken;

mod auth;
pub mod config;
pub mod http_server;

pub use config::{CliOverrides, HttpAuthConfig, HttpCorsConfig, ServerConfig};
pub use http_server::{router, MAX_WAIT_MS};

/// Builds the engine from `config`.
///
/// A missing generator binary or an output directory that cannot be created
/// is fatal here, before the listener is bound.
pub async fn build_engine(config: &ServerConfig) -> Result<Arc<JobEngine>> {
    let generator = ProcessGenerator::new(config.generator.clone(), config.root.clone())
        .context("Invalid generator configuration")?;

    let engine = JobEngine::new(
        config.layout.clone(),
        config.jobs.clone(),
        Arc::new(generator),
    );
    engine
        .prepare_output_dirs()
        .await
        .context("Failed to prepare output directories")?;

    tracing::info!(
        root = %config.root.display(),
        image_dir = %config.layout.image_dir.display(),
        text_dir = %config.layout.text_dir.display(),
        history = config.layout.history_enabled,
        "job engine ready"
    );
    Ok(Arc::new(engine))
}

/// Serves until `shutdown` is cancelled.
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let engine = build_engine(&config).await?;
    http_server::serve(engine, &config, shutdown).await
}
