//! HTTP service
//!
//! One router serves every route:
//!
//! - `GET /` health check
//! - `POST /process-image/` mosaic removal, returns the processed image
//! - `POST /upload` blur-only flow, returns a base64 PNG inline

pub mod error;
pub mod routes;
pub mod upload;

use crate::config::ServiceConfig;
use crate::error::{MosaicError, Result};
use crate::model::ModelHandle;
use crate::processor::{MosaicRemovalProcessor, ProcessorConfig};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;

pub use error::ApiError;

/// State shared by all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub processor: Arc<MosaicRemovalProcessor>,
    /// Root under which each request stages its upload
    pub temp_dir: PathBuf,
}

impl AppState {
    #[must_use]
    pub fn new(processor: MosaicRemovalProcessor, temp_dir: PathBuf) -> Self {
        Self {
            processor: Arc::new(processor),
            temp_dir,
        }
    }

    /// Build the state for a service configuration around an existing model
    #[must_use]
    pub fn from_config(config: &ServiceConfig, model: Arc<ModelHandle>) -> Self {
        let processor = MosaicRemovalProcessor::new(ProcessorConfig::from(config), model);
        Self::new(processor, config.temp_dir.clone())
    }
}

/// Build the router with a request body limit of `max_upload_bytes`
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/process-image/", post(routes::process_image))
        .route("/upload", post(routes::upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Run the service until Ctrl-C
///
/// With `preload_model` set the model is initialized before binding and a
/// failure aborts startup.
///
/// # Errors
/// - Invalid configuration
/// - Directories cannot be created
/// - Model preload failure
/// - Address cannot be bound
pub async fn serve(config: ServiceConfig, model: Arc<ModelHandle>) -> Result<()> {
    config.validate()?;

    for dir in [&config.temp_dir, &config.output_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| MosaicError::file_io_error("create directory", dir, &e))?;
    }

    if config.preload_model {
        tracing::info!("Preloading model");
        model.ensure_loaded().await?;
    }

    let app = router(
        AppState::from_config(&config, model),
        config.max_upload_bytes,
    );

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| MosaicError::internal(format!("Failed to bind {address}: {e}")))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
