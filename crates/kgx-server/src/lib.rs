//! kgx Server
//!
//! HTTP surface over the task service: task creation, status, listing,
//! cancellation, live progress as server-sent events, service status and
//! cleanup.

#![warn(missing_docs)]

pub mod config;
pub mod handlers;

use config::ServerConfig;
use handlers::{create_router, AppState};
use kgx_llm::ChatProviderFactory;
use kgx_tasks::{ExtractionService, TaskError};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Server error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Service construction error
    #[error("Service error: {0}")]
    Service(#[from] TaskError),

    /// Server binding error
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Build the task service with chat-completion providers
pub fn build_service(
    config: &ServerConfig,
) -> Result<ExtractionService<ChatProviderFactory>, ServerError> {
    let extractor = &config.extractor;
    let factory = ChatProviderFactory::new(extractor.completion_timeout(), extractor.max_retries)
        .with_sampling(extractor.temperature, extractor.top_p);

    Ok(ExtractionService::new(
        config.service.clone(),
        extractor.clone(),
        factory,
    )?)
}

/// Start the HTTP server
///
/// Runs until Ctrl-C, then drains connections and shuts the service down.
pub async fn start_server(config: ServerConfig) -> Result<(), ServerError> {
    config.validate()?;

    info!("Starting kgx server");
    info!("Bind address: {}", config.bind_addr());
    info!("Workers: {}", config.service.max_workers);
    info!("Output directory: {}", config.service.output_dir.display());
    info!("Upload directory: {}", config.service.upload_dir.display());

    let service = Arc::new(build_service(&config)?);
    service.start();

    let state = AppState {
        service: Arc::clone(&service),
        default_page_size: config.default_page_size,
        max_page_size: config.max_page_size,
    };
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_addr()).await?;
    info!("kgx server listening on {}", config.bind_addr());

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Server(e.to_string()));

    service.shutdown().await;
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
