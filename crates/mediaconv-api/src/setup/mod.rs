//! Application setup: services, worker pool, routes and server.

pub mod routes;
pub mod server;
pub mod services;

use anyhow::Result;
use axum::Router;
use mediaconv_core::PipelineConfig;

pub use services::Services;

/// Build everything the server needs. Telemetry must already be initialized.
pub async fn initialize_app(config: PipelineConfig) -> Result<(Services, Router)> {
    config.validate()?;
    tracing::info!("Configuration loaded and validated");

    let services = services::initialize_services(config).await?;
    let router = routes::setup_routes(services.state.clone());

    Ok((services, router))
}
