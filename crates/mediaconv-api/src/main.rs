use mediaconv_api::setup;
use mediaconv_core::PipelineConfig;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = PipelineConfig::from_env()?;

    mediaconv_infra::init_telemetry(config.log_json)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let (services, router) = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, router).await?;

    services.queue.shutdown().await;
    mediaconv_infra::shutdown_telemetry().await;

    Ok(())
}
