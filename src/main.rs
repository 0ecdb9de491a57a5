use price_ingest::{batch_service::BatchService, config::AppConfig};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("price_ingest=debug".parse()?)
                .add_directive("mongodb=info".parse()?),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting price ingestion");
    debug!(
        "Environment variables: DATABASE_TYPE={}, MONGODB_DATABASE={}",
        std::env::var("DATABASE_TYPE").unwrap_or_else(|_| "not set".to_string()),
        std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "not set".to_string())
    );

    let config = AppConfig::load(&AppConfig::locate())?;
    let service = BatchService::from_config(config).await?;
    info!("Batch service initialized successfully");

    let summaries = service.run().await?;
    info!("Finished {} run(s)", summaries.len());
    Ok(())
}
