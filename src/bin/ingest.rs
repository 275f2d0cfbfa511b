use clap::{App, Arg};
use maritime_sim::storage::Storage;
use maritime_sim::{IngestionPipeline, MemoryStorage, Settings};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = App::new("maritime-ingest")
        .version("0.1.0")
        .author("Maritime Systems Engineering Team")
        .about("📥 Consumes a vessel position broadcast and persists validated reports")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("YAML settings file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("source")
                .long("source")
                .value_name("ADDR")
                .help("Broadcast source to connect to")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("batch-size")
                .long("batch-size")
                .value_name("N")
                .help("Messages per storage transaction")
                .takes_value(true),
        )
        .get_matches();

    let mut settings = Settings::load(matches.value_of("config"))?;
    if let Some(source) = matches.value_of("source") {
        settings.ingestion.source_address = source.to_string();
    }
    if let Some(batch_size) = matches.value_of("batch-size") {
        settings.ingestion.batch_size = batch_size.parse()?;
    }
    settings.validate()?;

    let storage = MemoryStorage::new();
    let pipeline = IngestionPipeline::new(storage.clone(), settings.ingestion.ingestion_config());

    info!(
        "Ingesting from {} in batches of {}",
        settings.ingestion.source_address, settings.ingestion.batch_size
    );
    let consumer = tokio::spawn(pipeline.run());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    consumer.abort();

    info!(
        "Shutting down: {} vessels, {} positions stored in {} commits",
        storage.vessel_count().await,
        storage.position_count().await,
        storage.commit_count().await
    );
    storage.close().await?;

    Ok(())
}
