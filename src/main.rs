use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use feedvault::{Config, Database, FeedService, HttpFeedSource, Refresher, RetryPolicy};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = feedvault::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedvault::logging::init_console_only(&config.logging.level);
    }

    info!("feedvault {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> feedvault::Result<()> {
    let db = Database::open(&config.database.path)
        .await?
        .with_retry_policy(RetryPolicy::from_config(&config.storage));
    let db = Arc::new(db);

    let source = Arc::new(HttpFeedSource::new(&config.fetch)?);
    let service = FeedService::new(db.clone(), source, &config);

    if !config.seed.sources.is_empty() {
        let added = service.add_sources(&config.seed.sources).await?;
        info!("Seeded {} new source(s)", added);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = Refresher::new(service.ingestor().clone(), &config.ingest).spawn(shutdown_rx);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    refresher.await?;
    db.close().await;

    info!("feedvault stopped");
    Ok(())
}
