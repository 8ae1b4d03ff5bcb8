//! xAsset price monitor
//!
//! Usage: `xasset-monitor [config.toml]`. Settings come from the `[sync]`
//! section of the file if given, then from environment variables.
use eyre::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use xasset_sync::{SyncConfig, SyncService};

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env file is fine
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_line_number(true)
        .init();

    let config_path = std::env::args().nth(1);
    let config = SyncConfig::load(config_path.as_deref()).await?;
    info!(
        "Configuration loaded: network={}, ws={}, http={}, backend={}, replica={}",
        config.network, config.rpc_wss_url, config.rpc_http_url, config.backend_url, config.store_dir
    );

    let mut service = SyncService::new(config).await?;
    service.start().await?;
    info!("Monitoring new blocks, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    service.stop().await?;
    let stats = service.stats().await;
    info!(
        "Processed {} cycles ({} failed), {} prices reported, {} candles written, {} headers dropped while busy",
        stats.sync.cycles_completed,
        stats.sync.cycles_failed,
        stats.sync.prices_reported,
        stats.sync.candles_written,
        stats.headers_dropped_busy
    );
    Ok(())
}
