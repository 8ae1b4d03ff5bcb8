/// Minimum chain-time distance between two processed blocks.
pub const MIN_BLOCK_INTERVAL_SECS: u64 = 15;

/// Chain-time distance after which the tracked-asset registry is refreshed.
pub const REGISTRY_REFRESH_INTERVAL_SECS: u64 = 60;

/// Hard ceiling of operations per store commit.
pub const STORE_MAX_BATCH_SIZE: usize = 500;

/// Pending operations that trigger an automatic commit. Must stay below the ceiling.
pub const FLUSH_THRESHOLD: usize = 490;

/// Candles pulled per (asset, resolution) when no override is configured.
pub const DEFAULT_CANDLE_LIMIT: u32 = 20;

pub const API_PREFIX: &str = "api/v1";

// Replica collections
pub const ASSET_COLLECTION: &str = "xAssets";
pub const CHART_COLLECTION: &str = "charts";
