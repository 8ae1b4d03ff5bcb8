use crate::logic::synchronizer::SyncSettings;
use crate::logic::types::CandleLimits;
use crate::utils::config_loader::{ConfigLoader, LoadConfigError, load_from_file};
use crate::utils::constants::{
    DEFAULT_CANDLE_LIMIT, FLUSH_THRESHOLD, MIN_BLOCK_INTERVAL_SECS, REGISTRY_REFRESH_INTERVAL_SECS, STORE_MAX_BATCH_SIZE,
};
use async_trait::async_trait;
use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Configuration of the price sync service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Network name, used for logging only
    pub network: String,
    /// WebSocket RPC URL for the newHeads subscription
    pub rpc_wss_url: String,
    /// HTTP RPC URL for eth_call and block lookups
    pub rpc_http_url: String,
    /// Base URL of the xAsset backend, without the `/api/v1` prefix
    pub backend_url: String,
    /// Root directory of the on-disk replica
    pub store_dir: String,
    pub min_block_interval_secs: u64,
    pub registry_refresh_interval_secs: u64,
    /// Pending operations that trigger a commit
    pub flush_threshold: usize,
    /// Maximum operations the replica accepts per commit
    pub store_max_batch_size: usize,
    pub default_candle_limit: u32,
    /// Per-interval overrides, keyed by interval name (`"1m"`, `"1d"`, ...)
    pub candle_limits: HashMap<String, u32>,
    pub http_timeout_secs: u64,
    pub ws_connection_timeout_secs: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,
    /// Buffer of the header channel between the subscription and the block task
    pub channel_buffer_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            network: "polygon".to_string(),
            rpc_wss_url: "ws://127.0.0.1:8546".to_string(),
            rpc_http_url: "http://127.0.0.1:8545".to_string(),
            backend_url: "http://127.0.0.1:3000".to_string(),
            store_dir: "replica".to_string(),
            min_block_interval_secs: MIN_BLOCK_INTERVAL_SECS,
            registry_refresh_interval_secs: REGISTRY_REFRESH_INTERVAL_SECS,
            flush_threshold: FLUSH_THRESHOLD,
            store_max_batch_size: STORE_MAX_BATCH_SIZE,
            default_candle_limit: DEFAULT_CANDLE_LIMIT,
            candle_limits: HashMap::new(),
            http_timeout_secs: 10,
            ws_connection_timeout_secs: 30,
            max_reconnect_attempts: 5,
            reconnect_delay_secs: 2,
            channel_buffer_size: 1,
        }
    }
}

#[derive(Deserialize)]
struct SyncConfigFile {
    #[serde(default)]
    sync: SyncConfig,
}

#[async_trait]
impl ConfigLoader for SyncConfig {
    type SectionType = SyncConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let file: SyncConfigFile = load_from_file(file_name).await?;
        Ok(file.sync)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e| eyre!("Invalid {}: {}", name, e))
}

impl SyncConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the `[sync]` section of `path` if given, then
    /// environment variables.
    pub async fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = match path {
            Some(path) => <Self as ConfigLoader>::load_section_from_file(path.to_string())
                .await
                .map_err(|e| eyre!("Failed to load {}: {}", path, e))?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies every override `lookup` yields a value for.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let strings = [
            ("NETWORK", &mut self.network),
            ("RPC_WSS_URL", &mut self.rpc_wss_url),
            ("RPC_HTTP_URL", &mut self.rpc_http_url),
            ("BACKEND_URL", &mut self.backend_url),
            ("STORE_DIR", &mut self.store_dir),
        ];
        for (name, field) in strings {
            if let Some(value) = lookup(name) {
                *field = value;
            }
        }

        let secs = [
            ("MIN_BLOCK_INTERVAL_SECS", &mut self.min_block_interval_secs),
            ("REGISTRY_REFRESH_INTERVAL_SECS", &mut self.registry_refresh_interval_secs),
            ("HTTP_TIMEOUT_SECS", &mut self.http_timeout_secs),
            ("WS_CONNECTION_TIMEOUT_SECS", &mut self.ws_connection_timeout_secs),
            ("RECONNECT_DELAY_SECS", &mut self.reconnect_delay_secs),
        ];
        for (name, field) in secs {
            if let Some(raw) = lookup(name) {
                *field = parse_var(name, &raw)?;
            }
        }

        let sizes = [
            ("FLUSH_THRESHOLD", &mut self.flush_threshold),
            ("STORE_MAX_BATCH_SIZE", &mut self.store_max_batch_size),
            ("CHANNEL_BUFFER_SIZE", &mut self.channel_buffer_size),
        ];
        for (name, field) in sizes {
            if let Some(raw) = lookup(name) {
                *field = parse_var(name, &raw)?;
            }
        }

        if let Some(raw) = lookup("MAX_RECONNECT_ATTEMPTS") {
            self.max_reconnect_attempts = parse_var("MAX_RECONNECT_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("DEFAULT_CANDLE_LIMIT") {
            self.default_candle_limit = parse_var("DEFAULT_CANDLE_LIMIT", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, raw, schemes) in [
            ("rpc_wss_url", &self.rpc_wss_url, &["ws", "wss"][..]),
            ("rpc_http_url", &self.rpc_http_url, &["http", "https"][..]),
            ("backend_url", &self.backend_url, &["http", "https"][..]),
        ] {
            let url = Url::parse(raw).map_err(|e| eyre!("Invalid {}: {}", name, e))?;
            if !schemes.contains(&url.scheme()) {
                return Err(eyre!("Invalid {}: scheme must be one of {:?}", name, schemes));
            }
        }

        if self.flush_threshold == 0 || self.flush_threshold >= self.store_max_batch_size {
            return Err(eyre!(
                "flush_threshold ({}) must be greater than 0 and below store_max_batch_size ({})",
                self.flush_threshold,
                self.store_max_batch_size
            ));
        }
        if self.store_dir.trim().is_empty() {
            return Err(eyre!("store_dir must not be empty"));
        }
        self.candle_limits()?;
        Ok(())
    }

    pub fn candle_limits(&self) -> Result<CandleLimits> {
        CandleLimits::from_named(self.default_candle_limit, &self.candle_limits)
            .map_err(|e| eyre!("Invalid candle_limits interval: {}", e))
    }

    pub fn settings(&self) -> Result<SyncSettings> {
        Ok(SyncSettings {
            min_block_interval_secs: self.min_block_interval_secs,
            registry_refresh_interval_secs: self.registry_refresh_interval_secs,
            flush_threshold: self.flush_threshold,
            candle_limits: self.candle_limits()?,
        })
    }

    pub fn ws_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_connection_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
