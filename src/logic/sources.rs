use super::types::{Candle, Resolution, TrackedAsset};
use crate::errors::{BackendError, ChainError};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

/// The backend's authoritative asset list after validation.
#[derive(Clone, Debug, Default)]
pub struct AssetListing {
    pub assets: Vec<TrackedAsset>,
    /// Ids of records that were present but failed validation. They are
    /// neither written nor deleted for the pass that saw them.
    pub malformed_ids: HashSet<String>,
}

impl AssetListing {
    pub fn new(assets: Vec<TrackedAsset>) -> Self {
        Self { assets, malformed_ids: HashSet::new() }
    }
}

/// Body of `POST /xasset-price`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceReport {
    #[serde(rename = "xAssetId")]
    pub asset_id: String,
    pub price: String,
    /// ISO-8601 observation time.
    pub time: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_assets(&self) -> Result<AssetListing, BackendError>;

    /// Most recent `limit` candles for one asset at one resolution.
    async fn price_history(&self, asset_id: &str, resolution: Resolution, limit: u32) -> Result<Vec<Candle>, BackendError>;

    /// Reports an observed price and returns the backend's canonical record.
    async fn report_price(&self, report: &PriceReport) -> Result<TrackedAsset, BackendError>;
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current derived share price of the asset contract.
    async fn share_price(&self, asset: Address) -> Result<U256, ChainError>;

    /// Timestamp (unix seconds) of a block, `None` for latest.
    async fn block_timestamp(&self, block_number: Option<u64>) -> Result<u64, ChainError>;
}
