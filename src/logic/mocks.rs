//! In-memory collaborators for exercising the synchronizer without network access.

use super::sources::{AssetListing, Backend, ChainReader, PriceReport};
use super::types::{Candle, Resolution, TrackedAsset};
use crate::errors::{BackendError, ChainError};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn asset(id: &str, byte: u8) -> TrackedAsset {
    let mut asset = TrackedAsset::new(id, Address::repeat_byte(byte));
    asset.name = Some(format!("xAsset {id}"));
    asset.platform = Some("FarmXYZ".to_string());
    asset.chain = Some("Polygon".to_string());
    asset.price = Some("1000000".to_string());
    asset.icon = Some(format!("https://cdn.example/{id}.png"));
    asset
}

#[derive(Default)]
struct BackendState {
    listing: Vec<TrackedAsset>,
    malformed: HashSet<String>,
    history: HashMap<(String, Resolution), Vec<Candle>>,
    reports: Vec<PriceReport>,
    fail_listing: bool,
    fail_reports: HashSet<String>,
}

/// Backend whose catalog and history are set by the test. `report_price`
/// answers with the listed record carrying the reported price.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(listing: Vec<TrackedAsset>) -> Self {
        let backend = Self::default();
        backend.set_listing(listing);
        backend
    }

    pub fn set_listing(&self, listing: Vec<TrackedAsset>) {
        let mut state = self.state.lock().unwrap();
        state.listing = listing;
        state.malformed.clear();
    }

    pub fn mark_malformed(&self, id: &str) {
        self.state.lock().unwrap().malformed.insert(id.to_string());
    }

    pub fn set_history(&self, id: &str, resolution: Resolution, candles: Vec<Candle>) {
        self.state.lock().unwrap().history.insert((id.to_string(), resolution), candles);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn fail_report(&self, id: &str) {
        self.state.lock().unwrap().fail_reports.insert(id.to_string());
    }

    pub fn reports(&self) -> Vec<PriceReport> {
        self.state.lock().unwrap().reports.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn unavailable(endpoint: &str) -> BackendError {
    BackendError::Status { endpoint: endpoint.to_string(), status: 503, body: "unavailable".to_string() }
}

#[async_trait]
impl Backend for MockBackend {
    async fn list_assets(&self) -> Result<AssetListing, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(unavailable("xasset/list"));
        }
        Ok(AssetListing { assets: state.listing.clone(), malformed_ids: state.malformed.clone() })
    }

    async fn price_history(&self, asset_id: &str, resolution: Resolution, limit: u32) -> Result<Vec<Candle>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let candles = state.history.get(&(asset_id.to_string(), resolution)).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit as usize);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn report_price(&self, report: &PriceReport) -> Result<TrackedAsset, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.fail_reports.contains(&report.asset_id) {
            return Err(unavailable("xasset-price"));
        }
        state.reports.push(report.clone());
        let mut record = state
            .listing
            .iter()
            .find(|a| a.id == report.asset_id)
            .cloned()
            .ok_or(BackendError::MissingField("xAsset"))?;
        record.price = Some(report.price.clone());
        record.chart = None;
        Ok(record)
    }
}

/// Chain with per-address share prices and a fixed latest block time.
pub struct MockChain {
    latest_timestamp: u64,
    prices: Mutex<HashMap<Address, U256>>,
    failing: Mutex<HashSet<Address>>,
    calls: AtomicUsize,
}

impl MockChain {
    pub fn new(latest_timestamp: u64) -> Self {
        Self {
            latest_timestamp,
            prices: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_price(&self, address: Address, price: U256) {
        self.prices.lock().unwrap().insert(address, price);
    }

    pub fn fail_price(&self, address: Address) {
        self.failing.lock().unwrap().insert(address);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn share_price(&self, asset: Address) -> Result<U256, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&asset) {
            return Err(ChainError::Rpc("execution reverted".to_string()));
        }
        Ok(self.prices.lock().unwrap().get(&asset).copied().unwrap_or(U256::ZERO))
    }

    async fn block_timestamp(&self, block_number: Option<u64>) -> Result<u64, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match block_number {
            None => Ok(self.latest_timestamp),
            Some(n) => Err(ChainError::MissingBlock(n.to_string())),
        }
    }
}
