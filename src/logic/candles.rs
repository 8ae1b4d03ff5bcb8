use super::sources::Backend;
use super::types::{Candle, CandleLimits, Resolution, TrackedAsset};
use crate::store::ReplicaStore;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

type PartitionKey = (String, Resolution);

/// Last-written candle per (asset, resolution, bucket).
///
/// Partitioned by (asset, resolution); each partition sits behind its own
/// shard lock, so concurrent fetch tasks can diff different partitions in
/// parallel while a single partition is only ever mutated by one task at a
/// time. Not persisted: rebuilt from the replica at startup.
#[derive(Debug, Default)]
pub struct CandleCache {
    partitions: DashMap<PartitionKey, HashMap<i64, Candle>>,
}

impl CandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares freshly fetched candles with the cache, records the new values
    /// and returns the candles that need writing (new or with any of o/h/l/c
    /// changed). Unchanged candles produce nothing.
    ///
    /// Buckets older than the oldest fetched one have closed and are never
    /// fetched again, so they are dropped from the partition.
    pub fn diff(&self, asset_id: &str, resolution: Resolution, fetched: &[Candle]) -> Vec<Candle> {
        let mut partition = self.partitions.entry((asset_id.to_string(), resolution)).or_default();
        if let Some(oldest) = fetched.iter().map(|c| c.t).min() {
            partition.retain(|bucket, _| *bucket >= oldest);
        }
        let mut changed = Vec::new();
        for candle in fetched {
            match partition.get(&candle.t) {
                Some(cached) if cached.same_prices(candle) => {}
                _ => {
                    partition.insert(candle.t, candle.clone());
                    changed.push(candle.clone());
                }
            }
        }
        changed
    }

    /// Loads already-persisted candles without marking them as changed.
    pub fn seed(&self, asset_id: &str, resolution: Resolution, candles: Vec<Candle>) {
        let mut partition = self.partitions.entry((asset_id.to_string(), resolution)).or_default();
        for candle in candles {
            partition.insert(candle.t, candle);
        }
    }

    pub fn get(&self, asset_id: &str, resolution: Resolution, bucket: i64) -> Option<Candle> {
        self.partitions.get(&(asset_id.to_string(), resolution)).and_then(|p| p.get(&bucket).cloned())
    }

    /// Forgets a candle so the next diff treats it as new.
    pub fn evict(&self, asset_id: &str, resolution: Resolution, bucket: i64) {
        if let Some(mut partition) = self.partitions.get_mut(&(asset_id.to_string(), resolution)) {
            partition.remove(&bucket);
        }
    }

    pub fn drop_asset(&self, asset_id: &str) {
        self.partitions.retain(|(id, _), _| id != asset_id);
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the given assets' partitions from the replica.
    pub async fn warm(&self, store: &dyn ReplicaStore, asset_ids: &[String], limits: &CandleLimits) {
        let started = Instant::now();
        let before = self.len();
        for asset_id in asset_ids {
            for resolution in Resolution::iter() {
                let limit = limits.limit(resolution) as usize;
                match store.load_candles(asset_id, resolution, limit).await {
                    Ok(candles) => self.seed(asset_id, resolution, candles),
                    Err(e) => warn!("Could not warm candle cache for {} {}: {}", asset_id, resolution, e),
                }
            }
        }
        info!(
            "Candle cache warmed for {} assets: {} candles loaded in {:?}",
            asset_ids.len(),
            self.len().saturating_sub(before),
            started.elapsed()
        );
    }
}

/// Result of refreshing one (asset, resolution) partition.
#[derive(Debug, Clone)]
pub struct PartitionUpdate {
    pub asset_id: String,
    pub resolution: Resolution,
    pub fetched: Vec<Candle>,
    pub changed: Vec<Candle>,
}

#[derive(Debug, Clone, Default)]
pub struct CandlePass {
    pub updates: Vec<PartitionUpdate>,
    pub failures: usize,
}

impl CandlePass {
    pub fn changed_count(&self) -> usize {
        self.updates.iter().map(|u| u.changed.len()).sum()
    }

    /// Freshly fetched daily candles per asset, used as the asset's chart.
    pub fn daily_charts(&self) -> HashMap<&str, &[Candle]> {
        self.updates
            .iter()
            .filter(|u| u.resolution == Resolution::OneDay)
            .map(|u| (u.asset_id.as_str(), u.fetched.as_slice()))
            .collect()
    }
}

/// Pulls recent candle history for every tracked asset at every resolution.
pub struct CandleFetcher {
    backend: Arc<dyn Backend>,
    limits: CandleLimits,
}

impl CandleFetcher {
    pub fn new(backend: Arc<dyn Backend>, limits: CandleLimits) -> Self {
        Self { backend, limits }
    }

    pub fn limits(&self) -> &CandleLimits {
        &self.limits
    }

    /// Fetches all partitions concurrently and diffs each against the cache as
    /// soon as its fetch completes. A failed fetch leaves its partition
    /// untouched.
    pub async fn refresh(&self, cache: &CandleCache, assets: &[TrackedAsset]) -> CandlePass {
        let started = Instant::now();
        let jobs = assets.iter().flat_map(|asset| Resolution::iter().map(move |resolution| (asset.id.as_str(), resolution)));

        let results = join_all(jobs.map(|(asset_id, resolution)| async move {
            let limit = self.limits.limit(resolution);
            match self.backend.price_history(asset_id, resolution, limit).await {
                Ok(fetched) => {
                    let changed = cache.diff(asset_id, resolution, &fetched);
                    Some(PartitionUpdate { asset_id: asset_id.to_string(), resolution, fetched, changed })
                }
                Err(e) => {
                    warn!("Could not fetch {} candles for {}: {}", resolution, asset_id, e);
                    None
                }
            }
        }))
        .await;

        let mut pass = CandlePass::default();
        for result in results {
            match result {
                Some(update) => pass.updates.push(update),
                None => pass.failures += 1,
            }
        }
        debug!(
            "Candle pass: {} partitions fetched, {} failed, {} candles changed in {:?}",
            pass.updates.len(),
            pass.failures,
            pass.changed_count(),
            started.elapsed()
        );
        pass
    }
}
