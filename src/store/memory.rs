use super::{DocKey, ReplicaStore, WriteOp};
use crate::errors::StoreError;
use crate::logic::types::{Candle, Resolution, TrackedAsset};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-process replica. Enforces the same per-commit ceiling as a remote
/// document store and records the size of every physical commit.
#[derive(Debug)]
pub struct MemoryStore {
    assets: DashMap<String, TrackedAsset>,
    candles: DashMap<(String, Resolution), BTreeMap<i64, Candle>>,
    max_batch_size: usize,
    commit_sizes: Mutex<Vec<usize>>,
    failures_pending: AtomicUsize,
}

impl MemoryStore {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            assets: DashMap::new(),
            candles: DashMap::new(),
            max_batch_size,
            commit_sizes: Mutex::new(Vec::new()),
            failures_pending: AtomicUsize::new(0),
        }
    }

    pub fn asset(&self, id: &str) -> Option<TrackedAsset> {
        self.assets.get(id).map(|a| a.clone())
    }

    pub fn asset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.assets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn candle(&self, asset_id: &str, resolution: Resolution, bucket: i64) -> Option<Candle> {
        self.candles.get(&(asset_id.to_string(), resolution)).and_then(|p| p.get(&bucket).cloned())
    }

    pub fn candle_count(&self, asset_id: &str, resolution: Resolution) -> usize {
        self.candles.get(&(asset_id.to_string(), resolution)).map(|p| p.len()).unwrap_or(0)
    }

    /// Sizes of successful physical commits, in order.
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.commit_sizes.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Makes the next `n` commits fail without applying anything.
    pub fn fail_next_commits(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    fn apply(&self, op: &WriteOp) {
        match op {
            WriteOp::UpsertAsset { asset } => {
                self.assets.insert(asset.id.clone(), asset.clone());
            }
            WriteOp::UpsertCandle { asset_id, resolution, candle } => {
                self.candles.entry((asset_id.clone(), *resolution)).or_default().insert(candle.t, candle.clone());
            }
            WriteOp::Delete { key: DocKey::Asset { id } } => {
                self.assets.remove(id);
            }
            WriteOp::Delete { key: DocKey::Candle { asset_id, resolution, bucket } } => {
                if let Some(mut partition) = self.candles.get_mut(&(asset_id.clone(), *resolution)) {
                    partition.remove(bucket);
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::utils::constants::STORE_MAX_BATCH_SIZE)
    }
}

#[async_trait]
impl ReplicaStore for MemoryStore {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn commit(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        if ops.len() > self.max_batch_size {
            return Err(StoreError::BatchTooLarge { size: ops.len(), max: self.max_batch_size });
        }
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        // Commits are serialized so a batch is never observed half-applied.
        let mut sizes = self.commit_sizes.lock().map_err(|_| StoreError::Unavailable("commit log poisoned".to_string()))?;
        for op in ops {
            self.apply(op);
        }
        sizes.push(ops.len());
        Ok(())
    }

    async fn load_assets(&self) -> Result<Vec<TrackedAsset>, StoreError> {
        let mut assets: Vec<TrackedAsset> = self.assets.iter().map(|e| e.value().clone()).collect();
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(assets)
    }

    async fn load_candles(&self, asset_id: &str, resolution: Resolution, limit: usize) -> Result<Vec<Candle>, StoreError> {
        Ok(self
            .candles
            .get(&(asset_id.to_string(), resolution))
            .map(|p| p.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
