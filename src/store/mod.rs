/// Replica Store Layer
///
/// Document-oriented persistence for the read-model:
///
/// - `xAssets/{id}`: one [`TrackedAsset`] per tracked asset
/// - `charts/{id}/{interval}/{t}`: one [`Candle`] per bucket
///
/// Every write is a full-value upsert or a delete keyed by stable identity,
/// so re-applying an operation is always safe.

pub mod batch;
pub mod fs;
pub mod memory;

pub use batch::{BatchStats, BatchWriter};
pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::errors::StoreError;
use crate::logic::types::{Candle, Resolution, TrackedAsset};
use crate::utils::constants::{ASSET_COLLECTION, CHART_COLLECTION};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DocKey {
    Asset { id: String },
    Candle { asset_id: String, resolution: Resolution, bucket: i64 },
}

impl Display for DocKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DocKey::Asset { id } => write!(f, "{ASSET_COLLECTION}/{id}"),
            DocKey::Candle { asset_id, resolution, bucket } => {
                write!(f, "{CHART_COLLECTION}/{asset_id}/{resolution}/{bucket}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WriteOp {
    UpsertAsset { asset: TrackedAsset },
    UpsertCandle { asset_id: String, resolution: Resolution, candle: Candle },
    Delete { key: DocKey },
}

impl WriteOp {
    pub fn upsert_asset(asset: TrackedAsset) -> Self {
        WriteOp::UpsertAsset { asset }
    }

    pub fn upsert_candle(asset_id: impl Into<String>, resolution: Resolution, candle: Candle) -> Self {
        WriteOp::UpsertCandle { asset_id: asset_id.into(), resolution, candle }
    }

    pub fn delete_asset(id: impl Into<String>) -> Self {
        WriteOp::Delete { key: DocKey::Asset { id: id.into() } }
    }

    pub fn key(&self) -> DocKey {
        match self {
            WriteOp::UpsertAsset { asset } => DocKey::Asset { id: asset.id.clone() },
            WriteOp::UpsertCandle { asset_id, resolution, candle } => {
                DocKey::Candle { asset_id: asset_id.clone(), resolution: *resolution, bucket: candle.t }
            }
            WriteOp::Delete { key } => key.clone(),
        }
    }
}

/// Persistence backing the replica. A single `commit` is applied atomically
/// and must not exceed [`ReplicaStore::max_batch_size`] operations.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    fn max_batch_size(&self) -> usize;

    async fn commit(&self, ops: &[WriteOp]) -> Result<(), StoreError>;

    async fn load_assets(&self) -> Result<Vec<TrackedAsset>, StoreError>;

    /// Most recent `limit` candles of one partition, newest first.
    async fn load_candles(&self, asset_id: &str, resolution: Resolution, limit: usize) -> Result<Vec<Candle>, StoreError>;
}

/// Ids become path segments; reject anything that could escape a collection.
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidKey(id.to_string()));
    }
    Ok(())
}
