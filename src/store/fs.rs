use super::{DocKey, ReplicaStore, WriteOp, validate_id};
use crate::errors::StoreError;
use crate::logic::types::{Candle, Resolution, TrackedAsset};
use crate::utils::constants::{ASSET_COLLECTION, CHART_COLLECTION};
use async_trait::async_trait;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

const JOURNAL_FILE: &str = "commit.journal.json";

/// Replica kept as JSON documents on disk:
///
/// ```text
/// <root>/xAssets/<id>.json
/// <root>/charts/<id>/<interval>/<t>.json
/// ```
///
/// Each commit is first written to a journal; the journal is removed once all
/// documents are in place and replayed by [`FsStore::open`] if a crash left it
/// behind. This gives the same all-or-nothing commit a remote document store
/// provides.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    max_batch_size: usize,
    commit_lock: Mutex<()>,
}

impl FsStore {
    pub async fn open(root: impl Into<PathBuf>, max_batch_size: usize) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [root.join(ASSET_COLLECTION), root.join(CHART_COLLECTION)] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| StoreError::io(&dir, e))?;
        }
        let store = Self { root, max_batch_size, commit_lock: Mutex::new(()) };
        store.replay_journal().await?;
        Ok(store)
    }

    fn path_for(&self, key: &DocKey) -> Result<PathBuf, StoreError> {
        match key {
            DocKey::Asset { id } => {
                validate_id(id)?;
                Ok(self.root.join(ASSET_COLLECTION).join(format!("{id}.json")))
            }
            DocKey::Candle { asset_id, resolution, bucket } => {
                validate_id(asset_id)?;
                Ok(self.partition_dir(asset_id, *resolution).join(format!("{bucket}.json")))
            }
        }
    }

    fn partition_dir(&self, asset_id: &str, resolution: Resolution) -> PathBuf {
        self.root.join(CHART_COLLECTION).join(asset_id).join(resolution.as_str())
    }

    fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    async fn replay_journal(&self) -> Result<(), StoreError> {
        let path = self.journal_path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        match serde_json::from_slice::<Vec<WriteOp>>(&raw) {
            Ok(ops) => {
                info!("Replaying {} journaled operations from an interrupted commit", ops.len());
                self.apply_all(&ops).await?;
            }
            // the journal itself was torn; nothing of it was applied
            Err(e) => warn!("Discarding unreadable commit journal: {}", e),
        }
        remove_if_exists(&path).await
    }

    async fn apply_all(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        for op in ops {
            let path = self.path_for(&op.key())?;
            match op {
                WriteOp::UpsertAsset { asset } => write_json(&path, asset).await?,
                WriteOp::UpsertCandle { candle, .. } => write_json(&path, candle).await?,
                WriteOp::Delete { .. } => remove_if_exists(&path).await?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReplicaStore for FsStore {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn commit(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        if ops.len() > self.max_batch_size {
            return Err(StoreError::BatchTooLarge { size: ops.len(), max: self.max_batch_size });
        }
        // validate every key before anything touches disk
        for op in ops {
            self.path_for(&op.key())?;
        }

        let _guard = self.commit_lock.lock().await;
        let journal = self.journal_path();
        write_json(&journal, &ops).await?;
        self.apply_all(ops).await?;
        remove_if_exists(&journal).await
    }

    async fn load_assets(&self) -> Result<Vec<TrackedAsset>, StoreError> {
        let dir = self.root.join(ASSET_COLLECTION);
        let mut assets = Vec::new();
        for path in json_files(&dir).await? {
            match read_json::<TrackedAsset>(&path).await {
                Ok(asset) => assets.push(asset),
                Err(e) => warn!("Skipping unreadable asset document {}: {}", path.display(), e),
            }
        }
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(assets)
    }

    async fn load_candles(&self, asset_id: &str, resolution: Resolution, limit: usize) -> Result<Vec<Candle>, StoreError> {
        validate_id(asset_id)?;
        let dir = self.partition_dir(asset_id, resolution);
        let mut buckets: Vec<(i64, PathBuf)> = json_files(&dir)
            .await?
            .into_iter()
            .filter_map(|p| {
                let bucket = p.file_stem()?.to_str()?.parse().ok()?;
                Some((bucket, p))
            })
            .collect();
        buckets.sort_by(|a, b| b.0.cmp(&a.0));

        let mut candles = Vec::with_capacity(limit.min(buckets.len()));
        for (_, path) in buckets.into_iter().take(limit) {
            match read_json::<Candle>(&path).await {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!("Skipping unreadable candle document {}: {}", path.display(), e),
            }
        }
        Ok(candles)
    }
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(dir, e))? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let raw = tokio::fs::read(path).await.map_err(|e| StoreError::io(path, e))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Write-then-rename so readers never see a torn document.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, body).await.map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| StoreError::io(path, e))
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("xasset-sync-{name}-{}-{nanos}", std::process::id()))
    }

    #[tokio::test]
    async fn test_documents_round_trip_through_disk() {
        let root = scratch_dir("roundtrip");
        let store = FsStore::open(&root, 500).await.unwrap();

        let mut asset = TrackedAsset::new("x1", Address::repeat_byte(0xab));
        asset.price = Some("1000000000000000000".to_string());
        asset.chart = Some(vec![Candle::new(86_400, "1", "2", "0", "1.5")]);
        store
            .commit(&[
                WriteOp::upsert_asset(asset.clone()),
                WriteOp::upsert_candle("x1", Resolution::OneDay, Candle::new(86_400, "1", "2", "0", "1.5")),
                WriteOp::upsert_candle("x1", Resolution::OneDay, Candle::new(172_800, "1.5", "2", "1", "1.7")),
            ])
            .await
            .unwrap();

        assert!(root.join("xAssets/x1.json").exists());
        assert!(root.join("charts/x1/1d/172800.json").exists());
        assert!(!root.join(JOURNAL_FILE).exists());

        assert_eq!(store.load_assets().await.unwrap(), vec![asset]);
        let latest = store.load_candles("x1", Resolution::OneDay, 1).await.unwrap();
        assert_eq!(latest, vec![Candle::new(172_800, "1.5", "2", "1", "1.7")]);
        assert!(store.load_candles("x1", Resolution::OneWeek, 20).await.unwrap().is_empty());

        store.commit(&[WriteOp::delete_asset("x1")]).await.unwrap();
        assert!(store.load_assets().await.unwrap().is_empty());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_replays_interrupted_commit() {
        let root = scratch_dir("journal");
        tokio::fs::create_dir_all(&root).await.unwrap();
        let ops = vec![WriteOp::upsert_asset(TrackedAsset::new("x2", Address::ZERO))];
        tokio::fs::write(root.join(JOURNAL_FILE), serde_json::to_vec(&ops).unwrap()).await.unwrap();

        let store = FsStore::open(&root, 500).await.unwrap();
        assert_eq!(store.load_assets().await.unwrap().len(), 1);
        assert!(!root.join(JOURNAL_FILE).exists());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_invalid_ids_before_writing() {
        let root = scratch_dir("invalid");
        let store = FsStore::open(&root, 500).await.unwrap();
        let ops = vec![
            WriteOp::upsert_asset(TrackedAsset::new("ok", Address::ZERO)),
            WriteOp::upsert_asset(TrackedAsset::new("../escape", Address::ZERO)),
        ];
        assert!(matches!(store.commit(&ops).await, Err(StoreError::InvalidKey(_))));
        assert!(store.load_assets().await.unwrap().is_empty());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
