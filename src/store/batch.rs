use super::{ReplicaStore, WriteOp};
use crate::errors::StoreError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Accumulates write operations and commits them in bounded physical batches.
///
/// `stage` commits automatically once `flush_threshold` operations are pending,
/// so no physical commit ever exceeds the threshold. Callers must call
/// [`BatchWriter::commit`] at the end of each logical cycle; anything left
/// pending is lost on restart.
///
/// Operations split across two automatic sub-batches are not mutually atomic.
/// Every operation is an idempotent full replace, so the next cycle repairs a
/// partially applied one.
pub struct BatchWriter {
    store: Arc<dyn ReplicaStore>,
    pending: Vec<WriteOp>,
    flush_threshold: usize,
    stats: BatchStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub commits: u64,
    pub ops_committed: u64,
    pub failed_commits: u64,
    pub ops_dropped: u64,
    pub largest_batch: usize,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn ReplicaStore>, flush_threshold: usize) -> Result<Self, StoreError> {
        let ceiling = store.max_batch_size();
        if flush_threshold == 0 || flush_threshold >= ceiling {
            return Err(StoreError::InvalidThreshold { threshold: flush_threshold, ceiling });
        }
        Ok(Self { store, pending: Vec::with_capacity(flush_threshold), flush_threshold, stats: BatchStats::default() })
    }

    pub async fn stage(&mut self, op: WriteOp) -> Result<(), StoreError> {
        self.pending.push(op);
        if self.pending.len() >= self.flush_threshold {
            debug!("Pending batch reached {} operations, flushing", self.pending.len());
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn stage_all<I: IntoIterator<Item = WriteOp>>(&mut self, ops: I) -> Result<(), StoreError> {
        for op in ops {
            self.stage(op).await?;
        }
        Ok(())
    }

    /// Flushes whatever is pending. A no-op when nothing is staged.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.flush().await
    }

    /// On failure the batch is dropped rather than retried; the caller's next
    /// cycle re-derives it.
    async fn flush(&mut self) -> Result<(), StoreError> {
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.flush_threshold));
        let size = batch.len();
        let started = Instant::now();

        match self.store.commit(&batch).await {
            Ok(()) => {
                self.stats.commits += 1;
                self.stats.ops_committed += size as u64;
                self.stats.largest_batch = self.stats.largest_batch.max(size);
                debug!("Committed {} operations in {:?}", size, started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.stats.failed_commits += 1;
                self.stats.ops_dropped += size as u64;
                error!("Commit of {} operations failed after {:?}: {}", size, started.elapsed(), e);
                Err(e)
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::types::{Candle, Resolution};
    use crate::store::MemoryStore;

    fn candle_op(i: usize) -> WriteOp {
        WriteOp::upsert_candle("asset", Resolution::OneMinute, Candle::new(i as i64, "1", "1", "1", "1"))
    }

    #[test]
    fn test_threshold_must_be_below_ceiling() {
        let store: Arc<dyn ReplicaStore> = Arc::new(MemoryStore::new(500));
        assert!(BatchWriter::new(store.clone(), 490).is_ok());
        assert!(matches!(BatchWriter::new(store.clone(), 500), Err(StoreError::InvalidThreshold { .. })));
        assert!(BatchWriter::new(store, 0).is_err());
    }

    #[tokio::test]
    async fn test_staging_is_bounded_by_threshold() {
        let store = Arc::new(MemoryStore::new(500));
        let mut writer = BatchWriter::new(store.clone(), 490).unwrap();

        writer.stage_all((0..1001).map(candle_op)).await.unwrap();
        // two automatic flushes happened mid-stream
        assert_eq!(writer.pending_len(), 21);
        writer.commit().await.unwrap();

        let sizes = store.commit_sizes();
        assert!(sizes.len() >= 3);
        assert!(sizes.iter().all(|&n| n <= 490));
        assert_eq!(sizes.iter().sum::<usize>(), 1001);
        assert_eq!(store.candle_count("asset", Resolution::OneMinute), 1001);

        let stats = writer.stats();
        assert_eq!(stats.commits, 3);
        assert_eq!(stats.ops_committed, 1001);
        assert_eq!(stats.largest_batch, 490);
    }

    #[tokio::test]
    async fn test_empty_commit_is_noop() {
        let store = Arc::new(MemoryStore::new(500));
        let mut writer = BatchWriter::new(store.clone(), 490).unwrap();
        writer.commit().await.unwrap();
        assert!(store.commit_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_drops_batch() {
        let store = Arc::new(MemoryStore::new(500));
        let mut writer = BatchWriter::new(store.clone(), 490).unwrap();
        writer.stage(candle_op(1)).await.unwrap();
        store.fail_next_commits(1);

        assert!(writer.commit().await.is_err());
        assert_eq!(writer.pending_len(), 0);
        assert_eq!(writer.stats().failed_commits, 1);
        assert_eq!(writer.stats().ops_dropped, 1);

        // the store recovers, later cycles commit normally
        writer.stage(candle_op(2)).await.unwrap();
        writer.commit().await.unwrap();
        assert_eq!(store.candle_count("asset", Resolution::OneMinute), 1);
    }
}
