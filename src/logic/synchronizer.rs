use super::candles::{CandleCache, CandleFetcher, CandlePass};
use super::gate::BlockGate;
use super::pricing::{PricePass, PriceReporter};
use super::registry::{ReconcileReport, RegistryReconciler};
use super::sources::{Backend, ChainReader};
use super::types::{Candle, CandleLimits, Resolution, TrackedAsset};
use crate::errors::{StoreError, SyncError};
use crate::store::{BatchStats, BatchWriter, ReplicaStore, WriteOp};
use crate::utils::constants::{DEFAULT_CANDLE_LIMIT, FLUSH_THRESHOLD, MIN_BLOCK_INTERVAL_SECS, REGISTRY_REFRESH_INTERVAL_SECS};
use crate::utils::iso8601_from_unix;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Tunables of the synchronization core.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub min_block_interval_secs: u64,
    pub registry_refresh_interval_secs: u64,
    pub flush_threshold: usize,
    pub candle_limits: CandleLimits,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            min_block_interval_secs: MIN_BLOCK_INTERVAL_SECS,
            registry_refresh_interval_secs: REGISTRY_REFRESH_INTERVAL_SECS,
            flush_threshold: FLUSH_THRESHOLD,
            candle_limits: CandleLimits::new(DEFAULT_CANDLE_LIMIT),
        }
    }
}

/// What one admitted block cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub block_number: u64,
    pub block_time: u64,
    pub registry: Option<ReconcileReport>,
    pub prices_reported: usize,
    pub price_failures: usize,
    pub candle_fetch_failures: usize,
    pub candles_staged: usize,
    pub assets_staged: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub blocks_seen: u64,
    pub blocks_discarded: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub registry_passes: u64,
    pub registry_failures: u64,
    pub prices_reported: u64,
    pub price_failures: u64,
    pub candles_written: u64,
    pub batch: BatchStats,
}

/// Owns all mutable synchronization state: the gate, the registry refresh
/// time, the tracked-asset list, the candle cache and the write coordinator.
///
/// Cycles take `&mut self`, so two cycles can never overlap on one instance.
/// Deployments covering several chains run one instance per chain.
pub struct Synchronizer {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn ReplicaStore>,
    gate: BlockGate,
    registry: RegistryReconciler,
    reporter: PriceReporter,
    fetcher: CandleFetcher,
    writer: BatchWriter,
    cache: CandleCache,
    assets: Vec<TrackedAsset>,
    last_registry_refresh: u64,
    registry_refresh_interval: u64,
    stats: SyncStats,
}

impl Synchronizer {
    pub fn new(
        settings: SyncSettings,
        backend: Arc<dyn Backend>,
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn ReplicaStore>,
    ) -> Result<Self, StoreError> {
        let writer = BatchWriter::new(store.clone(), settings.flush_threshold)?;
        let chart_limit = settings.candle_limits.limit(Resolution::OneDay);
        Ok(Self {
            gate: BlockGate::new(settings.min_block_interval_secs),
            registry: RegistryReconciler::new(backend.clone(), store.clone(), chart_limit),
            reporter: PriceReporter::new(chain.clone(), backend.clone()),
            fetcher: CandleFetcher::new(backend, settings.candle_limits),
            chain,
            store,
            writer,
            cache: CandleCache::new(),
            assets: Vec::new(),
            last_registry_refresh: 0,
            registry_refresh_interval: settings.registry_refresh_interval_secs,
            stats: SyncStats::default(),
        })
    }

    /// Startup sequence: anchor the registry clock to chain time, reconcile,
    /// then warm the candle cache from the replica.
    ///
    /// If the initial reconciliation fails the replica's last known asset set is
    /// tracked instead and the next admitted block retries the pass.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        let anchor = match self.chain.block_timestamp(None).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!("Could not read latest block time, registry clock starts at 0: {}", e);
                0
            }
        };

        match self.reconcile().await {
            Ok(report) => {
                self.last_registry_refresh = anchor;
                debug!("Startup reconciliation: {:?}", report);
            }
            Err(e) => {
                error!("Startup reconciliation failed, falling back to replica snapshot: {}", e);
                self.last_registry_refresh = 0;
                self.assets = self.store.load_assets().await?;
            }
        }

        let ids: Vec<String> = self.assets.iter().map(|a| a.id.clone()).collect();
        self.cache.warm(self.store.as_ref(), &ids, self.fetcher.limits()).await;
        info!("Synchronizer started with {} tracked assets", self.assets.len());
        Ok(())
    }

    /// Runs one registry pass and adopts its result as the tracked set.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, SyncError> {
        self.stats.registry_passes += 1;
        let reconciliation = match self.registry.reconcile(&mut self.writer).await {
            Ok(r) => r,
            Err(e) => {
                self.stats.registry_failures += 1;
                return Err(e);
            }
        };

        for id in &reconciliation.deleted_ids {
            self.cache.drop_asset(id);
        }
        if !reconciliation.inserted_ids.is_empty() {
            self.cache.warm(self.store.as_ref(), &reconciliation.inserted_ids, self.fetcher.limits()).await;
        }
        self.assets = reconciliation.assets;
        Ok(reconciliation.report)
    }

    /// Handles a new-block notification. Returns `Ok(None)` when the gate
    /// discards the block; nothing else is called in that case.
    ///
    /// `timestamp` is the header's block time when known; otherwise it is
    /// looked up on chain.
    pub async fn on_block(&mut self, block_number: u64, timestamp: Option<u64>) -> Result<Option<CycleReport>, SyncError> {
        self.stats.blocks_seen += 1;
        let block_time = match timestamp {
            Some(ts) => ts,
            None => self.chain.block_timestamp(Some(block_number)).await?,
        };
        if !self.gate.admit(block_time) {
            self.stats.blocks_discarded += 1;
            return Ok(None);
        }

        match self.run_cycle(block_number, block_time).await {
            Ok(report) => {
                self.stats.cycles_completed += 1;
                Ok(Some(report))
            }
            Err(e) => {
                self.stats.cycles_failed += 1;
                Err(e)
            }
        }
    }

    async fn run_cycle(&mut self, block_number: u64, block_time: u64) -> Result<CycleReport, SyncError> {
        let started = Instant::now();
        let mut report = CycleReport { block_number, block_time, ..Default::default() };

        if block_time.saturating_sub(self.last_registry_refresh) > self.registry_refresh_interval {
            match self.reconcile().await {
                Ok(r) => {
                    self.last_registry_refresh = block_time;
                    report.registry = Some(r);
                }
                // a replica failure ends the cycle, a backend one only skips the pass
                Err(SyncError::Store(e)) => return Err(SyncError::Store(e)),
                Err(e) => error!("Block {}: registry refresh failed, keeping current asset set: {}", block_number, e),
            }
        }

        if self.assets.is_empty() {
            debug!("Block {}: no tracked assets", block_number);
            return Ok(report);
        }

        let observed_at = iso8601_from_unix(block_time);
        let (prices, candles) = tokio::join!(
            self.reporter.report_all(&self.assets, &observed_at),
            self.fetcher.refresh(&self.cache, &self.assets)
        );
        report.prices_reported = prices.reported.len();
        report.price_failures = prices.failures.len();
        report.candle_fetch_failures = candles.failures;
        self.stats.prices_reported += prices.reported.len() as u64;
        self.stats.price_failures += prices.failures.len() as u64;

        let (candles_staged, assets_staged) = match self.stage_cycle(&prices, &candles).await {
            Ok(counts) => counts,
            Err(e) => {
                // Cached values that never reached the store must be re-diffed as new.
                self.evict_changed(&candles);
                return Err(e.into());
            }
        };
        report.candles_staged = candles_staged;
        report.assets_staged = assets_staged;
        self.stats.candles_written += candles_staged as u64;

        self.adopt_reported(prices.reported, &candles);

        info!(
            "Block {}: {} prices reported ({} failed), {} candles and {} assets written in {:?}",
            block_number,
            report.prices_reported,
            report.price_failures,
            report.candles_staged,
            report.assets_staged,
            started.elapsed()
        );
        Ok(report)
    }

    /// Stages changed candles and reported assets, then commits.
    async fn stage_cycle(&mut self, prices: &PricePass, candles: &CandlePass) -> Result<(usize, usize), StoreError> {
        let mut candles_staged = 0;
        for update in &candles.updates {
            for candle in &update.changed {
                self.writer.stage(WriteOp::upsert_candle(&update.asset_id, update.resolution, candle.clone())).await?;
                candles_staged += 1;
            }
        }

        let charts = candles.daily_charts();
        let previous: HashMap<&str, &TrackedAsset> = self.assets.iter().map(|a| (a.id.as_str(), a)).collect();
        let mut assets_staged = 0;
        for record in &prices.reported {
            let chart = chart_for(record, &charts, &previous);
            self.writer.stage(WriteOp::upsert_asset(record.clone().with_chart(chart))).await?;
            assets_staged += 1;
        }

        self.writer.commit().await?;
        Ok((candles_staged, assets_staged))
    }

    /// Canonical records replace their in-memory entries.
    fn adopt_reported(&mut self, reported: Vec<TrackedAsset>, candles: &CandlePass) {
        let charts = candles.daily_charts();
        let mut updates: HashMap<String, TrackedAsset> = HashMap::with_capacity(reported.len());
        {
            let previous: HashMap<&str, &TrackedAsset> = self.assets.iter().map(|a| (a.id.as_str(), a)).collect();
            for record in reported {
                let chart = chart_for(&record, &charts, &previous);
                updates.insert(record.id.clone(), record.with_chart(chart));
            }
        }
        for asset in self.assets.iter_mut() {
            if let Some(updated) = updates.remove(&asset.id) {
                *asset = updated;
            }
        }
    }

    fn evict_changed(&self, candles: &CandlePass) {
        for update in &candles.updates {
            for candle in &update.changed {
                self.cache.evict(&update.asset_id, update.resolution, candle.t);
            }
        }
    }

    /// Commits anything still staged. Call once before dropping.
    pub async fn shutdown(&mut self) -> Result<(), StoreError> {
        info!("Synchronizer shutting down, {} operations pending", self.writer.pending_len());
        self.writer.commit().await
    }

    pub fn tracked_assets(&self) -> &[TrackedAsset] {
        &self.assets
    }

    pub fn cache(&self) -> &CandleCache {
        &self.cache
    }

    pub fn last_processed_block_time(&self) -> u64 {
        self.gate.last_processed()
    }

    pub fn last_registry_refresh_time(&self) -> u64 {
        self.last_registry_refresh
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats { batch: self.writer.stats(), ..self.stats }
    }
}

/// Fresh daily candles when the fetch succeeded, otherwise the previous chart.
fn chart_for(
    record: &TrackedAsset,
    charts: &HashMap<&str, &[Candle]>,
    previous: &HashMap<&str, &TrackedAsset>,
) -> Option<Vec<Candle>> {
    match charts.get(record.id.as_str()) {
        Some(fresh) => Some(fresh.to_vec()),
        None => previous.get(record.id.as_str()).and_then(|p| p.chart.clone()),
    }
}
