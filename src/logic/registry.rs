use super::sources::Backend;
use super::types::{Candle, Resolution, TrackedAsset};
use crate::errors::SyncError;
use crate::store::{BatchWriter, ReplicaStore, WriteOp};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ReconcileReport {
    pub fn staged(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub report: ReconcileReport,
    /// The new tracked set, hydrated with daily charts.
    pub assets: Vec<TrackedAsset>,
    pub inserted_ids: Vec<String>,
    pub deleted_ids: Vec<String>,
}

/// Aligns the replica's asset collection with the backend's authoritative list.
pub struct RegistryReconciler {
    backend: Arc<dyn Backend>,
    store: Arc<dyn ReplicaStore>,
    chart_limit: u32,
}

impl RegistryReconciler {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn ReplicaStore>, chart_limit: u32) -> Self {
        Self { backend, store, chart_limit }
    }

    /// One reconciliation pass, committed once at the end.
    ///
    /// A failure to read either side aborts the pass before anything is staged,
    /// so the replica is never diffed against an incomplete set.
    pub async fn reconcile(&self, writer: &mut BatchWriter) -> Result<Reconciliation, SyncError> {
        let started = Instant::now();
        let listing = self.backend.list_assets().await?;
        let replica: HashMap<String, TrackedAsset> =
            self.store.load_assets().await?.into_iter().map(|a| (a.id.clone(), a)).collect();

        let mut seen = HashSet::new();
        let authoritative: Vec<TrackedAsset> = listing
            .assets
            .into_iter()
            .filter(|a| {
                let first = seen.insert(a.id.clone());
                if !first {
                    warn!("Backend listed asset {} more than once, keeping the first record", a.id);
                }
                first
            })
            .collect();

        let hydrated = self.hydrate_charts(authoritative, &replica).await;

        let mut reconciliation = Reconciliation::default();
        for asset in &hydrated {
            match replica.get(&asset.id) {
                None => {
                    reconciliation.report.inserted += 1;
                    reconciliation.inserted_ids.push(asset.id.clone());
                }
                Some(stored) if stored == asset => {
                    reconciliation.report.unchanged += 1;
                    continue;
                }
                Some(_) => reconciliation.report.updated += 1,
            }
            writer.stage(WriteOp::upsert_asset(asset.clone())).await?;
        }

        let mut stale: Vec<&String> = replica
            .keys()
            .filter(|id| !seen.contains(*id) && !listing.malformed_ids.contains(*id))
            .collect();
        stale.sort();
        for id in stale {
            info!("Removing asset {} no longer listed by the backend", id);
            writer.stage(WriteOp::delete_asset(id.clone())).await?;
            reconciliation.report.deleted += 1;
            reconciliation.deleted_ids.push(id.clone());
        }

        writer.commit().await?;

        // malformed-but-identified assets stay tracked with their last known state
        let mut assets = hydrated;
        for id in &listing.malformed_ids {
            if let Some(stored) = replica.get(id).filter(|_| !seen.contains(id)) {
                assets.push(stored.clone());
            }
        }
        reconciliation.assets = assets;

        let r = reconciliation.report;
        info!(
            "Registry reconciled in {:?}: {} inserted, {} updated, {} unchanged, {} deleted",
            started.elapsed(),
            r.inserted,
            r.updated,
            r.unchanged,
            r.deleted
        );
        Ok(reconciliation)
    }

    /// Attaches the most recent daily candles to each record. If the history
    /// fetch fails the previously stored chart is kept.
    async fn hydrate_charts(
        &self,
        assets: Vec<TrackedAsset>,
        replica: &HashMap<String, TrackedAsset>,
    ) -> Vec<TrackedAsset> {
        let charts: Vec<Option<Vec<Candle>>> = join_all(assets.iter().map(|asset| async move {
            match self.backend.price_history(&asset.id, Resolution::OneDay, self.chart_limit).await {
                Ok(candles) => Some(candles),
                Err(e) => {
                    warn!("Could not fetch daily chart for {}: {}", asset.id, e);
                    replica.get(&asset.id).and_then(|stored| stored.chart.clone())
                }
            }
        }))
        .await;

        debug!("Hydrated daily charts for {} assets", assets.len());
        assets.into_iter().zip(charts).map(|(asset, chart)| asset.with_chart(chart)).collect()
    }
}
