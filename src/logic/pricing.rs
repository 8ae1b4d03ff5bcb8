use super::sources::{Backend, ChainReader, PriceReport};
use super::types::TrackedAsset;
use crate::errors::{BackendError, SyncError};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Reads share prices from chain and reports them to the backend.
pub struct PriceReporter {
    chain: Arc<dyn ChainReader>,
    backend: Arc<dyn Backend>,
}

#[derive(Debug, Default)]
pub struct PricePass {
    /// Canonical records returned by the backend.
    pub reported: Vec<TrackedAsset>,
    pub failures: Vec<(String, SyncError)>,
}

impl PriceReporter {
    pub fn new(chain: Arc<dyn ChainReader>, backend: Arc<dyn Backend>) -> Self {
        Self { chain, backend }
    }

    /// Reports every asset concurrently. One asset's failure never affects the
    /// others; failures are collected and logged.
    pub async fn report_all(&self, assets: &[TrackedAsset], observed_at: &str) -> PricePass {
        let started = Instant::now();
        let results = join_all(assets.iter().map(|asset| async move {
            (asset.id.as_str(), asset.display_name(), self.report_one(asset, observed_at).await)
        }))
        .await;

        let mut pass = PricePass::default();
        for (id, name, result) in results {
            match result {
                Ok(record) => pass.reported.push(record),
                Err(e) => {
                    warn!("Price update for {} ({}) failed: {}", name, id, e);
                    pass.failures.push((id.to_string(), e));
                }
            }
        }
        debug!(
            "Price pass: {} reported, {} failed in {:?}",
            pass.reported.len(),
            pass.failures.len(),
            started.elapsed()
        );
        pass
    }

    pub async fn report_one(&self, asset: &TrackedAsset, observed_at: &str) -> Result<TrackedAsset, SyncError> {
        let price = self.chain.share_price(asset.address).await?;
        debug!("Share price for {} at {}: {}", asset.display_name(), observed_at, price);

        let report = PriceReport { asset_id: asset.id.clone(), price: price.to_string(), time: observed_at.to_string() };
        let record = self.backend.report_price(&report).await?;
        if record.id != asset.id {
            return Err(BackendError::Malformed {
                id: asset.id.clone(),
                reason: format!("price report answered with record {}", record.id),
            }
            .into());
        }
        Ok(record)
    }
}
