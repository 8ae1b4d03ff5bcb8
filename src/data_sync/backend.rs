use super::records::{decode_history, decode_listing, decode_report, envelope};
use crate::errors::BackendError;
use crate::logic::sources::{AssetListing, Backend, PriceReport};
use crate::logic::types::{Candle, Resolution, TrackedAsset};
use crate::utils::constants::API_PREFIX;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// REST client for the xAsset backend (`<base>/api/v1/...`).
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url).map_err(|e| BackendError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(BackendError::InvalidUrl(format!("{base_url}: expected http or https")));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `<base>/api/v1/<segments...>`, keeping any path prefix of the base.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(API_PREFIX.split('/'))
            .extend(segments);
        Ok(url)
    }

    /// Checks the status, then unwraps the `data` envelope.
    async fn read_data(response: reqwest::Response, endpoint: &str) -> Result<Value, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { endpoint: endpoint.to_string(), status: status.as_u16(), body });
        }
        let body: Value = response.json().await?;
        envelope(body)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_assets(&self) -> Result<AssetListing, BackendError> {
        let url = self.endpoint(&["xasset", "list"])?;
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let data = Self::read_data(response, "xasset/list").await?;
        decode_listing(&data)
    }

    async fn price_history(&self, asset_id: &str, resolution: Resolution, limit: u32) -> Result<Vec<Candle>, BackendError> {
        let url = self.endpoint(&["xasset-price", asset_id, "history"])?;
        let response = self
            .client
            .get(url)
            .query(&[("interval", resolution.as_str().to_string()), ("limit", limit.to_string())])
            .send()
            .await?;
        let data = Self::read_data(response, "xasset-price/history").await?;
        decode_history(&data, resolution)
    }

    async fn report_price(&self, report: &PriceReport) -> Result<TrackedAsset, BackendError> {
        let url = self.endpoint(&["xasset-price"])?;
        let response = self.client.post(url).json(report).send().await?;
        let data = Self::read_data(response, "xasset-price").await?;
        decode_report(&data)
    }
}
