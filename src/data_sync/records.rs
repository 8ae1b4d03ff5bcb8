use crate::errors::BackendError;
use crate::logic::sources::AssetListing;
use crate::logic::types::{Candle, RealApy, Resolution, TokenDescriptor, TrackedAsset};
use crate::store::validate_id;
use crate::utils::numeric;
use alloy_primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

/// Asset descriptor as the backend emits it. Both the documented field names
/// and the older ones (`percentage`, `xassetAPY`, `media.publicUrl`,
/// `platformName`, `blockchain{name,isTestNet}`) are accepted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    #[serde(deserialize_with = "numeric::id_string")]
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "platformName")]
    pub platform: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub blockchain: Option<BlockchainRecord>,
    #[serde(default)]
    pub is_test_net: Option<bool>,
    #[serde(default, deserialize_with = "numeric::optional_numeric_string")]
    pub price: Option<String>,
    #[serde(
        default,
        rename = "percentageChange",
        alias = "percentage",
        alias = "change",
        deserialize_with = "numeric::optional_f64"
    )]
    pub change: Option<f64>,
    #[serde(default, deserialize_with = "numeric::optional_f64")]
    pub safety_score: Option<f64>,
    #[serde(default, rename = "realAPY", alias = "xassetAPY")]
    pub real_apy: Option<RealApy>,
    #[serde(default, rename = "mediaUrl", alias = "icon")]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media: Option<MediaRecord>,
    #[serde(default)]
    pub price_token: Option<TokenDescriptor>,
    #[serde(default)]
    pub share_token: Option<TokenDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_test_net: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    #[serde(default)]
    pub public_url: Option<String>,
}

impl AssetRecord {
    /// Validates identity fields and flattens the legacy shapes.
    pub fn into_asset(self) -> Result<TrackedAsset, BackendError> {
        validate_id(&self.id).map_err(|e| malformed(&self.id, e))?;
        let address = Address::from_str(self.address.trim()).map_err(|e| malformed(&self.id, e))?;

        let (chain_name, chain_test_net) = match self.blockchain {
            Some(b) => (b.name, b.is_test_net),
            None => (None, None),
        };

        let mut asset = TrackedAsset::new(self.id, address);
        asset.name = self.name;
        asset.platform = self.platform;
        asset.chain = self.chain.or(chain_name);
        asset.is_test_net = self.is_test_net.or(chain_test_net).unwrap_or(false);
        asset.price = self.price;
        asset.change = self.change;
        asset.safety_score = self.safety_score;
        asset.real_apy = self.real_apy;
        asset.icon = self.media_url.or_else(|| self.media.and_then(|m| m.public_url));
        asset.price_token = self.price_token;
        asset.share_token = self.share_token;
        Ok(asset)
    }
}

fn malformed(id: &str, reason: impl ToString) -> BackendError {
    BackendError::Malformed { id: id.to_string(), reason: reason.to_string() }
}

/// The `id` of a record that otherwise failed to decode, if it has one.
fn readable_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    }
}

fn decode_asset(item: &Value) -> Result<TrackedAsset, BackendError> {
    let id = readable_id(item).unwrap_or_else(|| "<unknown>".to_string());
    AssetRecord::deserialize(item).map_err(|e| malformed(&id, e))?.into_asset()
}

/// Unwraps the `{ "data": ... }` envelope every backend response carries.
pub fn envelope(body: Value) -> Result<Value, BackendError> {
    match body {
        Value::Object(mut map) => map.remove("data").filter(|d| !d.is_null()).ok_or(BackendError::MissingField("data")),
        _ => Err(BackendError::MissingField("data")),
    }
}

/// Decodes `data.items`. Invalid records are skipped; those that still carry
/// an id are reported in `malformed_ids` so reconciliation leaves them alone.
pub fn decode_listing(data: &Value) -> Result<AssetListing, BackendError> {
    let items = data.get("items").and_then(Value::as_array).ok_or(BackendError::MissingField("data.items"))?;

    let mut listing = AssetListing::default();
    for item in items {
        match decode_asset(item) {
            Ok(asset) => listing.assets.push(asset),
            Err(e) => match readable_id(item) {
                Some(id) => {
                    warn!("Skipping malformed asset {}: {}", id, e);
                    listing.malformed_ids.insert(id);
                }
                None => warn!("Skipping asset record without id: {}", e),
            },
        }
    }
    Ok(listing)
}

/// Decodes `data[<interval>]`, dropping individual candles that do not parse.
pub fn decode_history(data: &Value, resolution: Resolution) -> Result<Vec<Candle>, BackendError> {
    let items = data
        .get(resolution.as_str())
        .and_then(Value::as_array)
        .ok_or(BackendError::MissingField("data[interval]"))?;

    Ok(items
        .iter()
        .filter_map(|item| match Candle::deserialize(item) {
            Ok(candle) => Some(candle),
            Err(e) => {
                warn!("Skipping malformed {} candle {}: {}", resolution, item, e);
                None
            }
        })
        .collect())
}

/// Decodes `data.xAsset` from a price report response.
pub fn decode_report(data: &Value) -> Result<TrackedAsset, BackendError> {
    let record = data.get("xAsset").ok_or(BackendError::MissingField("data.xAsset"))?;
    decode_asset(record)
}
