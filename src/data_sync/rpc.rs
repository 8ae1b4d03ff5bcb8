use crate::errors::ChainError;
use crate::logic::sources::ChainReader;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{SolCall, sol};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

sol! {
    /// Share-price view every xAsset contract exposes.
    interface IXAsset {
        function getSharePrice() external view returns (uint256);
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct BlockInfo {
    timestamp: String,
}

/// Parses a JSON-RPC hex quantity (`0x1a`).
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Reads the leading `uint256` word of ABI return data.
pub fn decode_uint256(data: &[u8]) -> Result<U256, ChainError> {
    if data.len() < 32 {
        return Err(ChainError::ReturnData(format!("expected 32 bytes, got {}", data.len())));
    }
    U256::try_from_be_slice(&data[..32]).ok_or_else(|| ChainError::ReturnData("word overflow".to_string()))
}

/// Chain access over plain HTTP JSON-RPC: `eth_call` for share prices and
/// `eth_getBlockByNumber` for block times.
#[derive(Debug)]
pub struct RpcChainReader {
    http_client: reqwest::Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl RpcChainReader {
    pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client, rpc_url, next_id: AtomicU64::new(1) })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, ChainError> {
        let request = RpcRequest { jsonrpc: "2.0", id: self.next_id.fetch_add(1, Ordering::Relaxed), method, params };
        let response: RpcResponse<T> = self
            .http_client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc(format!("{} (code {})", error.message, error.code)));
        }
        Ok(response.result)
    }

    async fn call_contract(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let params = json!([{ "to": format!("{:#x}", to), "data": format!("{:#x}", data) }, "latest"]);
        let result: String = self
            .request("eth_call", params)
            .await?
            .ok_or_else(|| ChainError::Rpc("eth_call returned no result".to_string()))?;
        let bytes = hex::decode(result.trim_start_matches("0x"))?;
        Ok(bytes.into())
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn share_price(&self, asset: Address) -> Result<U256, ChainError> {
        let call_data = IXAsset::getSharePriceCall {}.abi_encode();
        let output = self.call_contract(asset, call_data.into()).await?;
        let price = decode_uint256(&output)?;
        debug!("Share price of {}: {}", asset, price);
        Ok(price)
    }

    async fn block_timestamp(&self, block_number: Option<u64>) -> Result<u64, ChainError> {
        let tag = match block_number {
            Some(num) => format!("0x{:x}", num),
            None => "latest".to_string(),
        };
        let block: BlockInfo = self
            .request("eth_getBlockByNumber", json!([tag, false]))
            .await?
            .ok_or_else(|| ChainError::MissingBlock(tag.clone()))?;
        parse_quantity(&block.timestamp)
            .ok_or_else(|| ChainError::ReturnData(format!("invalid timestamp {} for block {}", block.timestamp, tag)))
    }
}
