use super::rpc::parse_quantity;
use eyre::{Result, eyre};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// Block header from a newHeads notification. Only the number is required;
/// some providers omit or mangle the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub parent_hash: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl BlockHeader {
    pub fn block_number(&self) -> Result<u64> {
        parse_quantity(&self.number).ok_or_else(|| eyre!("Invalid block number format: {}", self.number))
    }

    /// Header time in unix seconds, `None` when absent or unparsable.
    pub fn timestamp_secs(&self) -> Option<u64> {
        self.timestamp.as_deref().and_then(parse_quantity)
    }
}

#[derive(Deserialize)]
struct SubscriptionNotification {
    params: NotificationParams,
}

#[derive(Deserialize)]
struct NotificationParams {
    result: BlockHeader,
}

/// Parses one text frame. `Ok(None)` for frames that are not newHeads
/// notifications (e.g. responses to our own requests).
pub fn parse_notification(text: &str) -> Result<Option<BlockHeader>> {
    let message: Value = serde_json::from_str(text)?;
    if message.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return Ok(None);
    }
    let notification: SubscriptionNotification = serde_json::from_value(message)?;
    Ok(Some(notification.params.result))
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// newHeads subscription over a WebSocket, reconnecting on failure.
pub struct BlockSubscription {
    rpc_url: String,
    connection_timeout: Duration,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl BlockSubscription {
    pub fn new(rpc_url: String, connection_timeout: Duration, max_reconnect_attempts: u32, reconnect_delay: Duration) -> Self {
        Self { rpc_url, connection_timeout, max_reconnect_attempts, reconnect_delay }
    }

    /// Spawns the subscription task. Headers arrive on the returned receiver;
    /// a full channel drops the header. Sending on the shutdown sender ends
    /// the task, which closes the receiver.
    pub fn subscribe_new_heads(
        &self,
        buffer: usize,
    ) -> Result<(mpsc::Receiver<BlockHeader>, mpsc::Sender<()>, JoinHandle<()>)> {
        let url = Url::parse(&self.rpc_url).map_err(|e| eyre!("Invalid WebSocket URL {}: {}", self.rpc_url, e))?;
        let (block_tx, block_rx) = mpsc::channel(buffer.max(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let connection_timeout = self.connection_timeout;
        let max_reconnect_attempts = self.max_reconnect_attempts;
        let reconnect_delay = self.reconnect_delay;

        let task = tokio::spawn(async move {
            let mut failures = 0;

            loop {
                match Self::connect_and_subscribe(&url, connection_timeout, &block_tx, &mut shutdown_rx).await {
                    Ok(SessionEnd::Shutdown) => {
                        info!("WebSocket subscription ended normally");
                        break;
                    }
                    Ok(SessionEnd::Disconnected) => {
                        failures = 0;
                        warn!("WebSocket disconnected, resubscribing in {:?}", reconnect_delay);
                    }
                    Err(e) => {
                        error!("WebSocket connection error: {}", e);
                        failures += 1;
                        if failures >= max_reconnect_attempts {
                            error!("Max reconnection attempts reached, giving up");
                            break;
                        }
                        warn!("Attempting reconnection #{} in {:?}", failures, reconnect_delay);
                    }
                }

                tokio::select! {
                    _ = sleep(reconnect_delay) => {}
                    _ = shutdown_rx.recv() => {
                        info!("Received shutdown signal while reconnecting");
                        break;
                    }
                }
            }
        });

        Ok((block_rx, shutdown_tx, task))
    }

    async fn connect_and_subscribe(
        url: &Url,
        connection_timeout: Duration,
        block_tx: &mpsc::Sender<BlockHeader>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<SessionEnd> {
        info!("Connecting to WebSocket: {}", url);
        let (ws_stream, _) = timeout(connection_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| eyre!("WebSocket connection timeout"))?
            .map_err(|e| eyre!("WebSocket connection failed: {}", e))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let subscribe_request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["newHeads"]
        });
        ws_sender.send(Message::Text(subscribe_request.to_string().into())).await?;

        let subscription_id = match timeout(connection_timeout, ws_receiver.next()).await {
            Err(_) => return Err(eyre!("Timed out waiting for subscription confirmation")),
            Ok(Some(Ok(Message::Text(text)))) => {
                let response: Value = serde_json::from_str(text.as_str())?;
                if let Some(error) = response.get("error") {
                    return Err(eyre!("Subscription error: {}", error));
                }
                response
                    .get("result")
                    .and_then(Value::as_str)
                    .ok_or_else(|| eyre!("Unexpected subscription response: {}", text))?
                    .to_string()
            }
            Ok(Some(Ok(msg))) => return Err(eyre!("Unexpected message type during subscription: {:?}", msg)),
            Ok(Some(Err(e))) => return Err(eyre!("WebSocket error during subscription: {}", e)),
            Ok(None) => return Err(eyre!("WebSocket closed during subscription")),
        };
        info!("Subscribed to newHeads with ID: {}", subscription_id);

        loop {
            tokio::select! {
                ws_msg = ws_receiver.next() => {
                    match ws_msg {
                        Some(Ok(Message::Text(text))) => match parse_notification(text.as_str()) {
                            Ok(Some(header)) => {
                                if !Self::forward(header, block_tx) {
                                    return Ok(SessionEnd::Shutdown);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Failed to parse WebSocket message: {}", e),
                        },
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by server");
                            return Ok(SessionEnd::Disconnected);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                error!("Failed to send pong: {}", e);
                                return Ok(SessionEnd::Disconnected);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            return Ok(SessionEnd::Disconnected);
                        }
                        None => {
                            info!("WebSocket stream ended");
                            return Ok(SessionEnd::Disconnected);
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    let _ = ws_sender.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    /// Non-blocking hand-off. Returns `false` once the consumer is gone.
    fn forward(header: BlockHeader, block_tx: &mpsc::Sender<BlockHeader>) -> bool {
        debug!("Received new block: {}", header.number);
        match block_tx.try_send(header) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(header)) => {
                warn!("Block header channel is full, dropping block {}", header.number);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Block header channel is closed");
                false
            }
        }
    }
}
