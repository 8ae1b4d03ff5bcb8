use crate::data_sync::{
    backend::HttpBackend,
    config::SyncConfig,
    rpc::RpcChainReader,
    websocket::{BlockHeader, BlockSubscription},
};
use crate::logic::sources::{Backend, ChainReader};
use crate::logic::synchronizer::{SyncStats, Synchronizer};
use crate::store::{FsStore, ReplicaStore};
use eyre::{Result, eyre};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters kept by the block task.
#[derive(Debug, Default)]
pub struct BlockLoopCounters {
    received: AtomicU64,
    dropped_busy: AtomicU64,
    invalid_headers: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub headers_received: u64,
    /// Headers dropped because a cycle was still in flight.
    pub headers_dropped_busy: u64,
    pub invalid_headers: u64,
    pub sync: SyncStats,
}

/// Price sync service
///
/// Subscribes to newHeads and runs one [`Synchronizer`] cycle per admitted
/// block. Headers that arrive while a cycle is still running are dropped.
pub struct SyncService {
    config: SyncConfig,
    subscription: BlockSubscription,
    synchronizer: Arc<Mutex<Synchronizer>>,
    counters: Arc<BlockLoopCounters>,

    // Task handles
    websocket_task: Option<JoinHandle<()>>,
    block_task: Option<JoinHandle<()>>,

    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SyncService {
    /// Builds the HTTP backend, the JSON-RPC chain reader and the on-disk replica from `config`.
    pub async fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing SyncService for network {}", config.network);

        let backend = HttpBackend::new(&config.backend_url, config.http_timeout())?;
        let chain = RpcChainReader::new(config.rpc_http_url.clone(), config.http_timeout())?;
        let store = FsStore::open(&config.store_dir, config.store_max_batch_size).await?;

        Self::with_components(config, Arc::new(backend), Arc::new(chain), Arc::new(store))
    }

    pub fn with_components(
        config: SyncConfig,
        backend: Arc<dyn Backend>,
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn ReplicaStore>,
    ) -> Result<Self> {
        let synchronizer = Synchronizer::new(config.settings()?, backend, chain, store)?;
        let subscription = BlockSubscription::new(
            config.rpc_wss_url.clone(),
            config.ws_connection_timeout(),
            config.max_reconnect_attempts,
            config.reconnect_delay(),
        );

        Ok(Self {
            config,
            subscription,
            synchronizer: Arc::new(Mutex::new(synchronizer)),
            counters: Arc::new(BlockLoopCounters::default()),
            websocket_task: None,
            block_task: None,
            shutdown_tx: None,
        })
    }

    /// Runs the startup sequence, then subscribes to new blocks.
    pub async fn start(&mut self) -> Result<()> {
        if self.block_task.is_some() {
            return Err(eyre!("SyncService already started"));
        }
        info!("Starting SyncService");

        self.synchronizer.lock().await.start().await?;

        let (block_rx, shutdown_tx, websocket_task) = self.subscription.subscribe_new_heads(self.config.channel_buffer_size)?;
        self.shutdown_tx = Some(shutdown_tx);
        self.websocket_task = Some(websocket_task);
        self.block_task = Some(spawn_block_task(Arc::clone(&self.synchronizer), Arc::clone(&self.counters), block_rx));

        info!("SyncService started successfully");
        Ok(())
    }

    /// Stops the subscription, waits for the cycle in flight, then commits
    /// anything still staged.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping SyncService");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }

        if let Some(websocket_task) = self.websocket_task.take() {
            if let Err(e) = websocket_task.await {
                warn!("WebSocket task error during shutdown: {}", e);
            }
        }

        // the block task ends once the header channel is closed
        if let Some(block_task) = self.block_task.take() {
            if let Err(e) = block_task.await {
                warn!("Block task error during shutdown: {}", e);
            }
        }

        self.synchronizer.lock().await.shutdown().await?;
        info!("SyncService stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.block_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Waits for a running cycle to finish before reading the totals.
    pub async fn stats(&self) -> ServiceStats {
        let sync = self.synchronizer.lock().await.stats();
        self.counters.snapshot(sync)
    }

    pub fn get_config(&self) -> &SyncConfig {
        &self.config
    }
}

impl BlockLoopCounters {
    pub(crate) fn snapshot(&self, sync: SyncStats) -> ServiceStats {
        ServiceStats {
            headers_received: self.received.load(Ordering::Relaxed),
            headers_dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            invalid_headers: self.invalid_headers.load(Ordering::Relaxed),
            sync,
        }
    }
}

/// Consumes headers until the channel closes. Each header whose cycle can
/// take the synchronizer lock is processed on its own task; the lock is held
/// for the whole cycle, so a header arriving meanwhile is dropped.
pub(crate) fn spawn_block_task(
    synchronizer: Arc<Mutex<Synchronizer>>,
    counters: Arc<BlockLoopCounters>,
    mut block_rx: mpsc::Receiver<BlockHeader>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Block task started");
        let mut in_flight: Option<JoinHandle<()>> = None;

        while let Some(header) = block_rx.recv().await {
            counters.received.fetch_add(1, Ordering::Relaxed);
            let block_number = match header.block_number() {
                Ok(n) => n,
                Err(e) => {
                    counters.invalid_headers.fetch_add(1, Ordering::Relaxed);
                    warn!("Ignoring header: {}", e);
                    continue;
                }
            };

            let mut guard = match Arc::clone(&synchronizer).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    counters.dropped_busy.fetch_add(1, Ordering::Relaxed);
                    warn!("Block {}: previous cycle still running, dropping block", block_number);
                    continue;
                }
            };

            let timestamp = header.timestamp_secs();
            in_flight = Some(tokio::spawn(async move {
                match guard.on_block(block_number, timestamp).await {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!("Block {}: below minimum interval, skipped", block_number),
                    Err(e) => error!("Block {}: cycle failed: {}", block_number, e),
                }
            }));
        }

        if let Some(cycle) = in_flight {
            if let Err(e) = cycle.await {
                warn!("Cycle task error during shutdown: {}", e);
            }
        }
        info!("Block task ended");
    })
}

impl Drop for SyncService {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("SyncService dropped while running, tasks may be orphaned");
        }
    }
}

/// Builder for SyncService. Components left unset are built from the config.
#[derive(Default)]
pub struct SyncServiceBuilder {
    config: Option<SyncConfig>,
    backend: Option<Arc<dyn Backend>>,
    chain: Option<Arc<dyn ChainReader>>,
    store: Option<Arc<dyn ReplicaStore>>,
}

impl SyncServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainReader>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ReplicaStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<SyncService> {
        let config = match self.config {
            Some(config) => config,
            None => SyncConfig::from_env()?,
        };
        config.validate()?;

        let backend: Arc<dyn Backend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::new(&config.backend_url, config.http_timeout())?),
        };
        let chain: Arc<dyn ChainReader> = match self.chain {
            Some(chain) => chain,
            None => Arc::new(RpcChainReader::new(config.rpc_http_url.clone(), config.http_timeout())?),
        };
        let store: Arc<dyn ReplicaStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FsStore::open(&config.store_dir, config.store_max_batch_size).await?),
        };

        SyncService::with_components(config, backend, chain, store)
    }
}
