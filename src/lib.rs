// Layers
pub mod data_sync; // Service Layer: newHeads subscription, backend and chain clients
pub mod logic; // Synchronization Core: gate, registry, prices, candles
pub mod store; // Replica Store: documents, batched commits

// Common utilities and types
pub mod errors;
pub mod utils;

// Re-export key components from each layer
pub use data_sync::{HttpBackend, RpcChainReader, SyncConfig, SyncService, SyncServiceBuilder};
pub use errors::{BackendError, ChainError, StoreError, SyncError};
pub use logic::{
    Backend, BlockGate, Candle, CandleCache, CandleLimits, ChainReader, CycleReport, ReconcileReport, Resolution, SyncSettings,
    SyncStats, Synchronizer, TrackedAsset,
};
pub use store::{BatchWriter, FsStore, MemoryStore, ReplicaStore, WriteOp};
