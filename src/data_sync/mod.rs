/// Service Layer
///
/// Connects the synchronization core to the outside world:
///
/// - WebSocket newHeads subscription feeding the block task
/// - JSON-RPC chain reader (`eth_call`, `eth_getBlockByNumber`)
/// - REST client for the xAsset backend and its wire records
/// - Service lifecycle, configuration and builder

pub mod backend;
pub mod config;
pub mod records;
pub mod rpc;
pub mod service;
pub mod websocket;


pub use backend::HttpBackend;
pub use config::SyncConfig;
pub use rpc::RpcChainReader;
pub use service::{ServiceStats, SyncService, SyncServiceBuilder};
pub use websocket::{BlockHeader, BlockSubscription};
