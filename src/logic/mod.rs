/// Synchronization Core
///
/// Block-driven reconciliation of the asset registry, on-chain price
/// reporting and change-detecting candle aggregation:
///
/// - `gate`: admits blocks by chain time
/// - `registry`: diffs the backend's asset list against the replica
/// - `pricing`: reads share prices and reports them to the backend
/// - `candles`: fetches candle history and writes only what changed
/// - `synchronizer`: owns the state and runs one cycle per admitted block

pub mod candles;
pub mod gate;
pub mod pricing;
pub mod registry;
pub mod sources;
pub mod synchronizer;
pub mod types;

#[cfg(test)]
pub(crate) mod mocks;
#[cfg(test)]
mod tests;

pub use candles::{CandleCache, CandleFetcher, CandlePass, PartitionUpdate};
pub use gate::BlockGate;
pub use pricing::{PricePass, PriceReporter};
pub use registry::{ReconcileReport, Reconciliation, RegistryReconciler};
pub use sources::{AssetListing, Backend, ChainReader, PriceReport};
pub use synchronizer::{CycleReport, SyncSettings, SyncStats, Synchronizer};
pub use types::{Candle, CandleLimits, RealApy, Resolution, TokenDescriptor, TrackedAsset};
