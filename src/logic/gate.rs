use tracing::debug;

/// Throttles processing cycles by chain-reported block time.
///
/// A block is admitted only when its timestamp is at least `min_interval`
/// seconds past the last admitted one. The timestamp is recorded on admission,
/// before any cycle work runs, so a failing cycle is retried on the next
/// admitted block instead of on every block.
///
/// Timestamps are taken from the chain only. A block whose time runs backward
/// is discarded; there is no wall-clock fallback.
#[derive(Debug, Clone)]
pub struct BlockGate {
    min_interval: u64,
    last_processed: u64,
}

impl BlockGate {
    pub fn new(min_interval: u64) -> Self {
        Self { min_interval, last_processed: 0 }
    }

    pub fn admit(&mut self, chain_timestamp: u64) -> bool {
        let elapsed = chain_timestamp.saturating_sub(self.last_processed);
        if chain_timestamp < self.last_processed || elapsed < self.min_interval {
            debug!(
                "Discarding block at t={} ({}s since last processed, minimum {}s)",
                chain_timestamp, elapsed, self.min_interval
            );
            return false;
        }
        self.last_processed = chain_timestamp;
        true
    }

    pub fn last_processed(&self) -> u64 {
        self.last_processed
    }
}
