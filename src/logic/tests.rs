/// End-to-end scenarios for the synchronization core.
///
/// Each test drives a [`Synchronizer`] through startup and block cycles
/// against mock backend/chain collaborators and the in-memory replica.

#[cfg(test)]
mod scenarios {
    use crate::errors::SyncError;
    use crate::logic::mocks::{MockBackend, MockChain, asset};
    use crate::logic::{Candle, Resolution, SyncSettings, Synchronizer, TrackedAsset};
    use crate::store::MemoryStore;
    use alloy_primitives::U256;
    use std::sync::Arc;

    const GENESIS: u64 = 1_667_174_400;

    fn candle(t: i64, close: &str) -> Candle {
        Candle::new(t, "1", "2", "0", close)
    }

    struct Harness {
        backend: Arc<MockBackend>,
        chain: Arc<MockChain>,
        store: Arc<MemoryStore>,
        sync: Synchronizer,
    }

    fn harness(listed: Vec<TrackedAsset>) -> Harness {
        let backend = Arc::new(MockBackend::new(listed.clone()));
        let chain = Arc::new(MockChain::new(GENESIS));
        for (i, a) in listed.iter().enumerate() {
            chain.set_price(a.address, U256::from(1_000_000u64 + i as u64));
        }
        let store = Arc::new(MemoryStore::new(500));
        let sync = Synchronizer::new(SyncSettings::default(), backend.clone(), chain.clone(), store.clone()).unwrap();
        Harness { backend, chain, store, sync }
    }

    #[tokio::test]
    async fn test_registry_change_between_cycles() {
        let (a, b, c) = (asset("A", 0xa), asset("B", 0xb), asset("C", 0xc));
        let mut h = harness(vec![a.clone(), b.clone()]);
        h.chain.set_price(c.address, U256::from(42u64));
        h.backend.set_history("A", Resolution::OneDay, vec![candle(GENESIS as i64, "1.5")]);
        h.backend.set_history("B", Resolution::OneDay, vec![candle(GENESIS as i64, "0.9")]);
        h.backend.set_history("A", Resolution::OneMinute, vec![candle(60, "1.1"), candle(120, "1.2")]);

        // startup: replica {A, B} with their daily candle attached
        h.sync.start().await.unwrap();
        assert_eq!(h.store.asset_ids(), vec!["A", "B"]);
        assert_eq!(h.store.asset("A").unwrap().chart, Some(vec![candle(GENESIS as i64, "1.5")]));
        assert_eq!(h.store.asset("B").unwrap().chart, Some(vec![candle(GENESIS as i64, "0.9")]));

        // cycle 1: prices reported, every fetched candle is new
        let first = h.sync.on_block(100, Some(GENESIS + 15)).await.unwrap().unwrap();
        assert_eq!(first.registry, None);
        assert_eq!(first.prices_reported, 2);
        assert_eq!(first.candles_staged, 4);
        assert_eq!(first.assets_staged, 2);
        assert_eq!(h.store.asset("A").unwrap().price.as_deref(), Some("1000000"));
        assert_eq!(h.store.candle("A", Resolution::OneMinute, 120), Some(candle(120, "1.2")));

        // the catalog changes and the open minute bucket moves
        h.backend.set_listing(vec![a.clone(), c.clone()]);
        h.backend.set_history("A", Resolution::OneMinute, vec![candle(60, "1.1"), candle(120, "1.25")]);
        h.backend.set_history("C", Resolution::OneDay, vec![candle(GENESIS as i64, "3.0")]);

        // cycle 2: past the refresh interval, so the registry is reconciled first
        let second = h.sync.on_block(105, Some(GENESIS + 15 + 61)).await.unwrap().unwrap();
        let registry = second.registry.unwrap();
        assert_eq!((registry.inserted, registry.deleted), (1, 1));
        assert_eq!(h.store.asset_ids(), vec!["A", "C"]);
        assert!(h.store.asset("B").is_none());

        // A: only the changed minute candle; C: its new daily candle
        assert_eq!(second.candles_staged, 2);
        assert_eq!(h.store.candle("A", Resolution::OneMinute, 120), Some(candle(120, "1.25")));
        assert_eq!(h.store.asset("C").unwrap().chart, Some(vec![candle(GENESIS as i64, "3.0")]));
        assert_eq!(h.store.asset("C").unwrap().price.as_deref(), Some("42"));

        let tracked: Vec<&str> = h.sync.tracked_assets().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(tracked, vec!["A", "C"]);
        assert!(h.sync.cache().get("B", Resolution::OneDay, GENESIS as i64).is_none());
    }

    #[tokio::test]
    async fn test_throttled_block_touches_nothing() {
        let mut h = harness(vec![asset("A", 0xa)]);
        h.sync.start().await.unwrap();
        h.sync.on_block(1, Some(GENESIS + 20)).await.unwrap().unwrap();

        let (backend_calls, chain_calls, commits) = (h.backend.calls(), h.chain.calls(), h.store.commit_sizes().len());
        let skipped = h.sync.on_block(2, Some(GENESIS + 34)).await.unwrap();

        assert!(skipped.is_none());
        assert_eq!(h.backend.calls(), backend_calls);
        assert_eq!(h.chain.calls(), chain_calls);
        assert_eq!(h.store.commit_sizes().len(), commits);
        assert_eq!(h.sync.last_processed_block_time(), GENESIS + 20);
        assert_eq!(h.sync.stats().blocks_discarded, 1);
    }

    #[tokio::test]
    async fn test_unchanged_history_is_not_rewritten() {
        let mut h = harness(vec![asset("A", 0xa)]);
        h.backend.set_history("A", Resolution::OneHour, vec![candle(3600, "1"), candle(7200, "1.1")]);
        h.sync.start().await.unwrap();

        let first = h.sync.on_block(1, Some(GENESIS + 15)).await.unwrap().unwrap();
        assert_eq!(first.candles_staged, 2);
        let second = h.sync.on_block(2, Some(GENESIS + 30)).await.unwrap().unwrap();
        assert_eq!(second.candles_staged, 0);
        assert_eq!(second.assets_staged, 1);
    }

    #[tokio::test]
    async fn test_restart_warms_cache_from_replica() {
        let mut h = harness(vec![asset("A", 0xa)]);
        h.backend.set_history("A", Resolution::OneWeek, vec![candle(604_800, "2")]);
        h.sync.start().await.unwrap();
        h.sync.on_block(1, Some(GENESIS + 15)).await.unwrap().unwrap();

        // a fresh process over the same replica writes nothing new
        let mut restarted =
            Synchronizer::new(SyncSettings::default(), h.backend.clone(), h.chain.clone(), h.store.clone()).unwrap();
        restarted.start().await.unwrap();
        assert_eq!(restarted.cache().get("A", Resolution::OneWeek, 604_800), Some(candle(604_800, "2")));
        let cycle = restarted.on_block(2, Some(GENESIS + 15)).await.unwrap().unwrap();
        assert_eq!(cycle.candles_staged, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_is_repaired_next_cycle() {
        let mut h = harness(vec![asset("A", 0xa)]);
        h.backend.set_history("A", Resolution::FiveMinutes, vec![candle(300, "1"), candle(600, "1.2")]);
        h.sync.start().await.unwrap();

        h.store.fail_next_commits(1);
        let failed = h.sync.on_block(1, Some(GENESIS + 15)).await;
        assert!(matches!(failed, Err(SyncError::Store(_))));
        assert_eq!(h.store.candle_count("A", Resolution::FiveMinutes), 0);

        let repaired = h.sync.on_block(2, Some(GENESIS + 30)).await.unwrap().unwrap();
        assert_eq!(repaired.candles_staged, 2);
        assert_eq!(h.store.candle_count("A", Resolution::FiveMinutes), 2);
        assert_eq!(h.sync.stats().cycles_failed, 1);
    }

    #[tokio::test]
    async fn test_failed_registry_commit_fails_cycle() {
        let a = asset("A", 0xa);
        let mut h = harness(vec![a.clone()]);
        h.sync.start().await.unwrap();
        h.sync.on_block(1, Some(GENESIS + 15)).await.unwrap().unwrap();

        let mut renamed = a.clone();
        renamed.name = Some("xAsset A v2".to_string());
        h.backend.set_listing(vec![renamed]);
        h.backend.set_history("A", Resolution::OneHour, vec![candle(3600, "1.3")]);
        let commits = h.store.commit_sizes().len();

        // refresh is due; its commit fails and nothing else runs
        h.store.fail_next_commits(1);
        let failed = h.sync.on_block(2, Some(GENESIS + 15 + 61)).await;
        assert!(matches!(failed, Err(SyncError::Store(_))));
        assert_eq!(h.store.commit_sizes().len(), commits);
        assert_eq!(h.store.candle_count("A", Resolution::OneHour), 0);
        assert_eq!(h.store.asset("A").unwrap().name, a.name);
        assert_eq!(h.sync.stats().cycles_failed, 1);
        assert_eq!(h.sync.last_registry_refresh_time(), GENESIS);

        // the refresh clock did not move, so the next block retries the pass
        let repaired = h.sync.on_block(3, Some(GENESIS + 15 + 61 + 15)).await.unwrap().unwrap();
        assert_eq!(repaired.registry.map(|r| r.updated), Some(1));
        assert_eq!(repaired.candles_staged, 1);
        assert_eq!(h.store.asset("A").unwrap().name.as_deref(), Some("xAsset A v2"));
    }

    #[tokio::test]
    async fn test_price_failure_is_isolated_within_cycle() {
        let (a, b) = (asset("A", 0xa), asset("B", 0xb));
        let mut h = harness(vec![a.clone(), b.clone()]);
        h.sync.start().await.unwrap();
        h.chain.fail_price(b.address);

        let cycle = h.sync.on_block(1, Some(GENESIS + 15)).await.unwrap().unwrap();
        assert_eq!(cycle.prices_reported, 1);
        assert_eq!(cycle.price_failures, 1);
        assert_eq!(h.store.asset("A").unwrap().price.as_deref(), Some("1000000"));
        // B keeps the record written by the registry pass
        assert_eq!(h.store.asset("B").unwrap().price, b.price);
    }

    #[tokio::test]
    async fn test_startup_falls_back_to_replica_when_backend_down() {
        let mut h = harness(vec![asset("A", 0xa)]);
        h.sync.start().await.unwrap();
        h.sync.shutdown().await.unwrap();

        h.backend.fail_listing(true);
        let mut restarted =
            Synchronizer::new(SyncSettings::default(), h.backend.clone(), h.chain.clone(), h.store.clone()).unwrap();
        restarted.start().await.unwrap();
        assert_eq!(restarted.tracked_assets().len(), 1);
        assert_eq!(restarted.last_registry_refresh_time(), 0);

        // the next block retries the registry pass, fails again, and still reports prices
        let cycle = restarted.on_block(1, Some(GENESIS + 15)).await.unwrap().unwrap();
        assert!(cycle.registry.is_none());
        assert_eq!(cycle.prices_reported, 1);
        assert_eq!(restarted.stats().registry_failures, 2);
    }

    #[tokio::test]
    async fn test_missing_header_time_is_looked_up() {
        let mut h = harness(vec![asset("A", 0xa)]);
        h.sync.start().await.unwrap();
        // the mock chain only knows the latest block
        let result = h.sync.on_block(7, None).await;
        assert!(matches!(result, Err(SyncError::Chain(_))));
        assert_eq!(h.sync.last_processed_block_time(), 0);
    }
}
