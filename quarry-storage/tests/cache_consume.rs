//! Cache layer behaviour across consume modes, enablement and failures.

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use quarry_core::{CacheError, QuarryError, QuarryResult, StoreError};
use quarry_storage::{
    CacheConsumeMode, CacheEntry, CacheProvider, MemoryCacheEntry, StructureFetcher,
};
use quarry_test_utils::assertions::assert_cache_error;
use quarry_test_utils::doubles::{FailingCacheEntry, FetchCall, RecordingFetcher};
use quarry_test_utils::generators::arb_id_batch;
use quarry_test_utils::{init_tracing, StructureId, StructureKey};

fn id(v: i32) -> StructureId {
    StructureId::Identity(v)
}

fn key() -> StructureKey {
    StructureKey::new("", "MyItem")
}

fn enabled_provider() -> CacheProvider {
    let provider = CacheProvider::in_memory();
    provider.enable_for(&key());
    provider
}

#[tokio::test]
async fn test_batch_fetches_only_misses_and_keeps_input_order() {
    init_tracing();
    let provider = enabled_provider();
    let fetcher = RecordingFetcher::with_rows([(id(1), "A"), (id(2), "B")]);
    let mode = CacheConsumeMode::UpdateCacheWithDbResult;

    let first = provider
        .consume_many(&key(), &[id(1), id(2)], &fetcher, mode)
        .await
        .unwrap();
    assert_eq!(first, vec!["A", "B"]);
    assert_eq!(fetcher.calls(), vec![FetchCall::FetchMany(vec![id(1), id(2)])]);

    fetcher.insert(id(3), "C");
    fetcher.clear_calls();
    let second = provider
        .consume_many(&key(), &[id(1), id(2), id(3)], &fetcher, mode)
        .await
        .unwrap();
    assert_eq!(second, vec!["A", "B", "C"]);
    assert_eq!(fetcher.calls(), vec![FetchCall::FetchMany(vec![id(3)])]);
}

#[tokio::test]
async fn test_update_mode_populates_on_miss() {
    let provider = enabled_provider();
    let fetcher = RecordingFetcher::with_rows([(id(7), "G")]);
    let mode = CacheConsumeMode::UpdateCacheWithDbResult;

    for _ in 0..3 {
        let payload = provider.consume(&key(), &id(7), &fetcher, mode).await.unwrap();
        assert_eq!(payload.as_deref(), Some("G"));
    }
    assert_eq!(fetcher.calls(), vec![FetchCall::Fetch(id(7))]);
}

#[tokio::test]
async fn test_read_only_never_writes_back() {
    let provider = enabled_provider();
    let fetcher = RecordingFetcher::with_rows([(id(1), "A"), (id(2), "B")]);
    let mode = CacheConsumeMode::ReadOnly;

    provider.consume(&key(), &id(1), &fetcher, mode).await.unwrap();
    provider.consume(&key(), &id(1), &fetcher, mode).await.unwrap();
    assert_eq!(fetcher.calls(), vec![FetchCall::Fetch(id(1)), FetchCall::Fetch(id(1))]);

    let entry = provider.entry_for(&key()).unwrap();
    entry.put(id(2), "cached-B".to_string()).await.unwrap();
    fetcher.clear_calls();
    let served = provider.consume(&key(), &id(2), &fetcher, mode).await.unwrap();
    assert_eq!(served.as_deref(), Some("cached-B"));
    assert!(fetcher.calls().is_empty());
    assert_eq!(entry.stats().await.unwrap().entry_count, 1);
}

#[tokio::test]
async fn test_ignore_cache_always_fetches() {
    let provider = enabled_provider();
    let entry = provider.entry_for(&key()).unwrap();
    entry.put(id(1), "stale".to_string()).await.unwrap();
    let fetcher = RecordingFetcher::with_rows([(id(1), "fresh")]);

    let payload = provider
        .consume(&key(), &id(1), &fetcher, CacheConsumeMode::IgnoreCache)
        .await
        .unwrap();
    assert_eq!(payload.as_deref(), Some("fresh"));
    assert_eq!(entry.get(&id(1)).await.unwrap().as_deref(), Some("stale"));
}

#[tokio::test]
async fn test_disable_bypasses_and_does_not_recreate() {
    let provider = enabled_provider();
    let fetcher = RecordingFetcher::with_rows([(id(1), "A")]);
    let mode = CacheConsumeMode::UpdateCacheWithDbResult;

    provider.consume(&key(), &id(1), &fetcher, mode).await.unwrap();
    assert!(provider.disable_for(&key()));

    fetcher.clear_calls();
    provider.consume(&key(), &id(1), &fetcher, mode).await.unwrap();
    provider.consume(&key(), &id(1), &fetcher, mode).await.unwrap();
    assert_eq!(fetcher.calls().len(), 2);
    assert!(!provider.handles(&key()));

    provider.set_auto_enable(true);
    provider.consume(&key(), &id(1), &fetcher, mode).await.unwrap();
    assert!(provider.handles(&key()));
}

#[tokio::test]
async fn test_clear_attempts_every_entry_and_aggregates() {
    let broken = StructureKey::new("", "Broken");
    let broken_for_factory = broken.clone();
    let provider = CacheProvider::new(Arc::new(move |structure: &StructureKey| -> Arc<dyn CacheEntry> {
        if *structure == broken_for_factory {
            Arc::new(FailingCacheEntry::new(structure.clone()).failing_clear())
        } else {
            Arc::new(MemoryCacheEntry::new(structure.clone()))
        }
    }));

    let healthy = provider.enable_for(&key());
    provider.enable_for(&broken);
    healthy.put(id(1), "A".to_string()).await.unwrap();

    match provider.clear().await {
        Err(CacheError::ClearFailed { attempted, failures }) => {
            assert_eq!(attempted, vec!["Broken".to_string(), "MyItem".to_string()]);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].structure, "Broken");
        }
        other => panic!("expected ClearFailed, got {:?}", other),
    }
    assert_eq!(healthy.stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_cache_get_failure_is_not_a_miss() {
    let provider = CacheProvider::new(Arc::new(|structure: &StructureKey| -> Arc<dyn CacheEntry> {
        Arc::new(FailingCacheEntry::new(structure.clone()).failing_get())
    }));
    provider.enable_for(&key());
    let fetcher = RecordingFetcher::with_rows([(id(1), "A")]);

    let result = provider
        .consume(&key(), &id(1), &fetcher, CacheConsumeMode::UpdateCacheWithDbResult)
        .await;
    assert_cache_error(&result);
    assert!(fetcher.calls().is_empty());

    let batch = provider
        .consume_many(&key(), &[id(1)], &fetcher, CacheConsumeMode::ReadOnly)
        .await;
    assert_cache_error(&batch);
}

#[tokio::test]
async fn test_fetch_failure_propagates_uncached() {
    let provider = enabled_provider();
    let fetcher = RecordingFetcher::with_rows([(id(1), "A")]);
    fetcher.fail_with(QuarryError::Store(StoreError::QueryFailed {
        reason: "timeout".to_string(),
    }));

    let result = provider
        .consume(&key(), &id(1), &fetcher, CacheConsumeMode::UpdateCacheWithDbResult)
        .await;
    assert!(matches!(result, Err(QuarryError::Store(StoreError::QueryFailed { .. }))));

    let entry = provider.entry_for(&key()).unwrap();
    assert_eq!(entry.stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_exists_uses_cache_hit_without_caching_existence() {
    let provider = enabled_provider();
    let fetcher = RecordingFetcher::with_rows([(id(1), "A"), (id(2), "B")]);
    let mode = CacheConsumeMode::UpdateCacheWithDbResult;

    provider.consume(&key(), &id(1), &fetcher, mode).await.unwrap();
    fetcher.clear_calls();

    assert!(provider.exists(&key(), &id(1), &fetcher, mode).await.unwrap());
    assert!(fetcher.calls().is_empty());

    assert!(provider.exists(&key(), &id(2), &fetcher, mode).await.unwrap());
    assert!(!provider.exists(&key(), &id(3), &fetcher, mode).await.unwrap());
    assert_eq!(
        fetcher.calls(),
        vec![FetchCall::Exists(id(2)), FetchCall::Exists(id(3))]
    );
    let entry = provider.entry_for(&key()).unwrap();
    assert_eq!(entry.stats().await.unwrap().entry_count, 1);
}

/// Reads the row, then invalidates the structure's cache before returning,
/// the way a concurrent update or schema drop would.
struct InvalidatingFetcher<'a> {
    provider: &'a CacheProvider,
    payload: &'static str,
}

#[async_trait]
impl StructureFetcher for InvalidatingFetcher<'_> {
    async fn fetch(&self, _id: &StructureId) -> QuarryResult<Option<String>> {
        let payload = self.payload.to_string();
        self.provider.clear_for(&key()).await?;
        Ok(Some(payload))
    }

    async fn fetch_many(&self, ids: &[StructureId]) -> QuarryResult<Vec<(StructureId, String)>> {
        let rows = ids
            .iter()
            .map(|id| (id.clone(), self.payload.to_string()))
            .collect();
        self.provider.clear_for(&key()).await?;
        Ok(rows)
    }

    async fn exists(&self, _id: &StructureId) -> QuarryResult<bool> {
        Ok(true)
    }
}

#[tokio::test]
async fn test_invalidation_during_fetch_wins_over_write_back() {
    let provider = enabled_provider();
    let stale = InvalidatingFetcher {
        provider: &provider,
        payload: "OLD",
    };
    let mode = CacheConsumeMode::UpdateCacheWithDbResult;

    let payload = provider.consume(&key(), &id(1), &stale, mode).await.unwrap();
    assert_eq!(payload.as_deref(), Some("OLD"));
    let batch = provider
        .consume_many(&key(), &[id(2), id(3)], &stale, mode)
        .await
        .unwrap();
    assert_eq!(batch, vec!["OLD", "OLD"]);

    let entry = provider.entry_for(&key()).unwrap();
    assert_eq!(entry.stats().await.unwrap().entry_count, 0);

    let fresh = RecordingFetcher::with_rows([(id(1), "NEW")]);
    let payload = provider.consume(&key(), &id(1), &fresh, mode).await.unwrap();
    assert_eq!(payload.as_deref(), Some("NEW"));
    assert_eq!(fresh.calls(), vec![FetchCall::Fetch(id(1))]);
    assert_eq!(entry.stats().await.unwrap().entry_count, 1);
}

proptest! {
    #[test]
    fn prop_consume_many_preserves_input_order(
        cached in arb_id_batch(),
        requested in arb_id_batch(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let provider = enabled_provider();
            let entry = provider.entry_for(&key()).unwrap();
            for id in &cached {
                entry.put(id.clone(), format!("payload-{}", id)).await.unwrap();
            }
            let fetcher = RecordingFetcher::with_rows(
                (1..20).map(|v| (id(v), format!("payload-{}", v))),
            );

            let result = provider
                .consume_many(&key(), &requested, &fetcher, CacheConsumeMode::UpdateCacheWithDbResult)
                .await
                .unwrap();

            let expected: Vec<String> = requested.iter().map(|id| format!("payload-{}", id)).collect();
            prop_assert_eq!(result, expected);

            for fetched in fetcher.fetched_ids() {
                prop_assert!(!cached.contains(&fetched));
            }
            Ok(())
        })?;
    }
}
