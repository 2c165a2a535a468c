// src/storage/tests/fallback_tests.rs

use std::sync::Arc;
use std::time::Duration;

use crate::storage::{CountingStore, FallbackCounter, MemoryCounter};
use crate::test_utils::{test_memory_config, FlakyCounter};

const WINDOW: Duration = Duration::from_secs(60);

fn fallback_with_primary() -> (Arc<FlakyCounter>, FallbackCounter<FlakyCounter>) {
    let primary = Arc::new(FlakyCounter::new());
    let store = FallbackCounter::with_primary(
        Some(Arc::clone(&primary)),
        MemoryCounter::new(test_memory_config()),
    );
    (primary, store)
}

#[tokio::test]
async fn healthy_primary_serves_all_operations() {
    let (primary, store) = fallback_with_primary();

    store.record("client", WINDOW).await.unwrap();
    let sample = store.record("client", WINDOW).await.unwrap();
    assert_eq!(sample.count, 2);

    // Counts live on the primary; the local map stays untouched
    assert_eq!(store.tracked_keys().await.unwrap(), 0);
    assert_eq!(primary.failures_seen(), 0);

    store.shutdown();
}

#[tokio::test]
async fn failures_degrade_to_local_counting() {
    let (primary, store) = fallback_with_primary();

    primary.fail(true);

    // The caller sees successful decisions the whole time
    let first = store.record("client", WINDOW).await.unwrap();
    let second = store.record("client", WINDOW).await.unwrap();
    assert_eq!(first.count, 1);
    assert_eq!(second.count, 2);

    // Served by the local map, and the primary refused both attempts
    assert_eq!(store.tracked_keys().await.unwrap(), 1);
    assert_eq!(primary.failures_seen(), 2);

    store.shutdown();
}

#[tokio::test]
async fn circuit_opens_after_consecutive_failures() {
    let (primary, store) = fallback_with_primary();

    primary.fail(true);

    // Default breaker threshold is 5: the 6th operation skips the primary
    for _ in 0..6 {
        store.record("client", WINDOW).await.unwrap();
    }
    assert_eq!(primary.failures_seen(), 5);

    store.shutdown();
}

#[tokio::test]
async fn primary_recovery_is_used_before_the_breaker_opens() {
    let (primary, store) = fallback_with_primary();

    primary.fail(true);
    store.record("client", WINDOW).await.unwrap();
    store.record("client", WINDOW).await.unwrap();

    primary.fail(false);

    // Back on the primary, which never saw the two local events; the
    // divergence is the documented degradation tolerance.
    let sample = store.record("client", WINDOW).await.unwrap();
    assert_eq!(sample.count, 1);
    assert_eq!(primary.failures_seen(), 2);

    store.shutdown();
}

#[tokio::test]
async fn peek_and_clear_follow_the_same_fallback_path() {
    let (primary, store) = fallback_with_primary();

    primary.fail(true);
    store.record("client", WINDOW).await.unwrap();
    assert_eq!(store.peek("client", WINDOW).await.unwrap().count, 1);

    store.clear("client").await.unwrap();
    assert_eq!(store.peek("client", WINDOW).await.unwrap().count, 0);

    store.shutdown();
}

#[tokio::test]
async fn without_a_primary_the_local_store_is_the_backend() {
    let store: FallbackCounter<FlakyCounter> =
        FallbackCounter::with_primary(None, MemoryCounter::new(test_memory_config()));

    let sample = store.record("client", WINDOW).await.unwrap();
    assert_eq!(sample.count, 1);
    assert_eq!(store.tracked_keys().await.unwrap(), 1);

    store.shutdown();
}
