// src/storage/tests/memory_tests.rs

use std::time::Duration;
use tokio::time;

use crate::config::InMemoryConfig;
use crate::storage::{CountingStore, MemoryCounter, WindowSample};
use crate::test_utils::test_memory_config;

const WINDOW: Duration = Duration::from_secs(60);

fn counter() -> MemoryCounter {
    MemoryCounter::new(test_memory_config())
}

#[tokio::test]
async fn record_counts_events_in_order() {
    let store = counter();

    for expected in 1..=3 {
        let sample = store.record("client", WINDOW).await.unwrap();
        assert_eq!(sample.count, expected);
        assert!(sample.oldest.is_some());
    }

    let sample = store.peek("client", WINDOW).await.unwrap();
    assert_eq!(sample.count, 3);
}

#[tokio::test]
async fn peek_on_unknown_key_is_empty_and_creates_nothing() {
    let store = counter();

    let sample = store.peek("ghost", WINDOW).await.unwrap();
    assert_eq!(sample, WindowSample::EMPTY);
    assert_eq!(store.tracked_keys().await.unwrap(), 0);
}

#[tokio::test]
async fn events_age_out_of_the_window() {
    let store = counter();
    let window = Duration::from_millis(80);

    store.record("client", window).await.unwrap();
    store.record("client", window).await.unwrap();
    assert_eq!(store.peek("client", window).await.unwrap().count, 2);

    time::sleep(Duration::from_millis(120)).await;

    // Both stamps are past the window now
    assert_eq!(store.peek("client", window).await.unwrap().count, 0);
    let sample = store.record("client", window).await.unwrap();
    assert_eq!(sample.count, 1);
}

#[tokio::test]
async fn forget_latest_returns_the_newest_slot() {
    let store = counter();

    store.record("client", WINDOW).await.unwrap();
    store.record("client", WINDOW).await.unwrap();
    store.forget_latest("client").await.unwrap();

    assert_eq!(store.peek("client", WINDOW).await.unwrap().count, 1);

    // Forgetting on an unknown key is a no-op
    store.forget_latest("ghost").await.unwrap();
}

#[tokio::test]
async fn clear_drops_the_whole_window() {
    let store = counter();

    store.record("client", WINDOW).await.unwrap();
    store.record("client", WINDOW).await.unwrap();
    store.clear("client").await.unwrap();

    assert_eq!(store.peek("client", WINDOW).await.unwrap().count, 0);
    assert_eq!(store.tracked_keys().await.unwrap(), 0);
}

#[tokio::test]
async fn tracked_keys_counts_identifiers_not_events() {
    let store = counter();

    for i in 0..5 {
        let key = format!("client-{}", i);
        store.record(&key, WINDOW).await.unwrap();
        store.record(&key, WINDOW).await.unwrap();
    }

    assert_eq!(store.tracked_keys().await.unwrap(), 5);
}

#[tokio::test]
async fn background_sweep_drops_aged_out_identifiers() {
    let store = MemoryCounter::new(InMemoryConfig {
        max_entries: 100,
        background_sweep: true,
        sweep_interval: Duration::from_millis(40),
    });
    let window = Duration::from_millis(40);

    store.record("ephemeral", window).await.unwrap();
    assert_eq!(store.tracked_keys().await.unwrap(), 1);

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.tracked_keys().await.unwrap(), 0);

    store.shutdown();
}

#[test]
fn capacity_pressure_purges_instead_of_refusing() {
    let store = MemoryCounter::new(InMemoryConfig {
        max_entries: 2,
        background_sweep: false,
        sweep_interval: Duration::from_secs(60),
    });
    let window = Duration::from_millis(30);

    tokio_test::block_on(async {
        store.record("a", window).await.unwrap();
        store.record("b", window).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        // a and b have aged out; the purge makes room and c still counts
        let sample = store.record("c", window).await.unwrap();
        assert_eq!(sample.count, 1);
        assert_eq!(store.tracked_keys().await.unwrap(), 1);
    });
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let store = MemoryCounter::new(InMemoryConfig {
        max_entries: 100,
        background_sweep: true,
        sweep_interval: Duration::from_secs(60),
    });

    store.shutdown();
    store.shutdown();

    // The store keeps answering after shutdown; only the sweep is gone
    let sample = store.record("client", WINDOW).await.unwrap();
    assert_eq!(sample.count, 1);
}
