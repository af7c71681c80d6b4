//! Per-key exclusion, relaxed mode and throttle windows.

use primer_test_utils::assertions::*;
use primer_test_utils::fixtures::*;
use primer_test_utils::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn slow_compute(cache: &TestCache, runs: &AtomicUsize) -> Option<String> {
    cache
        .compute_with("slow", || async {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Some("done".to_string()))
        })
        .await
        .expect("compute should succeed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_computation() {
    let cache = in_memory_cache();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let runs = Arc::clone(&runs);
        handles.push(tokio::spawn(async move { slow_compute(&cache, &runs).await }));
    }
    for handle in handles {
        let value = handle.await.expect("task should not panic");
        assert_eq!(value.as_deref(), Some("done"));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
}

#[tokio::test]
async fn test_relaxed_mode_lets_computations_race() {
    let cache: TestCache =
        Cache::in_memory(CacheConfig::default().relaxed()).expect("config should validate");
    let runs = AtomicUsize::new(0);

    let (a, b) = tokio::join!(slow_compute(&cache, &runs), slow_compute(&cache, &runs));
    assert_eq!(a, b);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_cached(&cache, "slow", true).await;
}

#[tokio::test]
async fn test_exclusive_mode_serializes_same_task_callers() {
    let cache = in_memory_cache();
    let runs = AtomicUsize::new(0);

    let (a, b) = tokio::join!(slow_compute(&cache, &runs), slow_compute(&cache, &runs));
    assert_eq!(a, b);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_coalesces_within_window() {
    let db = seeded_db();
    let cache = throttled_cache(&db, Duration::from_millis(500));
    cache.compute("user:1").await.expect("compute should succeed");

    for i in 0..5 {
        let topic = db.update("user", 1, format!("user-1-v{i}"));
        cache
            .changed(&topic.to_attribute())
            .await
            .expect("changed should succeed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(cache.pending_keys(), vec![CacheKey::parse("user:1").expect("key should parse")]);
    assert_eq!(db.find_count(), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(cache.pending_keys().is_empty());
    assert_eq!(db.find_count(), 2);
    assert_eq!(cache.stats().regenerations, 1);
    assert_eq!(
        cache.get("user:1").await.expect("get should succeed").as_deref(),
        Some("user-1-v4")
    );
}

#[tokio::test(start_paused = true)]
async fn test_throttle_windows_are_per_key() {
    let db = seeded_db();
    let cache = throttled_cache(&db, Duration::from_millis(100));
    cache.compute("user:1").await.expect("compute should succeed");
    cache.compute("user:2").await.expect("compute should succeed");

    cache
        .changed(&db.row_attribute("user", 1))
        .await
        .expect("changed should succeed");
    tokio::time::sleep(Duration::from_millis(60)).await;
    cache
        .changed(&db.row_attribute("user", 2))
        .await
        .expect("changed should succeed");
    assert_eq!(cache.pending_keys().len(), 2);

    // user:1's window closes first.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(
        cache.pending_keys(),
        vec![CacheKey::parse("user:2").expect("key should parse")]
    );

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(cache.pending_keys().is_empty());
    assert_eq!(cache.stats().regenerations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_failure_does_not_block_sibling() {
    let db = seeded_db();
    let cache = throttled_cache(&db, Duration::from_millis(100));
    cache.compute("user:1").await.expect("compute should succeed");
    cache.compute("post:1").await.expect("compute should succeed");

    db.fail_table("post");
    cache
        .changed(&db.row_attribute("post", 1))
        .await
        .expect("changed should succeed");
    cache
        .changed(&db.row_attribute("user", 1))
        .await
        .expect("changed should succeed");

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_cached(&cache, "user:1", true).await;
    assert_cached(&cache, "post:1", false).await;
    let stats = cache.stats();
    assert_eq!(stats.regenerations, 1);
    assert_eq!(stats.regeneration_failures, 1);

    // The next window for the same key is scheduled normally.
    cache.compute("user:1").await.expect("compute should succeed");
    cache
        .changed(&db.row_attribute("user", 1))
        .await
        .expect("changed should succeed");
    assert_eq!(cache.pending_keys().len(), 1);
}
