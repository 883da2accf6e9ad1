//! Bounded size and expiry of caches configured through the manager.
//!
//! Per-cache options come from `NearCachingOptions::caches`, keyed by exact name or
//! a `*` pattern. These caches do not track invalidations, so no repair task runs and
//! the paused clock only drives expiry.

use crate::mock_infrastructure::{data_of, init_test_logging, key, value, MockCluster};
use nearcache_core::{
    config::{EvictionPolicy, NearCacheOptions, NearCachingOptions},
    manager::NearCacheManager,
};
use std::convert::Infallible;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

fn manager_with(caches: Vec<(&str, NearCacheOptions)>) -> NearCacheManager {
    init_test_logging();
    let mut options = NearCachingOptions::default();
    for (pattern, cache_options) in caches {
        options.caches.insert(pattern.to_string(), cache_options);
    }
    NearCacheManager::new(options, MockCluster::new(1, 7).context(Uuid::new_v4()))
        .expect("valid options")
}

fn local(options: NearCacheOptions) -> NearCacheOptions {
    NearCacheOptions { invalidate_on_change: false, ..options }
}

#[tokio::test]
async fn test_exact_name_beats_pattern() {
    let manager = manager_with(vec![
        ("session-*", local(NearCacheOptions { max_size: 100, ..Default::default() })),
        ("session-admin", local(NearCacheOptions { max_size: 5, ..Default::default() })),
    ]);

    let admin = manager.get_or_create("session-admin").await.expect("manager running");
    let web = manager.get_or_create("session-web").await.expect("manager running");
    let other = manager.get_or_create("catalog").await.expect("manager running");

    assert_eq!(admin.options().max_size, 5);
    assert_eq!(web.options().max_size, 100);
    assert_eq!(other.options().max_size, NearCacheOptions::default().max_size);
}

#[tokio::test]
async fn test_lfu_cache_keeps_hot_entries_when_full() {
    let manager = manager_with(vec![(
        "session-*",
        local(NearCacheOptions {
            max_size: 100,
            eviction_policy: EvictionPolicy::Lfu,
            eviction_percentage: 20,
            ..Default::default()
        }),
    )]);
    let store = manager.get_or_create("session-web").await.expect("manager running");

    for i in 0..100 {
        assert!(store.try_add(key(&format!("s-{i}")), value(b"v")));
    }
    for _ in 0..3 {
        for i in 0..10 {
            assert!(store.try_get(&key(&format!("s-{i}")), true).is_some());
        }
    }
    for i in 100..110 {
        assert!(store.try_add(key(&format!("s-{i}")), value(b"v")));
    }

    assert!(store.count() <= 100);
    assert_eq!(store.stats().evictions, 20, "one pass of 20% when the first extra key arrived");
    for i in 0..10 {
        assert!(store.contains_key(&key(&format!("s-{i}")), false), "hot key s-{i} evicted");
    }
}

#[tokio::test]
async fn test_disabled_eviction_rejects_and_fetches_uncached() {
    let manager = manager_with(vec![(
        "fixed",
        local(NearCacheOptions {
            max_size: 3,
            eviction_policy: EvictionPolicy::None,
            ..Default::default()
        }),
    )]);
    let store = manager.get_or_create("fixed").await.expect("manager running");
    for i in 0..3 {
        assert!(store.try_add(key(&format!("k-{i}")), value(b"v")));
    }

    assert!(!store.try_add(key("k-3"), value(b"v")));
    let (cached, fetched) = store
        .try_get_or_add(key("k-4"), |_| async { Ok::<_, Infallible>(value(b"fetched")) })
        .await
        .expect("fetch succeeds");

    assert!(!cached);
    assert_eq!(fetched.as_ref().map(data_of), Some(b"fetched".to_vec()));
    assert_eq!(store.count(), 3);
    assert_eq!(store.stats().evictions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expires_entries() {
    let manager = manager_with(vec![(
        "prices",
        local(NearCacheOptions {
            time_to_live_seconds: 10,
            cleanup_period_seconds: 1,
            ..Default::default()
        }),
    )]);
    let store = manager.get_or_create("prices").await.expect("manager running");
    store.try_add(key("btc"), value(b"1"));
    store.try_add(key("eth"), value(b"2"));

    sleep(Duration::from_secs(9)).await;
    assert!(store.try_get(&key("btc"), true).is_some());

    sleep(Duration::from_secs(2)).await;
    assert!(store.try_get(&key("btc"), true).is_none());
    assert_eq!(store.count(), 0, "the sweep removed the other expired entry too");
    assert_eq!(store.stats().expirations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_idle_keeps_read_entries() {
    let manager = manager_with(vec![(
        "profiles",
        local(NearCacheOptions {
            max_idle_seconds: 5,
            cleanup_period_seconds: 1,
            ..Default::default()
        }),
    )]);
    let store = manager.get_or_create("profiles").await.expect("manager running");
    store.try_add(key("read"), value(b"r"));
    store.try_add(key("unread"), value(b"u"));

    for _ in 0..4 {
        sleep(Duration::from_secs(3)).await;
        assert!(store.try_get(&key("read"), true).is_some());
    }

    assert!(!store.contains_key(&key("unread"), false));
}
