//! Request cache integration tests
//!
//! Exercises the public API end to end:
//! - De-duplication of concurrent fetches
//! - TTL expiry
//! - No negative caching
//! - Invalidation by key, by prefix, and by namespace

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fetch_cache::{Error, RequestCache};
use futures::future::join_all;
use tokio::sync::Notify;

/// Fetcher that counts invocations and returns `value` after `delay`
fn slow_fetcher(
    calls: Arc<AtomicUsize>,
    delay: Duration,
    value: &'static str,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>> {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(value.to_string())
        })
    }
}

/// Fetcher that always fails
fn failing_fetcher(
    calls: Arc<AtomicUsize>,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>> {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(anyhow::anyhow!("backend unavailable")) })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_fetch() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let requests = (0..32).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            cache
                .get_or_fetch("employees:all", slow_fetcher(calls, Duration::from_millis(50), "roster"))
                .await
        })
    });

    let results = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1, "fetcher must run exactly once");
    for result in results {
        assert_eq!(result.unwrap().unwrap(), "roster");
    }

    let stats = cache.stats();
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.hits + stats.coalesced, 31);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_waiters_share_the_identical_failure() {
    let cache = RequestCache::new();
    let gate = Arc::new(Notify::new());

    let first = {
        let cache = cache.clone();
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            cache
                .get_or_fetch::<String, _, _>("payroll:settings", move || async move {
                    gate.notified().await;
                    Err(anyhow::anyhow!("permission denied"))
                })
                .await
        })
    };
    while !cache.is_pending("payroll:settings") {
        tokio::task::yield_now().await;
    }

    let second = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch("payroll:settings", || async { Ok("never".to_string()) })
                .await
        })
    };
    while cache.stats().coalesced == 0 {
        tokio::task::yield_now().await;
    }
    gate.notify_one();

    let first = first.await.unwrap().unwrap_err();
    let second = second.await.unwrap().unwrap_err();
    let (Error::Fetch(a), Error::Fetch(b)) = (&first, &second) else {
        panic!("expected fetch errors, got {first:?} and {second:?}");
    };
    assert!(a.same_as(b), "waiters must observe the same failure");
    assert_eq!(a.to_string(), "permission denied");
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_millis(100);

    let fetch = |calls: &Arc<AtomicUsize>| {
        cache.get_or_fetch_with_ttl("notices:latest", ttl, slow_fetcher(Arc::clone(calls), Duration::ZERO, "v"))
    };

    fetch(&calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Within the TTL: served from cache
    tokio::time::advance(Duration::from_millis(50)).await;
    fetch(&calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Past the TTL: fetched again
    tokio::time::advance(Duration::from_millis(100)).await;
    fetch(&calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_never_served() {
    let cache = RequestCache::new();
    cache.set("attendance:today", 17_u32, Duration::from_millis(100));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(cache.peek::<u32>("attendance:today"), None);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    for attempt in 1..=3 {
        let err = cache
            .get_or_fetch("leave:balance", failing_fetcher(Arc::clone(&calls)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert_eq!(calls.load(Ordering::SeqCst), attempt);
        assert!(!cache.is_pending("leave:balance"));
    }

    let value = cache
        .get_or_fetch("leave:balance", slow_fetcher(Arc::clone(&calls), Duration::ZERO, "12 days"))
        .await
        .unwrap();
    assert_eq!(value, "12 days");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(cache.stats().failures, 3);
}

#[test]
fn test_invalidate_removes_entry() {
    let cache = RequestCache::new();
    cache.set("key", "v".to_string(), Duration::from_secs(60));

    assert!(cache.invalidate("key"));
    assert_eq!(cache.peek::<String>("key"), None);
    // Second invalidation is a no-op
    assert!(!cache.invalidate("key"));
}

#[test]
fn test_prefix_invalidation() {
    let cache = RequestCache::new();
    cache.set("ns:a", "1".to_string(), Duration::from_secs(60));
    cache.set("ns:b", "2".to_string(), Duration::from_secs(60));
    cache.set("other:c", "3".to_string(), Duration::from_secs(60));

    assert_eq!(cache.invalidate_prefix("ns:"), 2);

    assert_eq!(cache.peek::<String>("other:c").as_deref(), Some("3"));
    assert_eq!(cache.peek::<String>("ns:a"), None);
    assert_eq!(cache.peek::<String>("ns:b"), None);
}

#[test]
fn test_namespace_isolation() {
    let cache = RequestCache::new();
    let employees = cache.namespace("employees");
    let projects = cache.namespace("projects");

    employees.set("123", "Ada".to_string(), Duration::from_secs(60));
    projects.set("123", "Apollo".to_string(), Duration::from_secs(60));

    assert_eq!(employees.peek::<String>("123").as_deref(), Some("Ada"));
    assert_eq!(projects.peek::<String>("123").as_deref(), Some("Apollo"));

    assert_eq!(employees.invalidate_all(), 1);
    assert_eq!(employees.peek::<String>("123"), None);
    assert_eq!(projects.peek::<String>("123").as_deref(), Some("Apollo"));
}

#[tokio::test]
async fn test_prefix_invalidation_drops_pending_fetches() {
    let cache = RequestCache::new();
    let gate = Arc::new(Notify::new());
    let tasks = cache.namespace("tasks");

    let waiter = {
        let tasks = tasks.clone();
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            tasks
                .get_or_fetch("open", move || async move {
                    gate.notified().await;
                    Ok(vec![1_u32, 2, 3])
                })
                .await
        })
    };
    while !cache.is_pending("tasks:open") {
        tokio::task::yield_now().await;
    }

    assert_eq!(tasks.invalidate_all(), 1);
    gate.notify_one();

    assert_eq!(waiter.await.unwrap().unwrap(), vec![1, 2, 3]);
    assert_eq!(tasks.peek::<Vec<u32>>("open"), None);
}

#[tokio::test]
async fn test_fetch_completes_after_waiter_is_dropped() {
    // GIVEN: a fetch whose only waiter is aborted while it is in flight
    // WHEN: the fetcher finishes afterwards
    // THEN: its value is still cached
    let cache = RequestCache::new();
    let gate = Arc::new(Notify::new());

    let waiter = {
        let cache = cache.clone();
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            cache
                .get_or_fetch("reports:monthly", move || async move {
                    gate.notified().await;
                    Ok(5_u32)
                })
                .await
        })
    };
    while !cache.is_pending("reports:monthly") {
        tokio::task::yield_now().await;
    }

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    gate.notify_one();

    while cache.is_pending("reports:monthly") {
        tokio::task::yield_now().await;
    }
    assert_eq!(cache.peek::<u32>("reports:monthly"), Some(5));
    assert_eq!(cache.stats().failures, 0);
}

#[tokio::test]
async fn test_hung_fetch_does_not_block_other_keys() {
    // GIVEN: a fetch that never completes
    // WHEN: another key is requested
    // THEN: that request completes and the hung key stays pending
    let cache = RequestCache::new();

    let hung = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch::<u32, _, _>("hung", std::future::pending)
                .await
        })
    };
    while !cache.is_pending("hung") {
        tokio::task::yield_now().await;
    }

    let other = tokio::time::timeout(
        Duration::from_secs(1),
        cache.get_or_fetch("other", || async { Ok(1_u32) }),
    )
    .await
    .expect("unrelated key must not wait for the hung fetch")
    .unwrap();

    assert_eq!(other, 1);
    assert!(cache.is_pending("hung"));
    assert_eq!(cache.peek::<u32>("other"), Some(1));
    hung.abort();
}

#[tokio::test]
async fn test_superseded_failure_keeps_newer_fetch_pending() {
    // GIVEN: a pending fetch that is invalidated, and a newer fetch for the same key
    // WHEN: the older fetch fails while the newer one is still running
    // THEN: the newer fetch stays pending and its value is the one cached
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let old_gate = Arc::new(Notify::new());
    let new_gate = Arc::new(Notify::new());

    let old = {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        let gate = Arc::clone(&old_gate);
        tokio::spawn(async move {
            cache
                .get_or_fetch::<u32, _, _>("k", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        gate.notified().await;
                        Err(anyhow::anyhow!("stale backend"))
                    }
                })
                .await
        })
    };
    while !cache.is_pending("k") {
        tokio::task::yield_now().await;
    }
    assert!(cache.invalidate("k"));

    let new = {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        let gate = Arc::clone(&new_gate);
        tokio::spawn(async move {
            cache
                .get_or_fetch("k", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        gate.notified().await;
                        Ok(2_u32)
                    }
                })
                .await
        })
    };
    while !cache.is_pending("k") {
        tokio::task::yield_now().await;
    }

    old_gate.notify_one();
    assert!(matches!(old.await.unwrap(), Err(Error::Fetch(_))));
    assert!(cache.is_pending("k"), "older failure must not clear the newer fetch");

    new_gate.notify_one();
    assert_eq!(new.await.unwrap().unwrap(), 2);
    assert_eq!(cache.peek::<u32>("k"), Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_all_forces_fresh_fetch() {
    let cache = RequestCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    cache
        .get_or_fetch("session:profile", slow_fetcher(Arc::clone(&calls), Duration::ZERO, "me"))
        .await
        .unwrap();
    cache.clear_all();
    assert!(cache.is_empty());

    cache
        .get_or_fetch("session:profile", slow_fetcher(Arc::clone(&calls), Duration::ZERO, "me"))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_params_key_composes_with_namespace() {
    let cache = RequestCache::new();
    let employees = cache.namespace("employees");
    let filter = serde_json::json!({"department": "ops", "active": true});
    let key = fetch_cache::Namespace::params_key(&filter).unwrap();

    let names: Vec<String> = employees
        .get_or_fetch(&key, || async { Ok(vec!["Grace".to_string()]) })
        .await
        .unwrap();

    assert_eq!(names, vec!["Grace".to_string()]);
    assert!(cache.peek::<Vec<String>>(&format!("employees:{key}")).is_some());
}
