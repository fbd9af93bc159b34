// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end engine tests: pooling, demotion/promotion, bulk
//! operations, resume triggers, and the error relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use swr_engine::{
    CacheEngine, EngineConfig, EngineError, EntryFilter, EventNotifier, FetchBlock, Marker,
    MutateBlock, NetworkEvent, Reply, SubscribeBlock, UniqueId, VisibilityEvent,
};

fn fast_config() -> EngineConfig {
    EngineConfig {
        stale_time_ms: 60_000,
        keep_alive_ms: 50,
        inactive_capacity: 16,
        inactive_ttl_secs: 1_000,
        gc_interval_ms: 20,
        gc_chunk_size: 10,
        retry_count: 1,
        resume_after_delay_ms: 100,
        ..Default::default()
    }
}

fn counting_fetch(counter: &Arc<AtomicUsize>, value: Value) -> FetchBlock {
    let counter = counter.clone();
    Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        Box::pin(async move { Ok(value) })
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_query_roundtrip_through_engine() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));
    let query = engine.query(
        UniqueId::new("user.profile").with_tags(["42"]),
        counting_fetch(&fetches, json!({"id": 42})),
    );

    let mut observed = query.attach();
    assert_eq!(observed.settled().await.unwrap(), json!({"id": 42}));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_count(), 1);

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_same_key_shares_one_instance() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));
    let key = UniqueId::new("feed");

    let first = engine.query(key.clone(), counting_fetch(&fetches, json!(1)));
    let second = engine.query(key.clone(), counting_fetch(&fetches, json!(2)));
    assert!(Arc::ptr_eq(&first, &second));

    // Two observers, one fetch.
    let mut a = first.attach();
    let b = second.attach();
    a.settled().await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    a.release();
    b.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unobserved_query_demotes_then_promotes_same_instance() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));
    let key = UniqueId::new("posts");
    let query = engine.query(key.clone(), counting_fetch(&fetches, json!(["a"])));

    let mut observed = query.attach();
    observed.settled().await.unwrap();
    observed.release();

    // Keep-alive lapse, then the GC flush moves it to the inactive cache.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.inactive_count(), 1);

    let promoted = engine.get(&key).expect("promotable");
    assert!(Arc::ptr_eq(&query, &promoted), "one live instance per key");
    assert_eq!(engine.active_count(), 1);
    assert_eq!(engine.inactive_count(), 0);

    // The promoted reply is still fresh; reattaching does not refetch.
    let observed = promoted.attach();
    settle().await;
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(observed.model().reply, Reply::Some(json!(["a"])));

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reattach_within_keep_alive_prevents_demotion() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));
    let query = engine.query(UniqueId::new("posts"), counting_fetch(&fetches, json!(1)));

    let mut observed = query.attach();
    observed.settled().await.unwrap();
    observed.release();

    // Back before the 50ms window closes.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let observed = query.attach();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(engine.active_count(), 1, "never demoted");
    assert_eq!(engine.inactive_count(), 0);
    assert_eq!(fetches.load(Ordering::SeqCst), 1, "same execution");

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_demoted_query_expires_out_of_inactive_cache() {
    use std::sync::atomic::AtomicU64;
    use swr_engine::TimeSource;

    #[derive(Default)]
    struct ManualTime(AtomicU64);
    impl TimeSource for ManualTime {
        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    let time = Arc::new(ManualTime::default());
    let config = EngineConfig {
        inactive_ttl_secs: 60,
        ..fast_config()
    };
    let engine = CacheEngine::with_time_source(config, time.clone()).unwrap();

    let fetches = Arc::new(AtomicUsize::new(0));
    let key = UniqueId::new("ephemeral");
    let query = engine.query(key.clone(), counting_fetch(&fetches, json!(1)));
    let mut observed = query.attach();
    observed.settled().await.unwrap();
    observed.release();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.inactive_count(), 1);

    // Push the wall clock past the inactive TTL: the demoted entry is no
    // longer promotable, so the key gets a brand-new instance.
    time.0.fetch_add(61, Ordering::SeqCst);
    assert!(engine.get(&key).is_none());
    assert_eq!(
        engine.inactive_count(),
        0,
        "expired leftover dropped on the missed promotion"
    );

    let recreated = engine.query(key.clone(), counting_fetch(&fetches, json!(2)));
    assert!(!Arc::ptr_eq(&query, &recreated));

    // Bulk operations see exactly one instance for the key.
    let mut observed = recreated.attach();
    observed.settled().await.unwrap();
    engine.reset_where(&EntryFilter::all());
    assert!(recreated.model().reply.is_none());
    assert!(query.model().reply.is_some(), "stale instance untouched");

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_where_hits_active_and_inactive() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));

    let demoted_key = UniqueId::new("user.settings").with_tags(["user"]);
    let demoted = engine.query(demoted_key.clone(), counting_fetch(&fetches, json!(1)));
    let mut observed = demoted.attach();
    observed.settled().await.unwrap();
    observed.release();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.inactive_count(), 1);

    let active = engine.query(
        UniqueId::new("user.profile").with_tags(["user"]),
        counting_fetch(&fetches, json!(2)),
    );
    let mut observed = active.attach();
    observed.settled().await.unwrap();

    let unrelated = engine.query(
        UniqueId::new("feed").with_tags(["feed"]),
        counting_fetch(&fetches, json!(3)),
    );
    let mut unrelated_observed = unrelated.attach();
    unrelated_observed.settled().await.unwrap();
    let before = fetches.load(Ordering::SeqCst);

    engine.invalidate_where(&EntryFilter::all().with_keys(["user"]));
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Active matching query refetched immediately.
    assert_eq!(fetches.load(Ordering::SeqCst), before + 1);
    // Inactive one only carries the flag until promoted.
    assert!(demoted.model().invalidated);
    assert!(!unrelated.model().invalidated);

    observed.release();
    unrelated_observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reset_where_and_prune_where() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));

    let keep = engine.query(
        UniqueId::new("keep").with_tags(["keep"]),
        counting_fetch(&fetches, json!(1)),
    );
    let drop_me = engine.query(
        UniqueId::new("drop").with_tags(["drop"]),
        counting_fetch(&fetches, json!(2)),
    );
    let mut a = keep.attach();
    let mut b = drop_me.attach();
    a.settled().await.unwrap();
    b.settled().await.unwrap();

    engine.reset_where(&EntryFilter::all().with_keys(["keep"]));
    assert!(keep.model().reply.is_none(), "reset to never-fetched");
    assert!(drop_me.model().reply.is_some());

    engine.prune_where(&EntryFilter::all().with_keys(["drop"]));
    assert_eq!(engine.active_count(), 1);
    assert!(engine.get(&UniqueId::new("drop").with_tags(["drop"])).is_none());

    a.release();
    b.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resumes_errored_query() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let network = EventNotifier::<NetworkEvent>::new();
    let visibility = EventNotifier::<VisibilityEvent>::new();
    engine.start(&network, &visibility);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let fetch: FetchBlock = Arc::new(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if n == 0 {
                Err(EngineError::Fetch("offline".into()))
            } else {
                Ok(json!("online"))
            }
        })
    });
    let query = engine.query(UniqueId::new("status"), fetch);
    let mut observed = query.attach();

    assert_eq!(
        observed.settled().await.unwrap_err(),
        EngineError::Fetch("offline".into())
    );

    network.notify(NetworkEvent::Lost);
    network.notify(NetworkEvent::Available);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2, "resumed after debounce");
    assert_eq!(query.model().reply, Reply::Some(json!("online")));
    assert!(query.model().error.is_none());

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_foreground_resumes_awaited_query() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let network = EventNotifier::<NetworkEvent>::new();
    let visibility = EventNotifier::<VisibilityEvent>::new();
    engine.start(&network, &visibility);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let fetch: FetchBlock = Arc::new(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if n == 0 {
                Err(EngineError::Fetch("backgrounded".into()))
            } else {
                Ok(json!(n))
            }
        })
    });
    let query = engine.query(UniqueId::new("inbox"), fetch);
    let mut observed = query.attach();
    let _ = observed.settled().await;

    visibility.notify(VisibilityEvent::Background);
    visibility.notify(VisibilityEvent::Foreground);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(query.model().error.is_none());

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mutation_through_engine() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let block: MutateBlock = Arc::new(|input| Box::pin(async move { Ok(json!({"saved": input})) }));
    let mutation = engine.mutation(UniqueId::new("profile.save"), block);
    let observed = mutation.attach();

    let out = mutation.mutate(json!({"name": "Ada"})).await.unwrap();
    assert_eq!(out, json!({"saved": {"name": "Ada"}}));
    assert_eq!(observed.model().reply, Reply::Some(out));

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscription_through_engine() {
    use futures::StreamExt;

    let engine = CacheEngine::new(fast_config()).unwrap();
    let block: SubscribeBlock = Arc::new(|| {
        futures::stream::iter(vec![Ok(json!(1)), Ok(json!(2))]).boxed()
    });
    let subscription = engine.subscription(UniqueId::new("ticker"), block);
    let observed = subscription.attach();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(observed.model().reply, Reply::Some(json!(2)));

    observed.release();
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unobserved_mutation_dropped_not_demoted() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let block: MutateBlock = Arc::new(|input| Box::pin(async move { Ok(input) }));
    let key = UniqueId::new("one.shot");
    let mutation = engine.mutation(key.clone(), block.clone());

    let observed = mutation.attach();
    observed.release();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Gone entirely; the inactive cache is for queries only.
    assert_eq!(engine.inactive_count(), 0);
    let recreated = engine.mutation(key, block);
    assert!(!Arc::ptr_eq(&mutation, &recreated));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_error_relay_broadcast() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let mut first = engine.subscribe_errors();
    let mut second = engine.subscribe_errors();

    engine.report_error(
        EngineError::Mutation("sync failed".into()),
        UniqueId::new("outbox"),
        Marker::none().with("attempt", 3),
    );

    let a = first.recv().await.unwrap();
    let b = second.recv().await.unwrap();
    assert_eq!(a.error, EngineError::Mutation("sync failed".into()));
    assert_eq!(a.key_id, b.key_id);
    assert_eq!(a.marker.get("attempt"), Some(&json!(3)));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_everything() {
    let engine = CacheEngine::new(fast_config()).unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));
    let query = engine.query(UniqueId::new("q"), counting_fetch(&fetches, json!(1)));
    let mut observed = query.attach();
    observed.settled().await.unwrap();

    engine.shutdown().await;
    assert_eq!(engine.active_count(), 0);
    assert_eq!(engine.inactive_count(), 0);

    // A cancelled query never restarts.
    query.resume();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    observed.release();
}
