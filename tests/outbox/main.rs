//! Outbox processor tests: delivery, retry bookkeeping, dead letters,
//! leases and cancellation.

#[path = "../support/mod.rs"]
mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use durable_messaging::{
    CancellationToken, DispatchError, Dispatcher, InMemoryOutboxStore, Lease, OutboxConfig,
    OutboxItem, OutboxProcessor, OutboxStore, StoreError,
};
use support::{init_tracing, t0, FlakyDispatcher, RecordingDispatcher};

fn config(max_retries: u32) -> OutboxConfig {
    OutboxConfig::default()
        .with_max_retries(max_retries)
        .with_base_retry_delay(Duration::from_secs(1))
        .with_worker_id("outbox-test")
}

async fn add_items(store: &InMemoryOutboxStore, tags: &[&str], now: DateTime<Utc>) -> Vec<String> {
    let mut ids = Vec::new();
    for (i, tag) in tags.iter().enumerate() {
        let created = now + chrono::Duration::milliseconds(i as i64);
        let item = OutboxItem::new(*tag, format!("payload-{}", i).into_bytes(), created);
        ids.push(item.id.clone());
        store.add(item).await.unwrap();
    }
    ids
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn happy_path_publishes_every_item_in_one_tick() {
    init_tracing();
    let store = InMemoryOutboxStore::new();
    let dispatcher = RecordingDispatcher::new();
    let ids = add_items(&store, &["UserCreated", "OrderPlaced", "EmailQueued"], t0()).await;

    let processor = OutboxProcessor::new(store.clone(), dispatcher.clone(), config(3)).unwrap();
    let result = processor.tick_at(t0(), &CancellationToken::new()).await.unwrap();

    assert_eq!(result.claimed, 3);
    assert_eq!(result.completed, 3);
    assert_eq!(dispatcher.tags(), vec!["UserCreated", "OrderPlaced", "EmailQueued"]);
    assert!(dispatcher.calls().iter().all(|call| call.kind == "notification"));

    for id in &ids {
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.processed_at, Some(t0()));
        assert!(item.last_error.is_none());
        assert!(item.claimed_by.is_none());
    }

    let lease = Lease::new("other", t0(), Duration::from_secs(60));
    assert!(store.claim_pending(10, 3, t0(), &lease).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_size_bounds_each_tick() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = RecordingDispatcher::new();
    add_items(&store, &["a", "b", "c", "d", "e"], t0()).await;

    let processor =
        OutboxProcessor::new(store, dispatcher.clone(), config(3).with_batch_size(2)).unwrap();
    let cancel = CancellationToken::new();

    let counts: Vec<usize> = {
        let mut counts = Vec::new();
        for _ in 0..4 {
            counts.push(processor.tick_at(t0(), &cancel).await.unwrap().completed);
        }
        counts
    };
    assert_eq!(counts, vec![2, 2, 1, 0]);
    assert_eq!(dispatcher.tags(), vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn one_failing_item_does_not_abort_the_batch() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = RecordingDispatcher::new();
    dispatcher.fail("Broken", "subscriber offline");
    let ids = add_items(&store, &["Fine", "Broken", "AlsoFine"], t0()).await;

    let processor = OutboxProcessor::new(store.clone(), dispatcher, config(3)).unwrap();
    let result = processor.tick_at(t0(), &CancellationToken::new()).await.unwrap();

    assert_eq!(result.completed, 2);
    assert_eq!(result.retried, 1);

    let broken = store.get(&ids[1]).await.unwrap().unwrap();
    assert!(!broken.is_processed());
    assert_eq!(broken.retry_count, 1);
    assert_eq!(broken.next_retry_at, Some(t0() + chrono::Duration::seconds(1)));
    assert!(broken.last_error.unwrap().contains("subscriber offline"));
}

#[tokio::test]
async fn unknown_type_tag_follows_retry_bookkeeping() {
    let store = InMemoryOutboxStore::new();
    let ids = add_items(&store, &["NobodyListens"], t0()).await;

    let registry = durable_messaging::HandlerRegistry::new();
    let processor = OutboxProcessor::new(store.clone(), registry, config(2)).unwrap();
    let cancel = CancellationToken::new();

    processor.tick_at(t0(), &cancel).await.unwrap();
    let item = store.get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(item.retry_count, 1);
    assert!(item.last_error.unwrap().contains("unknown type"));

    let later = t0() + chrono::Duration::hours(1);
    let result = processor.tick_at(later, &cancel).await.unwrap();
    assert_eq!(result.dead_lettered, 1);
}

// ============================================================================
// Retries and dead letters
// ============================================================================

#[tokio::test]
async fn exhausted_item_is_dead_lettered() {
    init_tracing();
    let store = InMemoryOutboxStore::new();
    let dispatcher = RecordingDispatcher::new();
    dispatcher.fail("UserCreated", "broker down");
    let ids = add_items(&store, &["UserCreated"], t0()).await;

    let processor = OutboxProcessor::new(store.clone(), dispatcher.clone(), config(3)).unwrap();
    let cancel = CancellationToken::new();

    let mut now = t0();
    for _ in 0..3 {
        processor.tick_at(now, &cancel).await.unwrap();
        now = now + chrono::Duration::hours(1);
    }

    let item = store.get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(item.retry_count, 3);
    assert!(item.processed_at.is_none());
    assert!(item.next_retry_at.is_none());
    assert!(item.is_dead_lettered(3));

    let lease = Lease::new("other", now, Duration::from_secs(60));
    assert!(store.claim_pending(10, 3, now, &lease).await.unwrap().is_empty());
    assert_eq!(store.dead_letters(3).await.unwrap().len(), 1);

    let result = processor.tick_at(now, &cancel).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(dispatcher.calls().len(), 3);
}

#[tokio::test]
async fn item_is_not_retried_before_its_backoff_elapses() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = FlakyDispatcher::new(1);
    let ids = add_items(&store, &["UserCreated"], t0()).await;

    let processor = OutboxProcessor::new(store.clone(), dispatcher.clone(), config(5)).unwrap();
    let cancel = CancellationToken::new();

    processor.tick_at(t0(), &cancel).await.unwrap();
    let early = t0() + chrono::Duration::milliseconds(999);
    assert!(processor.tick_at(early, &cancel).await.unwrap().is_empty());
    assert_eq!(dispatcher.attempts(), 1);

    let due = t0() + chrono::Duration::seconds(1);
    let result = processor.tick_at(due, &cancel).await.unwrap();
    assert_eq!(result.completed, 1);

    let item = store.get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(item.processed_at, Some(due));
    assert_eq!(item.retry_count, 1);
    assert!(item.last_error.is_none());
}

#[tokio::test]
async fn backoff_grows_with_each_failure() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = FlakyDispatcher::new(usize::MAX);
    let ids = add_items(&store, &["UserCreated"], t0()).await;

    let processor = OutboxProcessor::new(store.clone(), dispatcher, config(6)).unwrap();
    let cancel = CancellationToken::new();

    let mut now = t0();
    let mut delays = Vec::new();
    for _ in 0..5 {
        processor.tick_at(now, &cancel).await.unwrap();
        let item = store.get(&ids[0]).await.unwrap().unwrap();
        let next = item.next_retry_at.unwrap();
        delays.push((next - now).num_seconds());
        now = next;
    }

    assert_eq!(delays, vec![1, 2, 4, 8, 16]);
}

#[tokio::test]
async fn requeued_dead_letter_is_delivered() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = RecordingDispatcher::new();
    dispatcher.fail("UserCreated", "broker down");
    let ids = add_items(&store, &["UserCreated"], t0()).await;

    let processor = OutboxProcessor::new(store.clone(), dispatcher.clone(), config(1)).unwrap();
    let cancel = CancellationToken::new();
    processor.tick_at(t0(), &cancel).await.unwrap();
    assert_eq!(store.dead_letters(1).await.unwrap().len(), 1);

    dispatcher.recover("UserCreated");
    store.requeue(&ids[0]).await.unwrap();
    let result = processor.tick_at(t0(), &cancel).await.unwrap();
    assert_eq!(result.completed, 1);
    assert!(store.get(&ids[0]).await.unwrap().unwrap().is_processed());
}

// ============================================================================
// Leases and multiple instances
// ============================================================================

#[tokio::test]
async fn item_held_by_crashed_claimant_is_reclaimed_after_lease() {
    let store = InMemoryOutboxStore::new();
    let ids = add_items(&store, &["UserCreated"], t0()).await;

    // A claimant that never reports back.
    let crashed = Lease::new("crashed-worker", t0(), Duration::from_secs(60));
    assert_eq!(store.claim_pending(10, 3, t0(), &crashed).await.unwrap().len(), 1);

    let processor =
        OutboxProcessor::new(store.clone(), RecordingDispatcher::new(), config(3)).unwrap();
    let cancel = CancellationToken::new();

    assert!(processor.tick_at(t0(), &cancel).await.unwrap().is_empty());

    let after_lease = t0() + chrono::Duration::seconds(61);
    let result = processor.tick_at(after_lease, &cancel).await.unwrap();
    assert_eq!(result.completed, 1);
    assert!(store.get(&ids[0]).await.unwrap().unwrap().is_processed());
}

#[tokio::test]
async fn stale_claimant_cannot_disturb_a_reclaimed_item() {
    let store = InMemoryOutboxStore::new();
    let ids = add_items(&store, &["UserCreated"], t0()).await;

    let slow = Lease::new("slow-worker", t0(), Duration::from_secs(60));
    assert_eq!(store.claim_pending(10, 3, t0(), &slow).await.unwrap().len(), 1);

    let after_lease = t0() + chrono::Duration::seconds(61);
    let takeover = Lease::new("takeover-worker", after_lease, Duration::from_secs(60));
    assert_eq!(store.claim_pending(10, 3, after_lease, &takeover).await.unwrap().len(), 1);

    // The slow claimant finally reports back.
    let stale = store
        .mark_failed(&ids[0], "slow-worker", "timed out", Some(after_lease))
        .await;
    assert!(matches!(stale, Err(StoreError::LeaseLost { .. })));

    let item = store.get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(item.claimed_by.as_deref(), Some("takeover-worker"));
    assert_eq!(item.retry_count, 0);
    assert!(item.last_error.is_none());

    let third = Lease::new("third-worker", after_lease, Duration::from_secs(60));
    assert!(store.claim_pending(10, 3, after_lease, &third).await.unwrap().is_empty());

    store
        .mark_processed(&ids[0], "takeover-worker", after_lease)
        .await
        .unwrap();
    assert!(matches!(
        store.mark_failed(&ids[0], "slow-worker", "timed out", None).await,
        Err(StoreError::LeaseLost { .. })
    ));
    let item = store.get(&ids[0]).await.unwrap().unwrap();
    assert!(item.is_processed());
    assert_eq!(item.retry_count, 0);
    assert!(item.last_error.is_none());
}

/// Another instance takes the item over while the publish is in flight, as
/// if this one had stalled past its lease.
struct TakenOverMidPublish {
    store: InMemoryOutboxStore,
}

#[async_trait]
impl Dispatcher for TakenOverMidPublish {
    async fn dispatch(&self, _type_tag: &str, _payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        Ok(Vec::new())
    }

    async fn publish(&self, _type_tag: &str, _payload: &[u8]) -> Result<(), DispatchError> {
        let later = t0() + chrono::Duration::seconds(61);
        let lease = Lease::new("takeover-worker", later, Duration::from_secs(60));
        self.store
            .claim_pending(10, 3, later, &lease)
            .await
            .map_err(|e| DispatchError::handler(e.to_string()))?;
        Ok(())
    }
}

#[tokio::test]
async fn processor_counts_lost_lease_as_store_error() {
    let store = InMemoryOutboxStore::new();
    let ids = add_items(&store, &["UserCreated"], t0()).await;

    let processor = OutboxProcessor::new(
        store.clone(),
        TakenOverMidPublish {
            store: store.clone(),
        },
        config(3),
    )
    .unwrap();
    let result = processor.tick_at(t0(), &CancellationToken::new()).await.unwrap();

    assert_eq!(result.claimed, 1);
    assert_eq!(result.completed, 0);
    assert_eq!(result.store_errors, 1);

    let item = store.get(&ids[0]).await.unwrap().unwrap();
    assert!(!item.is_processed());
    assert_eq!(item.claimed_by.as_deref(), Some("takeover-worker"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_processors_never_publish_an_item_twice() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = RecordingDispatcher::new();
    let tags: Vec<String> = (0..60).map(|i| format!("Event{}", i)).collect();
    let tag_refs: Vec<&str> = tags.iter().map(|s| s.as_str()).collect();
    add_items(&store, &tag_refs, t0()).await;

    let processors: Vec<_> = (0..3)
        .map(|n| {
            Arc::new(
                OutboxProcessor::new(
                    store.clone(),
                    dispatcher.clone(),
                    config(3)
                        .with_batch_size(4)
                        .with_worker_id(format!("outbox-{}", n)),
                )
                .unwrap(),
            )
        })
        .collect();

    let handles: Vec<_> = processors
        .iter()
        .cloned()
        .map(|processor| {
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let mut completed = 0;
                loop {
                    let result = processor.tick_at(t0(), &cancel).await.unwrap();
                    if result.is_empty() {
                        break completed;
                    }
                    completed += result.completed;
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    let published = dispatcher.tags();
    let unique: HashSet<_> = published.iter().collect();
    assert_eq!(total, 60);
    assert_eq!(published.len(), 60);
    assert_eq!(unique.len(), 60);
}

// ============================================================================
// Cancellation and background worker
// ============================================================================

/// Publishes successfully and then cancels the token, as a shutdown would.
struct CancelAfterFirst {
    cancel: CancellationToken,
}

#[async_trait]
impl Dispatcher for CancelAfterFirst {
    async fn dispatch(&self, _type_tag: &str, _payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        Ok(Vec::new())
    }

    async fn publish(&self, _type_tag: &str, _payload: &[u8]) -> Result<(), DispatchError> {
        self.cancel.cancel();
        Ok(())
    }
}

#[tokio::test]
async fn cancellation_mid_batch_releases_unprocessed_items() {
    let store = InMemoryOutboxStore::new();
    let ids = add_items(&store, &["a", "b", "c"], t0()).await;
    let cancel = CancellationToken::new();

    let processor = OutboxProcessor::new(
        store.clone(),
        CancelAfterFirst {
            cancel: cancel.clone(),
        },
        config(3),
    )
    .unwrap();
    let result = processor.tick_at(t0(), &cancel).await.unwrap();

    assert_eq!(result.claimed, 3);
    assert_eq!(result.completed, 1);
    assert_eq!(result.released, 2);

    assert!(store.get(&ids[0]).await.unwrap().unwrap().is_processed());
    for id in &ids[1..] {
        let item = store.get(id).await.unwrap().unwrap();
        assert!(!item.is_processed());
        assert_eq!(item.retry_count, 0);
        assert!(item.claimed_by.is_none());
    }

    let resumed =
        OutboxProcessor::new(store.clone(), RecordingDispatcher::new(), config(3)).unwrap();
    let result = resumed
        .tick_at(t0(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.completed, 2);
}

#[tokio::test]
async fn spawned_processor_drains_in_background() {
    init_tracing();
    let store = InMemoryOutboxStore::new();
    let dispatcher = RecordingDispatcher::new();
    add_items(&store, &["a", "b", "c"], Utc::now()).await;

    let worker = OutboxProcessor::new(
        store.clone(),
        dispatcher.clone(),
        config(3).with_poll_interval(Duration::from_millis(10)),
    )
    .unwrap()
    .spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while dispatcher.calls().len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = worker.stop().await;
    assert_eq!(stats.completed, 3);
    assert!(stats.polls >= 1);
    assert!(store.items().unwrap().iter().all(|item| item.is_processed()));
}
