//! Inbox gate tests: replay protection, cached responses, retries on
//! redelivery and retention.

#[path = "../support/mod.rs"]
mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use durable_messaging::{
    codec, CancellationToken, DispatchError, HandlerRegistry, InMemoryInboxStore, InboxConfig,
    InboxError, InboxGate, InboxStore, InboxSweeper, MessagingConfig, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use support::{init_tracing, t0, RecordingDispatcher};

fn gate() -> InboxGate<InMemoryInboxStore> {
    InboxGate::new(InMemoryInboxStore::new(), InboxConfig::default())
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct PaymentReceipt {
    payment_id: String,
    amount_cents: u64,
}

// ============================================================================
// Replay protection
// ============================================================================

#[tokio::test]
async fn replayed_message_runs_handler_once() {
    init_tracing();
    let gate = gate();
    let cancel = CancellationToken::new();
    let counter = AtomicUsize::new(0);

    let handle = || async {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("counter={}", n).into_bytes())
    };

    let first = gate.process("m1", "Increment", handle, &cancel).await.unwrap();
    let second = gate.process("m1", "Increment", handle, &cancel).await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(first, b"counter=1".to_vec());
}

#[tokio::test]
async fn distinct_messages_are_handled_independently() {
    let gate = gate();
    let cancel = CancellationToken::new();
    let counter = AtomicUsize::new(0);

    for id in ["m1", "m2", "m1", "m3", "m2"] {
        gate.process(id, "Increment", || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }, &cancel)
        .await
        .unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn typed_handler_result_is_cached() {
    let gate = gate();
    let cancel = CancellationToken::new();
    let charges = AtomicUsize::new(0);

    let charge = || async {
        let n = charges.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentReceipt {
            payment_id: format!("pay-{}", n),
            amount_cents: 4_200,
        })
    };

    let first: PaymentReceipt = gate.process_typed("m1", "Charge", charge, &cancel).await.unwrap();
    let second: PaymentReceipt = gate.process_typed("m1", "Charge", charge, &cancel).await.unwrap();

    assert_eq!(first.payment_id, "pay-0");
    assert_eq!(first, second);
    assert_eq!(charges.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatch_routes_through_registry_once() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = invocations.clone();
    let registry = HandlerRegistry::new().command("payment.charge", move |amount: u64| {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DispatchError>(format!("charged {}", amount))
        }
    });

    let gate = gate();
    let cancel = CancellationToken::new();
    let payload = codec::encode(&1_500u64).unwrap();

    let first = gate
        .dispatch("m1", "payment.charge", &payload, &registry, &cancel)
        .await
        .unwrap();
    let second = gate
        .dispatch("m1", "payment.charge", &payload, &registry, &cancel)
        .await
        .unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(codec::decode::<String>(&first).unwrap(), "charged 1500");
}

// ============================================================================
// Failures and redelivery
// ============================================================================

#[tokio::test]
async fn failed_attempts_are_retried_on_redelivery() {
    let store = InMemoryInboxStore::new();
    let config = InboxConfig::default().with_retry(RetryPolicy::new(Duration::from_secs(2), 5));
    let gate = InboxGate::new(store.clone(), config);
    let dispatcher = RecordingDispatcher::new();
    dispatcher.fail("Ship", "carrier unavailable");
    let cancel = CancellationToken::new();

    for attempt in 1..=2u32 {
        let err = gate
            .dispatch("m1", "Ship", b"parcel", &dispatcher, &cancel)
            .await
            .unwrap_err();
        match err {
            InboxError::Handler { message_id, source } => {
                assert_eq!(message_id, "m1");
                assert_eq!(source, DispatchError::handler("carrier unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let item = store.get("m1").await.unwrap().unwrap();
        assert_eq!(item.retry_count, attempt);
        assert!(!item.is_processed());
    }

    dispatcher.recover("Ship");
    dispatcher.respond("Ship", b"tracking-42".to_vec());
    let response = gate
        .dispatch("m1", "Ship", b"parcel", &dispatcher, &cancel)
        .await
        .unwrap();

    assert_eq!(response, b"tracking-42".to_vec());
    assert_eq!(dispatcher.calls().len(), 3);

    let item = store.get("m1").await.unwrap().unwrap();
    assert!(item.is_processed());
    assert_eq!(item.retry_count, 2);
    assert_eq!(item.cached_response.as_deref(), Some(&b"tracking-42"[..]));
}

#[tokio::test]
async fn failure_backoff_is_recorded_from_attempt_time() {
    let store = InMemoryInboxStore::new();
    let config = InboxConfig::default().with_retry(RetryPolicy::new(Duration::from_secs(1), 5));
    let gate = InboxGate::new(store.clone(), config);
    let cancel = CancellationToken::new();

    let fail = || async { Err(DispatchError::handler("nope")) };
    gate.process_at(t0(), "m1", "Op", fail, &cancel).await.unwrap_err();
    let first = store.get("m1").await.unwrap().unwrap().next_retry_at.unwrap();

    gate.process_at(t0(), "m1", "Op", fail, &cancel).await.unwrap_err();
    let second = store.get("m1").await.unwrap().unwrap().next_retry_at.unwrap();

    assert_eq!(first, t0() + chrono::Duration::seconds(1));
    assert_eq!(second, t0() + chrono::Duration::seconds(2));
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn record_expires_after_retention_and_is_swept() {
    let store = InMemoryInboxStore::new();
    let config = InboxConfig::default().with_retention(Duration::from_secs(60 * 60));
    let gate = InboxGate::new(store.clone(), config.clone());
    let cancel = CancellationToken::new();

    gate.process_at(t0(), "m1", "Op", || async { Ok(b"done".to_vec()) }, &cancel)
        .await
        .unwrap();
    let item = store.get("m1").await.unwrap().unwrap();
    assert_eq!(item.received_at, t0());
    assert_eq!(item.expires_at, t0() + chrono::Duration::hours(1));

    let sweeper = InboxSweeper::new(store.clone(), config).unwrap();
    assert_eq!(sweeper.purge_expired(t0() + chrono::Duration::minutes(59)).await.unwrap(), 0);
    assert_eq!(sweeper.purge_expired(t0() + chrono::Duration::hours(1)).await.unwrap(), 1);
    assert!(store.is_empty().unwrap());
}

#[test]
fn retention_is_configurable_from_json() {
    let config = MessagingConfig::from_json_str(
        r#"{ "inbox": { "inbox_retention_period_ms": 3600000, "max_retries": 2 } }"#,
    )
    .unwrap();
    assert_eq!(config.inbox.retention_period, Duration::from_secs(3600));
    assert_eq!(config.inbox.retry.max_retries, 2);
}
